//! Page Store - the page caching layer.
//!
//! The [`PageStore`] provides:
//! - Page caching between disk and memory
//! - Pin-based reference counting
//! - Dirty page write-back when the last pin is released
//! - Page allocation and truncation

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::buffer::{CacheBacking, CacheStats, PageHandle, RefCountedCache};
use crate::common::config::MIN_CACHED_PAGES;
use crate::common::{Error, PageId, Result};
use crate::storage::page::Page;
use crate::storage::DiskManager;

/// Loads pages from the page file and writes dirty ones back.
struct PageLoader {
    disk_manager: Mutex<DiskManager>,
}

impl PageLoader {
    fn flush(&self, page: &Page) -> Result<()> {
        // Cleared first so a write racing with the flush re-dirties the page
        page.clear_dirty();
        let data = page.data();
        self.disk_manager.lock().write_page(page.id(), &data)
    }
}

impl CacheBacking<Arc<Page>> for PageLoader {
    fn load(&self, key: u64) -> Result<Arc<Page>> {
        let page_id = PageId::new(key as u32);
        let data = self.disk_manager.lock().read_page(page_id)?;
        trace!(page = %page_id, "page_store.load");
        Ok(Arc::new(Page::new(page_id, data)))
    }

    fn evict(&self, _key: u64, page: Arc<Page>) -> Result<()> {
        if page.is_dirty() {
            trace!(page = %page.id(), "page_store.write_back");
            self.flush(&page)?;
        }
        Ok(())
    }
}

/// Manages the cached pages of one page file.
///
/// # Architecture
/// ```text
/// ┌─────────────────────────────────────────────────────┐
/// │                     PageStore                       │
/// │  ┌──────────────────────────────────────────────┐   │
/// │  │  RefCountedCache<Arc<Page>, PageLoader>       │   │
/// │  │  key = page number, value = shared page       │   │
/// │  └──────────────────────────────────────────────┘   │
/// │                 ┌──────────────┐                    │
/// │                 │ disk_manager │                    │
/// │                 │    Mutex     │                    │
/// │                 └──────────────┘                    │
/// └─────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// - `cache`: internal `Mutex` plus in-flight tracking
/// - `disk_manager`: `Mutex`, one I/O at a time
/// - pages: each `Page` has its own `RwLock`
pub struct PageStore {
    cache: RefCountedCache<Arc<Page>, PageLoader>,
}

impl PageStore {
    /// Create a page store caching at most `capacity` pages.
    ///
    /// # Errors
    /// Returns `Error::MemoryTooSmall` if `capacity` is below the minimum.
    pub fn new(capacity: usize, disk_manager: DiskManager) -> Result<Self> {
        if capacity < MIN_CACHED_PAGES {
            return Err(Error::MemoryTooSmall {
                pages: capacity,
                min: MIN_CACHED_PAGES,
            });
        }

        Ok(Self {
            cache: RefCountedCache::new(
                capacity,
                PageLoader {
                    disk_manager: Mutex::new(disk_manager),
                },
            ),
        })
    }

    // ========================================================================
    // Public API: Fetch pages
    // ========================================================================

    /// Fetch a page, pinning it until the handle drops.
    ///
    /// # Errors
    /// - `Error::PageNotFound` if the page doesn't exist on disk
    /// - `Error::CacheFull` if every cached page is pinned
    pub fn fetch(&self, page_id: PageId) -> Result<PageHandle<'_>> {
        let page = self.pin(page_id)?;
        Ok(PageHandle::new(self, page))
    }

    /// Pin a page without a guard. Every `pin` must be paired with `unpin`.
    pub(crate) fn pin(&self, page_id: PageId) -> Result<Arc<Page>> {
        self.cache.acquire(page_id.cache_key())
    }

    /// Release one pin taken by [`pin`](Self::pin).
    pub(crate) fn unpin(&self, page_id: PageId) -> Result<()> {
        self.cache.release(page_id.cache_key())
    }

    // ========================================================================
    // Public API: Allocate, flush and truncate
    // ========================================================================

    /// Append a new page initialized with `init` and return its number.
    ///
    /// The page is on disk before this returns; it is not pinned.
    pub fn allocate(&self, init: &[u8]) -> Result<PageId> {
        let page_id = self.cache.backing().disk_manager.lock().allocate_page(init)?;
        debug!(page = %page_id, "page_store.allocate");
        Ok(page_id)
    }

    /// Write a page to disk immediately and clear its dirty flag.
    pub fn flush(&self, page: &Page) -> Result<()> {
        self.cache.backing().flush(page)
    }

    /// Shrink the page file to `max_page` pages.
    ///
    /// Only used by recovery, before any page beyond `max_page` is cached.
    pub fn truncate_to(&self, max_page: u32) -> Result<()> {
        debug!(max_page, "page_store.truncate");
        self.cache.backing().disk_manager.lock().truncate(max_page)
    }

    /// Number of pages in the page file.
    pub fn page_count(&self) -> u32 {
        self.cache.backing().disk_manager.lock().page_count()
    }

    /// Write back every cached page and empty the cache.
    pub fn shutdown(&self) -> Result<()> {
        self.cache.shutdown()
    }

    // ========================================================================
    // Public API: Stats and info
    // ========================================================================

    /// Get cache statistics.
    pub fn stats(&self) -> &CacheStats {
        self.cache.stats()
    }

    /// Maximum number of cached pages.
    pub fn capacity(&self) -> usize {
        self.cache.capacity()
    }

    /// Number of pages currently cached.
    pub fn cached_pages(&self) -> usize {
        self.cache.len()
    }

    /// Pin count of a page, or None if it is not cached.
    pub fn pin_count(&self, page_id: PageId) -> Option<usize> {
        self.cache.ref_count(page_id.cache_key())
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use tempfile::tempdir;

    fn create_test_store(capacity: usize) -> (tempfile::TempDir, PageStore) {
        let dir = tempdir().unwrap();
        let dm = DiskManager::create(dir.path().join("test.db")).unwrap();
        (dir, PageStore::new(capacity, dm).unwrap())
    }

    #[test]
    fn test_memory_too_small() {
        let dir = tempdir().unwrap();
        let dm = DiskManager::create(dir.path().join("test.db")).unwrap();

        assert!(matches!(
            PageStore::new(9, dm),
            Err(Error::MemoryTooSmall { pages: 9, min: 10 })
        ));
    }

    #[test]
    fn test_fetch_pins_and_unpins() {
        let (_dir, store) = create_test_store(10);
        let page_id = store.allocate(&[1, 2, 3]).unwrap();

        {
            let page = store.fetch(page_id).unwrap();
            assert_eq!(&page.data()[..3], &[1, 2, 3]);
            assert_eq!(store.pin_count(page_id), Some(1));

            let again = store.fetch(page_id).unwrap();
            assert_eq!(again.page_id(), page_id);
            assert_eq!(store.pin_count(page_id), Some(2));
        }

        assert_eq!(store.pin_count(page_id), None);
    }

    #[test]
    fn test_fetch_missing_page() {
        let (_dir, store) = create_test_store(10);
        assert!(matches!(store.fetch(PageId::new(5)), Err(Error::PageNotFound(5))));
        assert_eq!(store.cached_pages(), 0);
    }

    #[test]
    fn test_dirty_page_written_back_on_release() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let page_id = {
            let store = PageStore::new(10, DiskManager::create(&path).unwrap()).unwrap();
            let page_id = store.allocate(&[]).unwrap();
            {
                let page = store.fetch(page_id).unwrap();
                page.data_mut()[42] = 0xAB;
                page.mark_dirty();
            }
            page_id
        };

        let store = PageStore::new(10, DiskManager::open(&path).unwrap()).unwrap();
        let page = store.fetch(page_id).unwrap();
        assert_eq!(page.data()[42], 0xAB);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_clean_page_not_written() {
        let (_dir, store) = create_test_store(10);
        let page_id = store.allocate(&[]).unwrap();

        {
            let page = store.fetch(page_id).unwrap();
            // Modified but never marked dirty
            page.data_mut()[0] = 0xFF;
        }

        let page = store.fetch(page_id).unwrap();
        assert_eq!(page.data()[0], 0);
    }

    #[test]
    fn test_cache_full_when_all_pinned() {
        let (_dir, store) = create_test_store(10);
        let ids: Vec<PageId> = (0..11).map(|_| store.allocate(&[]).unwrap()).collect();

        let pinned: Vec<_> = ids[..10].iter().map(|&id| store.fetch(id).unwrap()).collect();
        assert!(matches!(store.fetch(ids[10]), Err(Error::CacheFull)));

        drop(pinned);
        assert!(store.fetch(ids[10]).is_ok());
    }

    #[test]
    fn test_flush_and_truncate() {
        let (_dir, store) = create_test_store(10);
        for _ in 0..4 {
            store.allocate(&[]).unwrap();
        }
        assert_eq!(store.page_count(), 4);

        {
            let page = store.fetch(PageId::new(2)).unwrap();
            page.data_mut()[0] = 7;
            page.mark_dirty();
            store.flush(&page).unwrap();
            assert!(!page.is_dirty());
        }

        store.truncate_to(2).unwrap();
        assert_eq!(store.page_count(), 2);
        assert_eq!(store.fetch(PageId::new(2)).unwrap().data()[0], 7);
        assert!(store.fetch(PageId::new(3)).is_err());
    }

    #[test]
    fn test_shutdown_writes_pinned_pages() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let store = PageStore::new(10, DiskManager::create(&path).unwrap()).unwrap();
            let page_id = store.allocate(&[]).unwrap();
            let page = store.pin(page_id).unwrap();
            page.data_mut()[1] = 9;
            page.mark_dirty();
            store.shutdown().unwrap();
        }

        let mut dm = DiskManager::open(&path).unwrap();
        assert_eq!(dm.read_page(PageId::new(1)).unwrap()[1], 9);
    }

    #[test]
    fn test_concurrent_fetch() {
        let (_dir, store) = create_test_store(16);
        let ids: Vec<PageId> = (0..8).map(|_| store.allocate(&[]).unwrap()).collect();

        thread::scope(|s| {
            for t in 0..4u8 {
                let store = &store;
                let ids = &ids;
                s.spawn(move || {
                    for _ in 0..100 {
                        for &id in ids {
                            let page = store.fetch(id).unwrap();
                            let _ = page.data()[t as usize];
                        }
                    }
                });
            }
        });

        assert_eq!(store.cached_pages(), 0);
    }
}
