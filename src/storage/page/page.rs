//! Page - the fundamental 8KB unit of storage held in memory.
//!
//! A [`Page`] pairs the raw bytes of one page-file page with the metadata the
//! page cache needs: its number and a dirty flag for write-back.

use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::common::config::PAGE_SIZE;
use crate::common::PageId;

/// A cached page.
///
/// Pages are shared through `Arc<Page>` between the page cache and every
/// data item that lives on them. The cache writes a page back when its last
/// reference is released and the dirty flag is set.
///
/// # Thread Safety
/// - `data`: `RwLock` for read/write synchronization of the bytes
/// - `dirty`: `AtomicBool` for lock-free dirty tracking
///
/// # Example
/// ```
/// use tidedb::storage::page::Page;
/// use tidedb::PageId;
///
/// let page = Page::new(PageId::new(2), vec![0u8; tidedb::PAGE_SIZE].into_boxed_slice());
/// page.data_mut()[0] = 0xFF;
/// page.mark_dirty();
/// assert_eq!(page.data()[0], 0xFF);
/// assert!(page.is_dirty());
/// ```
pub struct Page {
    id: PageId,

    /// The page bytes, always `PAGE_SIZE` long.
    data: RwLock<Box<[u8]>>,

    /// Whether the page has been modified since it was last written.
    dirty: AtomicBool,
}

impl Page {
    /// Wrap bytes read from disk.
    pub fn new(id: PageId, data: Box<[u8]>) -> Self {
        debug_assert_eq!(data.len(), PAGE_SIZE);
        Self {
            id,
            data: RwLock::new(data),
            dirty: AtomicBool::new(false),
        }
    }

    /// Get the page number.
    #[inline]
    pub fn id(&self) -> PageId {
        self.id
    }

    // ========================================================================
    // Data access (RwLock)
    // ========================================================================

    /// Acquire read lock on the bytes.
    #[inline]
    pub fn data(&self) -> RwLockReadGuard<'_, Box<[u8]>> {
        self.data.read()
    }

    /// Acquire write lock on the bytes.
    ///
    /// This does not mark the page dirty; callers do that explicitly.
    #[inline]
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, Box<[u8]>> {
        self.data.write()
    }

    // ========================================================================
    // Dirty flag operations (Atomic)
    // ========================================================================

    /// Mark the page as modified.
    #[inline]
    pub fn mark_dirty(&self) {
        self.dirty.store(true, Ordering::Release);
    }

    /// Clear the dirty flag.
    #[inline]
    pub fn clear_dirty(&self) {
        self.dirty.store(false, Ordering::Release);
    }

    /// Check if the page is dirty.
    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty.load(Ordering::Acquire)
    }
}

impl std::fmt::Debug for Page {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Page")
            .field("id", &self.id)
            .field("dirty", &self.is_dirty())
            .finish()
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn create_test_page() -> Page {
        Page::new(PageId::new(3), vec![0u8; PAGE_SIZE].into_boxed_slice())
    }

    #[test]
    fn test_page_new() {
        let page = create_test_page();
        assert_eq!(page.id(), PageId::new(3));
        assert_eq!(page.data().len(), PAGE_SIZE);
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_page_read_write() {
        let page = create_test_page();
        {
            let mut data = page.data_mut();
            data[0] = 0xFF;
            data[PAGE_SIZE - 1] = 0xCD;
        }

        assert_eq!(page.data()[0], 0xFF);
        assert_eq!(page.data()[PAGE_SIZE - 1], 0xCD);
        // Writing alone does not dirty the page
        assert!(!page.is_dirty());
    }

    #[test]
    fn test_dirty_flag() {
        let page = create_test_page();
        page.mark_dirty();
        assert!(page.is_dirty());
        page.clear_dirty();
        assert!(!page.is_dirty());
    }
}
