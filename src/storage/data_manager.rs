//! Data Manager - record-level storage over pages, log and free-space index.
//!
//! The [`DataManager`] provides:
//! - `insert`: log-first append of a record into a page with room
//! - `read`: cached, reference-counted access to records by uid
//! - update logging for the [`DataItem`] before/after protocol
//! - open-time recovery and free-space index rebuild

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{debug, info};

use crate::buffer::{CacheBacking, PageStore, RefCountedCache};
use crate::common::config::{path_with_suffix, DB_SUFFIX, INSERT_RETRIES, LOG_SUFFIX};
use crate::common::{DbOptions, Error, PageId, Result, Uid, Xid};
use crate::concurrency::TransactionManager;
use crate::recovery::{self, LogRecord, Wal};

use super::data_item::{wrap_raw, DataItem, ItemRef};
use super::free_space::{FreeSpaceIndex, PageInfo};
use super::page::{data_page, page_one, Page};
use super::disk_manager::{ensure_absent, DiskManager};

/// Loads items by pinning their page; evicting an item unpins it.
struct ItemLoader {
    pages: Arc<PageStore>,
}

impl CacheBacking<Arc<DataItem>> for ItemLoader {
    fn load(&self, key: u64) -> Result<Arc<DataItem>> {
        let uid = Uid(key);
        let page = self.pages.pin(uid.page_id())?;
        match DataItem::parse(uid, page) {
            Ok(item) => Ok(Arc::new(item)),
            Err(err) => {
                self.pages.unpin(uid.page_id())?;
                Err(err)
            }
        }
    }

    fn evict(&self, _key: u64, item: Arc<DataItem>) -> Result<()> {
        self.pages.unpin(item.uid().page_id())
    }
}

/// Record storage for one database.
///
/// # Architecture
/// ```text
/// ┌──────────────────────────────────────────────────────┐
/// │                    DataManager                       │
/// │  ┌────────────────┐  ┌──────────┐  ┌──────────────┐  │
/// │  │ items cache    │  │   wal    │  │ free_space   │  │
/// │  │ uid → DataItem │  │  (.log)  │  │ 41 buckets   │  │
/// │  └───────┬────────┘  └──────────┘  └──────────────┘  │
/// │          │ pins                                      │
/// │  ┌───────▼────────────────────────────────────────┐  │
/// │  │ PageStore (.db)          page 1 pinned for life│  │
/// │  └────────────────────────────────────────────────┘  │
/// └──────────────────────────────────────────────────────┘
/// ```
///
/// # Thread Safety
/// All components synchronize internally; `DataManager` is `Send + Sync`
/// and meant to be shared behind an `Arc`.
pub struct DataManager {
    pages: Arc<PageStore>,
    wal: Wal,
    items: RefCountedCache<Arc<DataItem>, ItemLoader>,
    free_space: FreeSpaceIndex,
    /// Page 1, holding the clean-shutdown marker.
    page_one: Arc<Page>,
    closed: AtomicBool,
}

impl DataManager {
    /// Create `<base>.db` and `<base>.log`.
    ///
    /// # Errors
    /// - `Error::FileExists` if either file exists
    /// - `Error::MemoryTooSmall` if the memory budget is below the minimum
    pub fn create(base: &Path, options: &DbOptions) -> Result<Self> {
        // Nothing is written until both files are known to be free
        options.check_memory()?;
        let db_path = path_with_suffix(base, DB_SUFFIX);
        ensure_absent(&path_with_suffix(base, LOG_SUFFIX))?;
        ensure_absent(&db_path)?;

        let disk_manager = DiskManager::create(db_path)?;
        let pages = Arc::new(PageStore::new(options.max_cached_pages(), disk_manager)?);
        let wal = Wal::create(path_with_suffix(base, LOG_SUFFIX))?;

        let first = pages.allocate(&page_one::init_raw())?;
        debug_assert_eq!(first, PageId::FIRST);
        let page_one = pages.pin(PageId::FIRST)?;

        info!(base = %base.display(), "data_manager.create");
        Ok(Self::assemble(pages, wal, page_one))
    }

    /// Open `<base>.db` and `<base>.log`, recovering if the last session
    /// didn't close cleanly.
    ///
    /// # Errors
    /// - `Error::FileNotFound` if either file is missing
    /// - `Error::CorruptLogFile` if the log fails validation
    /// - `Error::MemoryTooSmall` if the memory budget is below the minimum
    pub fn open(base: &Path, options: &DbOptions, tm: &TransactionManager) -> Result<Self> {
        let disk_manager = DiskManager::open(path_with_suffix(base, DB_SUFFIX))?;
        let pages = Arc::new(PageStore::new(options.max_cached_pages(), disk_manager)?);
        let wal = Wal::open(path_with_suffix(base, LOG_SUFFIX))?;

        let page_one = pages.pin(PageId::FIRST)?;
        if !page_one::is_clean(&page_one) {
            recovery::recover(tm, &wal, &pages)?;
        }

        let dm = Self::assemble(pages, wal, page_one);
        dm.fill_free_space()?;

        page_one::set_open(&dm.page_one);
        dm.pages.flush(&dm.page_one)?;

        info!(
            base = %base.display(),
            pages = dm.pages.page_count(),
            "data_manager.open"
        );
        Ok(dm)
    }

    fn assemble(pages: Arc<PageStore>, wal: Wal, page_one: Arc<Page>) -> Self {
        Self {
            items: RefCountedCache::new(
                0,
                ItemLoader {
                    pages: Arc::clone(&pages),
                },
            ),
            pages,
            wal,
            free_space: FreeSpaceIndex::new(),
            page_one,
            closed: AtomicBool::new(false),
        }
    }

    fn fill_free_space(&self) -> Result<()> {
        for pgno in 2..=self.pages.page_count() {
            let page = self.pages.fetch(PageId::new(pgno))?;
            self.free_space.add(page.page_id(), data_page::free_space(&page));
        }
        debug!(indexed = self.free_space.len(), "data_manager.free_space.filled");
        Ok(())
    }

    // ========================================================================
    // Public API: Records
    // ========================================================================

    /// Store `data` as a new record written by `xid` and return its uid.
    ///
    /// # Errors
    /// - `Error::DataTooLarge` if the record can't fit in an empty page
    /// - `Error::DatabaseBusy` if no page could be claimed within the retry
    ///   budget
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let raw = wrap_raw(data);
        if raw.len() > data_page::MAX_FREE_SPACE {
            return Err(Error::DataTooLarge {
                size: raw.len(),
                max: data_page::MAX_FREE_SPACE,
            });
        }

        let info = self.claim_page(raw.len())?;

        let result = self.insert_into(xid, info.page_id, &raw);
        match &result {
            Ok((_, free)) => self.free_space.add(info.page_id, *free),
            Err(_) => self.free_space.add(info.page_id, info.free_space),
        }
        result.map(|(uid, _)| uid)
    }

    /// Take a page with room for `needed` bytes out of the free-space index,
    /// allocating fresh pages when none qualifies.
    fn claim_page(&self, needed: usize) -> Result<PageInfo> {
        let mut short = Vec::new();
        let claimed = self.try_claim_page(needed, &mut short);

        // Top-bucket pages too small for this record go back for others
        for info in short {
            self.free_space.add(info.page_id, info.free_space);
        }
        claimed
    }

    fn try_claim_page(&self, needed: usize, short: &mut Vec<PageInfo>) -> Result<PageInfo> {
        for _ in 0..INSERT_RETRIES {
            match self.free_space.select(needed) {
                Some(info) if info.free_space >= needed => return Ok(info),
                Some(info) => short.push(info),
                None => {}
            }
            let page_id = self.pages.allocate(&data_page::init_raw())?;
            self.free_space.add(page_id, data_page::MAX_FREE_SPACE);
        }
        Err(Error::DatabaseBusy)
    }

    fn insert_into(&self, xid: Xid, page_id: PageId, raw: &[u8]) -> Result<(Uid, usize)> {
        let page = self.pages.fetch(page_id)?;

        let offset = data_page::free_offset(&page);
        self.wal
            .append(&LogRecord::encode_insert(xid, page_id, offset, raw))?;

        let offset = data_page::insert(&page, raw);
        Ok((Uid::from_parts(page_id, offset), data_page::free_space(&page)))
    }

    /// Look up a live record.
    ///
    /// Returns None if the record has been logically deleted.
    ///
    /// # Errors
    /// - `Error::InvalidUid` if `uid` doesn't address a record
    /// - `Error::PageNotFound` if its page doesn't exist
    pub fn read(&self, uid: Uid) -> Result<Option<ItemRef<'_>>> {
        let item = self.acquire_item(uid)?;
        let item = ItemRef::new(self, item);
        if !item.is_valid() {
            return Ok(None);
        }
        Ok(Some(item))
    }

    /// Take a reference to the item at `uid`, valid or not.
    pub(crate) fn acquire_item(&self, uid: Uid) -> Result<Arc<DataItem>> {
        self.items.acquire(uid.0)
    }

    /// Return a reference taken by [`acquire_item`](Self::acquire_item).
    pub(crate) fn release_item(&self, uid: Uid) -> Result<()> {
        self.items.release(uid.0)
    }

    /// Append an update record for an in-place item edit.
    pub fn log_update(&self, xid: Xid, uid: Uid, old_raw: &[u8], new_raw: &[u8]) -> Result<()> {
        self.wal
            .append(&LogRecord::encode_update(xid, uid, old_raw, new_raw))
    }

    // ========================================================================
    // Public API: Lifecycle and info
    // ========================================================================

    /// Write everything back and mark the shutdown clean.
    ///
    /// Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.items.shutdown()?;
        page_one::set_closed(&self.page_one);
        self.pages.flush(&self.page_one)?;
        self.pages.unpin(PageId::FIRST)?;
        self.pages.shutdown()?;

        info!("data_manager.close");
        Ok(())
    }

    /// The underlying page cache.
    pub fn page_store(&self) -> &PageStore {
        &self.pages
    }

    /// The write-ahead log.
    pub fn wal(&self) -> &Wal {
        &self.wal
    }

    /// Number of pages currently in the free-space index.
    pub fn indexed_pages(&self) -> usize {
        self.free_space.len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
