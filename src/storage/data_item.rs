//! Data items - records stored inside data pages.
//!
//! # Item Layout
//! ```text
//! ┌───────────┬──────────┬──────────────────┐
//! │ valid (1) │ size (2) │ payload (size)   │
//! └───────────┴──────────┴──────────────────┘
//! ```
//! `valid` is 0 for a live item and 1 for a logically deleted one. The size
//! is little-endian.
//!
//! # Update Protocol
//! Every in-place change goes through [`DataItem::before`], which returns an
//! [`ItemUpdate`]. Committing it with [`ItemUpdate::after`] writes an update
//! record to the log; dropping it without `after` puts the old bytes back.

use std::ops::Deref;
use std::sync::Arc;

use parking_lot::{
    MappedRwLockReadGuard, MappedRwLockWriteGuard, RwLock, RwLockReadGuard, RwLockWriteGuard,
};
use tracing::error;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, Result, Uid, Xid};
use crate::storage::page::data_page;
use crate::storage::page::Page;
use crate::storage::DataManager;

const OFFSET_VALID: usize = 0;
const OFFSET_SIZE: usize = OFFSET_VALID + 1;
const OFFSET_DATA: usize = OFFSET_SIZE + 2;

/// Bytes an item needs on top of its payload.
pub const ITEM_HEADER_SIZE: usize = OFFSET_DATA;

/// Wrap a payload into the raw item layout, marked valid.
pub fn wrap_raw(data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OFFSET_DATA + data.len());
    raw.push(0);
    raw.extend_from_slice(&(data.len() as u16).to_le_bytes());
    raw.extend_from_slice(data);
    raw
}

/// Flag a raw item as deleted.
pub fn set_raw_invalid(raw: &mut [u8]) {
    raw[OFFSET_VALID] = 1;
}

/// One record, viewed in place inside its page.
///
/// An item keeps its page pinned for as long as it lives in the data
/// manager's item cache.
///
/// # Thread Safety
/// - page bytes: the page's own `RwLock`, taken briefly per access
/// - `latch`: readers-writer lock over the item as a whole, held across a
///   whole read or a whole `before`/`after` edit
pub struct DataItem {
    uid: Uid,
    page: Arc<Page>,
    /// Start of the raw item inside the page.
    start: usize,
    /// Length of the raw item, header included.
    len: usize,
    latch: RwLock<()>,
}

impl DataItem {
    /// Parse the item at `uid` out of its (already pinned) page.
    ///
    /// # Errors
    /// Returns `Error::InvalidUid` if the uid doesn't address a whole item
    /// inside the page.
    pub(crate) fn parse(uid: Uid, page: Arc<Page>) -> Result<Self> {
        let start = uid.offset() as usize;
        if start < data_page::HEADER_SIZE || start + OFFSET_DATA > PAGE_SIZE {
            return Err(Error::InvalidUid(uid.0));
        }

        let size = {
            let data = page.data();
            u16::from_le_bytes([data[start + OFFSET_SIZE], data[start + OFFSET_SIZE + 1]]) as usize
        };
        let len = OFFSET_DATA + size;
        if start + len > PAGE_SIZE {
            return Err(Error::InvalidUid(uid.0));
        }

        Ok(Self {
            uid,
            page,
            start,
            len,
            latch: RwLock::new(()),
        })
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Whether the item is live (not logically deleted).
    pub fn is_valid(&self) -> bool {
        self.page.data()[self.start + OFFSET_VALID] == 0
    }

    /// Payload length in bytes.
    #[inline]
    pub fn data_len(&self) -> usize {
        self.len - OFFSET_DATA
    }

    /// Borrow the payload.
    ///
    /// Holds the page's read lock until the guard drops; keep it short.
    pub fn data(&self) -> MappedRwLockReadGuard<'_, [u8]> {
        let range = self.start + OFFSET_DATA..self.start + self.len;
        RwLockReadGuard::map(self.page.data(), |data| &data[range])
    }

    /// Copy the whole raw item, header included.
    pub fn raw(&self) -> Vec<u8> {
        self.page.data()[self.start..self.start + self.len].to_vec()
    }

    /// Run `f` over the payload while holding the item's read latch.
    pub fn read_data<R>(&self, f: impl FnOnce(&[u8]) -> R) -> R {
        let _latch = self.latch.read();
        f(&self.data())
    }

    /// Shared latch over the item.
    pub fn r_lock(&self) -> RwLockReadGuard<'_, ()> {
        self.latch.read()
    }

    /// Exclusive latch over the item.
    pub fn lock(&self) -> RwLockWriteGuard<'_, ()> {
        self.latch.write()
    }

    /// Start an in-place edit.
    ///
    /// Takes the exclusive latch, marks the page dirty and snapshots the
    /// current bytes.
    pub fn before<'a>(&'a self, dm: &'a DataManager) -> ItemUpdate<'a> {
        let latch = self.latch.write();
        self.page.mark_dirty();
        let old_raw = self.raw();
        ItemUpdate {
            item: self,
            dm,
            old_raw,
            finished: false,
            _latch: latch,
        }
    }

    fn write_raw(&self, raw: &[u8]) {
        self.page.data_mut()[self.start..self.start + self.len].copy_from_slice(raw);
    }
}

impl std::fmt::Debug for DataItem {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataItem")
            .field("uid", &self.uid)
            .field("len", &self.len)
            .finish()
    }
}

/// An in-progress edit of a [`DataItem`], holding its exclusive latch.
///
/// Finish with [`after`](Self::after). Dropping the update without calling
/// `after`, or when `after` fails, restores the snapshotted bytes.
pub struct ItemUpdate<'a> {
    item: &'a DataItem,
    dm: &'a DataManager,
    old_raw: Vec<u8>,
    finished: bool,
    _latch: RwLockWriteGuard<'a, ()>,
}

impl ItemUpdate<'_> {
    /// Borrow the payload mutably.
    ///
    /// Holds the page's write lock until the guard drops. Do not call into
    /// the data manager while holding it.
    pub fn data_mut(&self) -> MappedRwLockWriteGuard<'_, [u8]> {
        let range = self.item.start + OFFSET_DATA..self.item.start + self.item.len;
        RwLockWriteGuard::map(self.item.page.data_mut(), |data| &mut data[range])
    }

    /// The item's bytes as they were when the edit started.
    pub fn old_raw(&self) -> &[u8] {
        &self.old_raw
    }

    /// Log the edit under `xid` and release the latch.
    ///
    /// # Errors
    /// Any log write error. The edit is rolled back in that case.
    pub fn after(mut self, xid: Xid) -> Result<()> {
        let new_raw = self.item.raw();
        self.dm
            .log_update(xid, self.item.uid, &self.old_raw, &new_raw)?;
        self.finished = true;
        Ok(())
    }

    /// Abandon the edit, restoring the old bytes.
    pub fn un_before(self) {}
}

impl Drop for ItemUpdate<'_> {
    fn drop(&mut self) {
        if !self.finished {
            self.item.write_raw(&self.old_raw);
        }
    }
}

/// A data item borrowed from the data manager's cache.
///
/// Dereferences to [`DataItem`] and returns the item to the cache on drop.
pub struct ItemRef<'a> {
    dm: &'a DataManager,
    item: Arc<DataItem>,
}

impl<'a> ItemRef<'a> {
    pub(crate) fn new(dm: &'a DataManager, item: Arc<DataItem>) -> Self {
        Self { dm, item }
    }

    /// Start an in-place edit, logging through the owning data manager.
    pub fn before(&self) -> ItemUpdate<'_> {
        self.item.before(self.dm)
    }
}

impl Deref for ItemRef<'_> {
    type Target = DataItem;

    #[inline]
    fn deref(&self) -> &DataItem {
        &self.item
    }
}

impl Drop for ItemRef<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.dm.release_item(self.item.uid) {
            error!(uid = %self.item.uid, error = %err, "data_item.release.failed");
        }
    }
}
