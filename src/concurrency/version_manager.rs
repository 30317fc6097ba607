//! Version Manager - MVCC reads, writes and deletes over the data manager.
//!
//! Every row is an [`Entry`] carrying the xid that created it and the xid
//! that deleted it. Deletion only stamps `xmax`; nothing is physically
//! removed. Deleting takes an exclusive row lock from the [`LockTable`],
//! held until the transaction ends.
//!
//! # Automatic Aborts
//! A delete that would deadlock, or that would overwrite a version deleted
//! by a transaction a repeatable-read reader cannot see, aborts the
//! deleting transaction on the spot. The error is returned once; every
//! later call for that xid (except `abort`) fails with
//! `Error::DeadTransaction`.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info};

use crate::buffer::{CacheBacking, RefCountedCache};
use crate::common::config::SUPER_XID;
use crate::common::{Error, Result, Uid, Xid};
use crate::storage::DataManager;

use super::entry::{wrap_entry_raw, Entry};
use super::transaction::{AbortCause, IsolationLevel, Transaction};
use super::visibility;
use super::{LockTable, TransactionManager};

/// Loads entries through the data manager; `None` marks an invalidated
/// item.
struct EntryLoader {
    dm: Arc<DataManager>,
}

impl CacheBacking<Option<Arc<Entry>>> for EntryLoader {
    fn load(&self, key: u64) -> Result<Option<Arc<Entry>>> {
        Ok(Entry::load(&self.dm, Uid(key))?.map(Arc::new))
    }

    fn evict(&self, _key: u64, entry: Option<Arc<Entry>>) -> Result<()> {
        match entry {
            Some(entry) => entry.remove(&self.dm),
            None => Ok(()),
        }
    }
}

/// An entry reference that goes back to the cache on drop.
struct CachedEntry<'a> {
    entries: &'a RefCountedCache<Option<Arc<Entry>>, EntryLoader>,
    uid: Uid,
    entry: Option<Arc<Entry>>,
}

impl CachedEntry<'_> {
    fn get(&self) -> Option<&Entry> {
        self.entry.as_deref()
    }
}

impl Drop for CachedEntry<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.entries.release(self.uid.0) {
            error!(uid = %self.uid, error = %err, "version.release.failed");
        }
    }
}

/// Transactional row access.
///
/// # Thread Safety
/// - `active`: `Mutex` over the running-transaction table, held across
///   `begin` so snapshots and xid allocation agree
/// - `locks`: see [`LockTable`]; callers may block inside `delete`
/// - `entries`: reference-counted cache, internally synchronized
pub struct VersionManager {
    tm: Arc<TransactionManager>,
    dm: Arc<DataManager>,
    entries: RefCountedCache<Option<Arc<Entry>>, EntryLoader>,
    active: Mutex<HashMap<Xid, Arc<Transaction>>>,
    locks: LockTable,
}

impl VersionManager {
    pub fn new(tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        let mut active = HashMap::new();
        active.insert(
            SUPER_XID,
            Arc::new(Transaction::new(SUPER_XID, IsolationLevel::ReadCommitted, [])),
        );

        Self {
            entries: RefCountedCache::new(
                0,
                EntryLoader {
                    dm: Arc::clone(&dm),
                },
            ),
            tm,
            dm,
            active: Mutex::new(active),
            locks: LockTable::new(),
        }
    }

    // ========================================================================
    // Public API: Transactions
    // ========================================================================

    /// Start a transaction.
    ///
    /// A repeatable-read transaction snapshots the set of xids active right
    /// now.
    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        let mut active = self.active.lock();
        let xid = self.tm.begin()?;
        let t = Transaction::new(xid, level, active.keys().copied());
        active.insert(xid, Arc::new(t));

        debug!(xid, ?level, "txn.begin");
        Ok(xid)
    }

    /// Commit `xid` and release its row locks.
    ///
    /// # Errors
    /// - `Error::DeadTransaction` if the engine already aborted it
    /// - `Error::UnknownTransaction` if it isn't running
    pub fn commit(&self, xid: Xid) -> Result<()> {
        let t = self.transaction(xid)?;
        t.check_alive()?;

        self.active.lock().remove(&xid);
        // Waiters woken below must already see the commit
        self.tm.commit(xid)?;
        self.locks.remove(xid);

        debug!(xid, "txn.commit");
        Ok(())
    }

    /// Abort `xid` and release its row locks.
    ///
    /// Also the way to retire a transaction the engine aborted on its own.
    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.abort_internal(xid, false)
    }

    fn abort_internal(&self, xid: Xid, auto: bool) -> Result<()> {
        let t = {
            let mut active = self.active.lock();
            let t = active
                .get(&xid)
                .cloned()
                .ok_or(Error::UnknownTransaction(xid))?;
            if !auto {
                active.remove(&xid);
            }
            t
        };

        if t.is_auto_aborted() {
            return Ok(());
        }
        self.locks.remove(xid);
        self.tm.abort(xid)?;

        debug!(xid, auto, "txn.abort");
        Ok(())
    }

    fn fail(&self, t: &Transaction, cause: AbortCause) -> Result<()> {
        t.set_failure(cause);
        self.abort_internal(t.xid(), true)?;
        t.set_auto_aborted();

        info!(xid = t.xid(), ?cause, "txn.auto_abort");
        Ok(())
    }

    fn transaction(&self, xid: Xid) -> Result<Arc<Transaction>> {
        self.active
            .lock()
            .get(&xid)
            .cloned()
            .ok_or(Error::UnknownTransaction(xid))
    }

    // ========================================================================
    // Public API: Rows
    // ========================================================================

    /// Read the row at `uid` as `xid` sees it.
    ///
    /// Returns None if the row is invalid or not visible to `xid`.
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        let t = self.transaction(xid)?;
        t.check_alive()?;

        let cached = self.acquire_entry(uid)?;
        let Some(entry) = cached.get() else {
            return Ok(None);
        };
        if visibility::is_visible(&self.tm, &t, entry)? {
            Ok(Some(entry.data()))
        } else {
            Ok(None)
        }
    }

    /// Store a new row created by `xid`.
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        let t = self.transaction(xid)?;
        t.check_alive()?;

        self.dm.insert(xid, &wrap_entry_raw(xid, data))
    }

    /// Delete the row at `uid` on behalf of `xid`.
    ///
    /// Returns false if the row isn't visible to `xid` or `xid` already
    /// deleted it. May block while another transaction holds the row.
    ///
    /// # Errors
    /// - `Error::Deadlock` if waiting for the row would deadlock; `xid` is
    ///   aborted
    /// - `Error::ConcurrentUpdate` if a transaction invisible to `xid`
    ///   already deleted the row; `xid` is aborted
    /// - `Error::DeadTransaction` if `xid` was aborted earlier, or is
    ///   aborted while blocked on the row
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        let t = self.transaction(xid)?;
        t.check_alive()?;

        let cached = self.acquire_entry(uid)?;
        let Some(entry) = cached.get() else {
            return Ok(false);
        };
        if !visibility::is_visible(&self.tm, &t, entry)? {
            return Ok(false);
        }

        match self.locks.add(xid, uid) {
            Ok(Some(waiter)) => {
                waiter.wait()?;
                if !self.active.lock().contains_key(&xid) {
                    return Err(Error::DeadTransaction(xid));
                }
            }
            Ok(None) => {}
            Err(Error::Deadlock) => {
                self.fail(&t, AbortCause::Deadlock)?;
                return Err(Error::Deadlock);
            }
            Err(err) => return Err(err),
        }

        if entry.xmax() == xid {
            return Ok(false);
        }
        if visibility::is_version_skip(&self.tm, &t, entry)? {
            self.fail(&t, AbortCause::ConcurrentUpdate)?;
            return Err(Error::ConcurrentUpdate);
        }

        entry.set_xmax(&self.dm, xid)?;
        Ok(true)
    }

    // ========================================================================
    // Public API: Lifecycle
    // ========================================================================

    /// Release every cached entry back to the data manager.
    pub fn close(&self) -> Result<()> {
        self.entries.shutdown()
    }

    /// Number of running transactions, the super transaction included.
    pub fn active_count(&self) -> usize {
        self.active.lock().len()
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        &self.tm
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.dm
    }

    fn acquire_entry(&self, uid: Uid) -> Result<CachedEntry<'_>> {
        let entry = self.entries.acquire(uid.0)?;
        Ok(CachedEntry {
            entries: &self.entries,
            uid,
            entry,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
