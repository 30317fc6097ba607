//! Crash recovery.
//!
//! Runs once when a page file is opened after an unclean shutdown, before
//! anything else touches the pages:
//! 1. Truncate the page file to the highest page any log record mentions.
//! 2. Redo every record of a finished (committed or aborted) transaction.
//! 3. Undo, newest first, every record of a transaction that was still
//!    active, then mark it aborted.
//!
//! Redo and undo both write whole byte ranges at logged positions, so
//! applying either pass more than once leaves the same page bytes.

use std::collections::BTreeMap;
use std::fmt;

use tracing::{debug, info};

use crate::buffer::PageStore;
use crate::common::{Result, Xid};
use crate::concurrency::TransactionManager;
use crate::storage::data_item::set_raw_invalid;
use crate::storage::page::data_page;

use super::{LogRecord, Wal};

/// What a recovery run did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Page count the file was truncated to.
    pub truncated_to: u32,
    /// Records reapplied for finished transactions.
    pub redone: usize,
    /// Records rolled back for interrupted transactions.
    pub undone: usize,
    /// Transactions that were active at the crash, now aborted.
    pub aborted: Vec<Xid>,
}

impl fmt::Display for RecoveryReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "Recovery {{ truncated_to: {}, redone: {}, undone: {}, aborted: {:?} }}",
            self.truncated_to, self.redone, self.undone, self.aborted
        )
    }
}

/// Replay `wal` against `pages`.
pub fn recover(tm: &TransactionManager, wal: &Wal, pages: &PageStore) -> Result<RecoveryReport> {
    info!("recovery.start");

    let truncated_to = truncate_to_logged(wal, pages)?;
    let redone = redo(tm, wal, pages)?;
    debug!(redone, "recovery.redo.done");
    let (undone, aborted) = undo(tm, wal, pages)?;
    debug!(undone, aborted = aborted.len(), "recovery.undo.done");

    let report = RecoveryReport {
        truncated_to,
        redone,
        undone,
        aborted,
    };
    info!(%report, "recovery.done");
    Ok(report)
}

/// Drop pages past the highest page the log mentions (at least page 1).
fn truncate_to_logged(wal: &Wal, pages: &PageStore) -> Result<u32> {
    let mut max_page = 1;
    wal.rewind();
    while let Some(bytes) = wal.next()? {
        max_page = max_page.max(LogRecord::decode(&bytes)?.page_id().0);
    }

    pages.truncate_to(max_page)?;
    Ok(max_page)
}

/// Reapply every record whose transaction is no longer active.
///
/// Returns the number of records applied.
pub fn redo(tm: &TransactionManager, wal: &Wal, pages: &PageStore) -> Result<usize> {
    let mut redone = 0;
    wal.rewind();
    while let Some(bytes) = wal.next()? {
        let record = LogRecord::decode(&bytes)?;
        if tm.is_active(record.xid())? {
            continue;
        }

        let page = pages.fetch(record.page_id())?;
        match &record {
            LogRecord::Insert { offset, raw, .. } => {
                data_page::recover_insert(&page, raw, *offset);
            }
            LogRecord::Update { uid, new_raw, .. } => {
                data_page::recover_update(&page, new_raw, uid.offset());
            }
        }
        redone += 1;
    }
    Ok(redone)
}

/// Roll back every record of a still-active transaction and abort it.
///
/// Inserts are undone by flagging the item invalid; its bytes stay in the
/// page. Returns the number of records undone and the aborted xids.
pub fn undo(tm: &TransactionManager, wal: &Wal, pages: &PageStore) -> Result<(usize, Vec<Xid>)> {
    let mut pending: BTreeMap<Xid, Vec<LogRecord>> = BTreeMap::new();
    wal.rewind();
    while let Some(bytes) = wal.next()? {
        let record = LogRecord::decode(&bytes)?;
        if tm.is_active(record.xid())? {
            pending.entry(record.xid()).or_default().push(record);
        }
    }

    let mut undone = 0;
    let mut aborted = Vec::with_capacity(pending.len());
    for (xid, records) in pending {
        for record in records.into_iter().rev() {
            let page = pages.fetch(record.page_id())?;
            match record {
                LogRecord::Insert {
                    offset, mut raw, ..
                } => {
                    set_raw_invalid(&mut raw);
                    data_page::recover_insert(&page, &raw, offset);
                }
                LogRecord::Update { uid, old_raw, .. } => {
                    data_page::recover_update(&page, &old_raw, uid.offset());
                }
            }
            undone += 1;
        }

        tm.abort(xid)?;
        aborted.push(xid);
    }
    Ok((undone, aborted))
}
