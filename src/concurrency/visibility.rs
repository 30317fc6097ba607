//! Version visibility rules.
//!
//! A version created by `xmin` and deleted by `xmax` (0 if live) is visible
//! to a transaction according to its isolation level:
//!
//! - Read-committed: its own live versions, plus versions whose creator has
//!   committed and whose deleter (if any) is neither the reader nor committed.
//! - Repeatable-read: its own live versions, plus versions whose creator
//!   committed before the reader began, unless the deleter also committed
//!   before the reader began.

use crate::common::{Result, Xid};

use super::{Entry, IsolationLevel, Transaction, TransactionManager};

/// Whether `entry` is visible to `t`.
pub fn is_visible(tm: &TransactionManager, t: &Transaction, entry: &Entry) -> Result<bool> {
    version_visible(tm, t, entry.xmin(), entry.xmax())
}

/// Whether deleting `entry` would overwrite a version `t` cannot see as
/// current: its deleter committed after `t` began.
///
/// Always false under read-committed.
pub fn is_version_skip(tm: &TransactionManager, t: &Transaction, entry: &Entry) -> Result<bool> {
    version_skipped(tm, t, entry.xmax())
}

pub(crate) fn version_visible(
    tm: &TransactionManager,
    t: &Transaction,
    xmin: Xid,
    xmax: Xid,
) -> Result<bool> {
    match t.level() {
        IsolationLevel::ReadCommitted => read_committed(tm, t, xmin, xmax),
        IsolationLevel::RepeatableRead => repeatable_read(tm, t, xmin, xmax),
    }
}

pub(crate) fn version_skipped(tm: &TransactionManager, t: &Transaction, xmax: Xid) -> Result<bool> {
    match t.level() {
        IsolationLevel::ReadCommitted => Ok(false),
        IsolationLevel::RepeatableRead => {
            Ok(tm.is_committed(xmax)? && (xmax > t.xid() || t.is_in_snapshot(xmax)))
        }
    }
}

fn read_committed(tm: &TransactionManager, t: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    let xid = t.xid();
    if xmin == xid && xmax == 0 {
        return Ok(true);
    }

    if tm.is_committed(xmin)? {
        if xmax == 0 {
            return Ok(true);
        }
        if xmax != xid && !tm.is_committed(xmax)? {
            return Ok(true);
        }
    }
    Ok(false)
}

fn repeatable_read(tm: &TransactionManager, t: &Transaction, xmin: Xid, xmax: Xid) -> Result<bool> {
    let xid = t.xid();
    if xmin == xid && xmax == 0 {
        return Ok(true);
    }

    if tm.is_committed(xmin)? && xmin < xid && !t.is_in_snapshot(xmin) {
        if xmax == 0 {
            return Ok(true);
        }
        if xmax != xid && (!tm.is_committed(xmax)? || xmax > xid || t.is_in_snapshot(xmax)) {
            return Ok(true);
        }
    }
    Ok(false)
}
