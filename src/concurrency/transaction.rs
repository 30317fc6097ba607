//! In-memory state of one running transaction.

use std::collections::HashSet;

use parking_lot::Mutex;

use crate::common::config::SUPER_XID;
use crate::common::{Error, Result, Xid};

/// How a transaction sees concurrent writers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IsolationLevel {
    /// Sees every version committed before each read.
    ReadCommitted,
    /// Sees only versions committed before the transaction began.
    RepeatableRead,
}

impl IsolationLevel {
    /// Map the numeric level used by callers: 0 is read-committed, anything
    /// else is repeatable-read.
    pub fn from_level(level: u8) -> Self {
        if level == 0 {
            IsolationLevel::ReadCommitted
        } else {
            IsolationLevel::RepeatableRead
        }
    }
}

/// Why the engine aborted a transaction on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AbortCause {
    Deadlock,
    ConcurrentUpdate,
}

#[derive(Debug, Default)]
struct TxnState {
    failure: Option<AbortCause>,
    auto_aborted: bool,
}

/// A running transaction.
///
/// The snapshot holds the xids that were active when it began and is only
/// filled for repeatable-read.
#[derive(Debug)]
pub struct Transaction {
    xid: Xid,
    level: IsolationLevel,
    snapshot: HashSet<Xid>,
    state: Mutex<TxnState>,
}

impl Transaction {
    pub fn new(xid: Xid, level: IsolationLevel, active: impl IntoIterator<Item = Xid>) -> Self {
        let snapshot = match level {
            IsolationLevel::ReadCommitted => HashSet::new(),
            IsolationLevel::RepeatableRead => active.into_iter().collect(),
        };
        Self {
            xid,
            level,
            snapshot,
            state: Mutex::new(TxnState::default()),
        }
    }

    #[inline]
    pub fn xid(&self) -> Xid {
        self.xid
    }

    #[inline]
    pub fn level(&self) -> IsolationLevel {
        self.level
    }

    /// Whether `xid` was active when this transaction began. The super xid
    /// never is.
    pub fn is_in_snapshot(&self, xid: Xid) -> bool {
        xid != SUPER_XID && self.snapshot.contains(&xid)
    }

    /// Fail with `Error::DeadTransaction` if the engine aborted this
    /// transaction.
    pub fn check_alive(&self) -> Result<()> {
        match self.state.lock().failure {
            Some(_) => Err(Error::DeadTransaction(self.xid)),
            None => Ok(()),
        }
    }

    pub fn failure(&self) -> Option<AbortCause> {
        self.state.lock().failure
    }

    pub(crate) fn set_failure(&self, cause: AbortCause) {
        self.state.lock().failure = Some(cause);
    }

    pub(crate) fn is_auto_aborted(&self) -> bool {
        self.state.lock().auto_aborted
    }

    pub(crate) fn set_auto_aborted(&self) {
        self.state.lock().auto_aborted = true;
    }
}
