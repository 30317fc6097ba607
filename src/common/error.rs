//! Error types for tidedb.

use std::path::PathBuf;

use thiserror::Error;

use super::Xid;

/// Convenient Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

/// All possible errors in tidedb.
///
/// Startup integrity failures (`CorruptLogFile`, `CorruptXidFile`,
/// `MemoryTooSmall`, `FileExists`, `FileNotFound`) are only returned from
/// the `create`/`open` paths; no engine instance is built when they occur.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O error from disk operations.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Requested page does not exist in the page file.
    #[error("Page {0} not found")]
    PageNotFound(u32),

    /// A uid that does not address a record inside its page.
    #[error("Invalid uid: {0:#x}")]
    InvalidUid(u64),

    /// A bounded cache is full and every resident entry is referenced.
    #[error("Cache is full")]
    CacheFull,

    /// The memory budget cannot hold the minimum number of pages.
    #[error("Memory budget too small: {pages} pages, need at least {min}")]
    MemoryTooSmall { pages: usize, min: usize },

    /// The record cannot fit in a single page.
    #[error("Record too large: {size} bytes, at most {max} fit in a page")]
    DataTooLarge { size: usize, max: usize },

    /// No page with enough free space was found within the retry budget.
    #[error("Database is busy")]
    DatabaseBusy,

    /// The log header checksum does not match its records.
    #[error("Corrupt log file")]
    CorruptLogFile,

    /// The transaction status file length does not match its counter.
    #[error("Corrupt xid file")]
    CorruptXidFile,

    /// Create was asked for a file that already exists.
    #[error("File already exists: {}", .0.display())]
    FileExists(PathBuf),

    /// Open was asked for a file that does not exist.
    #[error("File not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// The transaction lost deadlock detection and was aborted.
    #[error("Deadlock detected")]
    Deadlock,

    /// The transaction tried to overwrite a version it cannot see.
    #[error("Concurrent update")]
    ConcurrentUpdate,

    /// The transaction was aborted by the engine and can only be aborted.
    #[error("Transaction {0} is dead")]
    DeadTransaction(Xid),

    /// No active transaction with this xid.
    #[error("Unknown transaction {0}")]
    UnknownTransaction(Xid),

    /// The key is reserved as the index's upper bound.
    #[error("Key {0} is reserved")]
    ReservedKey(i64),
}
