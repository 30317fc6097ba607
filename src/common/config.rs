//! Configuration constants and open options for tidedb.

use std::ffi::OsString;
use std::path::{Path, PathBuf};

use super::{Error, Result, Xid};

/// Size of a page in bytes (8KB).
///
/// Every record lives inside exactly one page, so this is also the upper
/// bound on a single record (minus the page and record headers).
///
/// # Memory Layout
/// With 8KB pages and 32-bit page numbers starting at 1:
/// - Page `n` lives at file offset `(n - 1) × PAGE_SIZE`
/// - Max database size: 2^32 × 8KB = 32TB
pub const PAGE_SIZE: usize = 8192;

/// Fewest pages the page cache may hold. Opening with a smaller memory
/// budget fails with `Error::MemoryTooSmall`.
pub const MIN_CACHED_PAGES: usize = 10;

/// Number of free-space intervals a page is divided into.
///
/// The free-space index keeps `FREE_SPACE_INTERVALS + 1` buckets.
pub const FREE_SPACE_INTERVALS: usize = 40;

/// How many times an insert asks the free-space index for a page before
/// giving up with `Error::DatabaseBusy`.
pub const INSERT_RETRIES: usize = 5;

/// Seed of the multiplicative fold used for WAL checksums.
pub const LOG_CHECKSUM_SEED: u32 = 13331;

/// The reserved "super" transaction. Always committed, never active, and
/// never part of any snapshot. Index maintenance writes run under it.
pub const SUPER_XID: Xid = 0;

/// Suffix of the transaction status file.
pub const XID_SUFFIX: &str = ".xid";

/// Suffix of the write-ahead log.
pub const LOG_SUFFIX: &str = ".log";

/// Suffix of the page file.
pub const DB_SUFFIX: &str = ".db";

/// Keys per half node. A B+Tree node splits when it reaches twice this many.
pub const BALANCE_NUMBER: usize = 32;

/// Default memory budget for the page cache (64MB).
pub const DEFAULT_MEMORY: u64 = 64 * 1024 * 1024;

/// Options used when creating or opening a database.
///
/// # Example
/// ```
/// use tidedb::DbOptions;
///
/// let options = DbOptions::default().memory(1 << 20);
/// assert_eq!(options.max_cached_pages(), 128);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DbOptions {
    /// Memory budget for cached pages, in bytes.
    pub memory: u64,
}

impl DbOptions {
    /// Set the page-cache memory budget in bytes.
    pub fn memory(mut self, bytes: u64) -> Self {
        self.memory = bytes;
        self
    }

    /// Number of pages the memory budget translates to.
    #[inline]
    pub fn max_cached_pages(&self) -> usize {
        (self.memory / PAGE_SIZE as u64) as usize
    }

    /// Fail with `Error::MemoryTooSmall` if the budget can't hold
    /// [`MIN_CACHED_PAGES`] pages.
    pub fn check_memory(&self) -> Result<()> {
        let pages = self.max_cached_pages();
        if pages < MIN_CACHED_PAGES {
            return Err(Error::MemoryTooSmall {
                pages,
                min: MIN_CACHED_PAGES,
            });
        }
        Ok(())
    }
}

impl Default for DbOptions {
    fn default() -> Self {
        Self {
            memory: DEFAULT_MEMORY,
        }
    }
}

/// Append a file suffix to a database base path (`data/db` -> `data/db.log`).
pub fn path_with_suffix(base: &Path, suffix: &str) -> PathBuf {
    let mut path = OsString::from(base.as_os_str());
    path.push(suffix);
    PathBuf::from(path)
}
