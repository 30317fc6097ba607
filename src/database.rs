//! Database - one engine instance over `<base>.xid`, `<base>.db` and
//! `<base>.log`.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::{error, info, warn};

use crate::common::config::{path_with_suffix, DB_SUFFIX, LOG_SUFFIX, XID_SUFFIX};
use crate::common::{DbOptions, Result, Uid, Xid};
use crate::concurrency::{IsolationLevel, TransactionManager, VersionManager};
use crate::index::BPlusTree;
use crate::storage::{ensure_absent, DataManager};

/// An open database.
///
/// Closing writes every cached page back and marks the shutdown clean.
/// Dropping an open database closes it; a database that is never closed
/// (process crash) is recovered on the next `open`.
///
/// # Example
/// ```no_run
/// use tidedb::{Database, DbOptions, IsolationLevel};
///
/// let db = Database::create("/tmp/demo", &DbOptions::default())?;
/// let xid = db.begin(IsolationLevel::ReadCommitted)?;
/// let uid = db.insert(xid, b"hello")?;
/// db.commit(xid)?;
/// db.close()?;
///
/// let db = Database::open("/tmp/demo", &DbOptions::default())?;
/// let xid = db.begin(IsolationLevel::RepeatableRead)?;
/// assert_eq!(db.read(xid, uid)?.as_deref(), Some(&b"hello"[..]));
/// # Ok::<(), tidedb::Error>(())
/// ```
pub struct Database {
    base: PathBuf,
    vm: VersionManager,
    dm: Arc<DataManager>,
    closed: AtomicBool,
}

impl Database {
    /// Create a new database at `base`.
    ///
    /// # Errors
    /// - `Error::FileExists` if any of the three files exists
    /// - `Error::MemoryTooSmall` if the memory budget is below the minimum
    ///
    /// No file is left behind when creation fails.
    pub fn create<P: AsRef<Path>>(base: P, options: &DbOptions) -> Result<Self> {
        let base = base.as_ref();
        options.check_memory()?;
        for suffix in [XID_SUFFIX, DB_SUFFIX, LOG_SUFFIX] {
            ensure_absent(&path_with_suffix(base, suffix))?;
        }

        let xid_path = path_with_suffix(base, XID_SUFFIX);
        let tm = Arc::new(TransactionManager::create(&xid_path)?);
        let dm = match DataManager::create(base, options) {
            Ok(dm) => Arc::new(dm),
            Err(err) => {
                drop(tm);
                if let Err(cleanup) = fs::remove_file(&xid_path) {
                    warn!(path = %xid_path.display(), error = %cleanup, "database.create.cleanup_failed");
                }
                return Err(err);
            }
        };

        info!(base = %base.display(), "database.create");
        Ok(Self::assemble(base, tm, dm))
    }

    /// Open the database at `base`, recovering it if it wasn't closed.
    ///
    /// # Errors
    /// - `Error::FileNotFound` if any of the three files is missing
    /// - `Error::CorruptXidFile` or `Error::CorruptLogFile` on a damaged file
    /// - `Error::MemoryTooSmall` if the memory budget is below the minimum
    pub fn open<P: AsRef<Path>>(base: P, options: &DbOptions) -> Result<Self> {
        let base = base.as_ref();
        let tm = Arc::new(TransactionManager::open(path_with_suffix(base, XID_SUFFIX))?);
        let dm = Arc::new(DataManager::open(base, options, &tm)?);

        info!(base = %base.display(), xids = tm.counter(), "database.open");
        Ok(Self::assemble(base, tm, dm))
    }

    fn assemble(base: &Path, tm: Arc<TransactionManager>, dm: Arc<DataManager>) -> Self {
        Self {
            base: base.to_path_buf(),
            vm: VersionManager::new(tm, Arc::clone(&dm)),
            dm,
            closed: AtomicBool::new(false),
        }
    }

    // ========================================================================
    // Public API: Transactions and rows
    // ========================================================================

    pub fn begin(&self, level: IsolationLevel) -> Result<Xid> {
        self.vm.begin(level)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.vm.commit(xid)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.vm.abort(xid)
    }

    /// See [`VersionManager::read`].
    pub fn read(&self, xid: Xid, uid: Uid) -> Result<Option<Vec<u8>>> {
        self.vm.read(xid, uid)
    }

    /// See [`VersionManager::insert`].
    pub fn insert(&self, xid: Xid, data: &[u8]) -> Result<Uid> {
        self.vm.insert(xid, data)
    }

    /// See [`VersionManager::delete`].
    pub fn delete(&self, xid: Xid, uid: Uid) -> Result<bool> {
        self.vm.delete(xid, uid)
    }

    // ========================================================================
    // Public API: Indexes
    // ========================================================================

    /// Create an empty B+Tree and return its boot uid.
    pub fn create_index(&self) -> Result<Uid> {
        BPlusTree::create(&self.dm)
    }

    /// Open the B+Tree booted at `boot_uid`.
    pub fn index(&self, boot_uid: Uid) -> Result<BPlusTree<'_>> {
        BPlusTree::load(&self.dm, boot_uid)
    }

    // ========================================================================
    // Public API: Lifecycle
    // ========================================================================

    /// Close the database. Closing twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        self.vm.close()?;
        self.dm.close()?;

        info!(base = %self.base.display(), "database.close");
        Ok(())
    }

    #[inline]
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub fn version_manager(&self) -> &VersionManager {
        &self.vm
    }

    pub fn data_manager(&self) -> &DataManager {
        &self.dm
    }

    pub fn transaction_manager(&self) -> &TransactionManager {
        self.vm.transaction_manager()
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            error!(base = %self.base.display(), error = %err, "database.close.failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::Error;
    use tempfile::tempdir;

    fn test_options() -> DbOptions {
        DbOptions::default().memory(1 << 20)
    }

    #[test]
    fn test_create_then_open() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("db");

        let uid = {
            let db = Database::create(&base, &test_options()).unwrap();
            let xid = db.begin(IsolationLevel::ReadCommitted).unwrap();
            let uid = db.insert(xid, b"hello").unwrap();
            db.commit(xid).unwrap();
            db.close().unwrap();
            uid
        };

        let db = Database::open(&base, &test_options()).unwrap();
        let xid = db.begin(IsolationLevel::RepeatableRead).unwrap();
        assert_eq!(db.read(xid, uid).unwrap().as_deref(), Some(&b"hello"[..]));
    }

    #[test]
    fn test_create_twice_fails() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("db");
        let _db = Database::create(&base, &test_options()).unwrap();

        assert!(matches!(
            Database::create(&base, &test_options()),
            Err(Error::FileExists(_))
        ));
    }

    #[test]
    fn test_failed_create_can_be_retried() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("db");
        let xid_path = path_with_suffix(&base, XID_SUFFIX);

        let small = DbOptions::default().memory(4096);
        assert!(matches!(Database::create(&base, &small), Err(Error::MemoryTooSmall { .. })));
        assert!(!xid_path.exists());

        // A stray page file blocks creation before anything is written
        let db_path = path_with_suffix(&base, DB_SUFFIX);
        fs::write(&db_path, b"").unwrap();
        assert!(matches!(Database::create(&base, &test_options()), Err(Error::FileExists(_))));
        assert!(!xid_path.exists());

        fs::remove_file(&db_path).unwrap();
        let db = Database::create(&base, &test_options()).unwrap();
        let xid = db.begin(IsolationLevel::ReadCommitted).unwrap();
        db.commit(xid).unwrap();
    }

    #[test]
    fn test_open_missing_fails() {
        let dir = tempdir().unwrap();
        assert!(matches!(
            Database::open(dir.path().join("absent"), &test_options()),
            Err(Error::FileNotFound(_))
        ));
    }

    #[test]
    fn test_drop_closes_cleanly() {
        let dir = tempdir().unwrap();
        let base = dir.path().join("db");
        {
            let db = Database::create(&base, &test_options()).unwrap();
            let xid = db.begin(IsolationLevel::ReadCommitted).unwrap();
            db.insert(xid, b"row").unwrap();
            db.commit(xid).unwrap();
        }

        let db = Database::open(&base, &test_options()).unwrap();
        assert!(db.close().is_ok());
        assert!(db.close().is_ok());
    }
}
