//! Transaction Manager - durable transaction status table.
//!
//! # File Layout
//! ```text
//! ┌───────────────┬────────┬────────┬─────┬────────┐
//! │ counter (8)   │ xid 1  │ xid 2  │ ... │ xid N  │
//! └───────────────┴────────┴────────┴─────┴────────┘
//! ```
//! The counter is the highest xid handed out. Each xid owns one status byte
//! at `8 + (xid - 1)`. A file is valid only if its length is exactly
//! `8 + counter`.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info};

use crate::common::config::SUPER_XID;
use crate::common::{Error, Result, Xid};
use crate::storage::{create_new_file, open_existing_file};

const HEADER_SIZE: u64 = 8;

/// Durable state of one transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum XidStatus {
    Active = 0,
    Committed = 1,
    Aborted = 2,
}

impl XidStatus {
    fn from_byte(byte: u8) -> Result<Self> {
        match byte {
            0 => Ok(XidStatus::Active),
            1 => Ok(XidStatus::Committed),
            2 => Ok(XidStatus::Aborted),
            _ => Err(Error::CorruptXidFile),
        }
    }
}

struct XidFile {
    file: File,
    counter: u64,
}

impl XidFile {
    #[inline]
    fn position(xid: Xid) -> u64 {
        HEADER_SIZE + (xid - 1)
    }

    fn write_status(&mut self, xid: Xid, status: XidStatus) -> Result<()> {
        self.file.seek(SeekFrom::Start(Self::position(xid)))?;
        self.file.write_all(&[status as u8])?;
        self.file.sync_data()?;
        Ok(())
    }

    fn write_counter(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.counter.to_le_bytes())?;
        self.file.sync_data()?;
        Ok(())
    }

    fn check_known(&self, xid: Xid) -> Result<()> {
        if xid == SUPER_XID || xid > self.counter {
            return Err(Error::UnknownTransaction(xid));
        }
        Ok(())
    }
}

/// Hands out xids and records whether each one is active, committed or
/// aborted.
///
/// The reserved [`SUPER_XID`] has no status byte: it always reads as
/// committed and never as active or aborted.
///
/// # Thread Safety
/// One `Mutex` guards the file and the counter, so concurrent `begin`s never
/// hand out the same xid and the counter on disk never goes backwards.
pub struct TransactionManager {
    inner: Mutex<XidFile>,
}

impl TransactionManager {
    /// Create an empty status file.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = create_new_file(path.as_ref())?;
        let mut xids = XidFile { file, counter: 0 };
        xids.write_counter()?;

        info!(path = %path.as_ref().display(), "xid.create");
        Ok(Self {
            inner: Mutex::new(xids),
        })
    }

    /// Open an existing status file.
    ///
    /// # Errors
    /// - `Error::FileNotFound` if the file doesn't exist
    /// - `Error::CorruptXidFile` if the length doesn't match the counter
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = open_existing_file(path.as_ref())?;
        let len = file.metadata()?.len();
        if len < HEADER_SIZE {
            return Err(Error::CorruptXidFile);
        }

        let mut header = [0u8; HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;
        let counter = u64::from_le_bytes(header);

        if counter.checked_add(HEADER_SIZE) != Some(len) {
            return Err(Error::CorruptXidFile);
        }

        info!(counter, "xid.open");
        Ok(Self {
            inner: Mutex::new(XidFile { file, counter }),
        })
    }

    /// Start a new transaction and return its xid.
    ///
    /// The status byte and the counter are both synced before returning.
    pub fn begin(&self) -> Result<Xid> {
        let mut xids = self.inner.lock();
        let xid = xids.counter + 1;
        xids.write_status(xid, XidStatus::Active)?;
        xids.counter = xid;
        xids.write_counter()?;

        debug!(xid, "xid.begin");
        Ok(xid)
    }

    pub fn commit(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, XidStatus::Committed)
    }

    pub fn abort(&self, xid: Xid) -> Result<()> {
        self.set_status(xid, XidStatus::Aborted)
    }

    fn set_status(&self, xid: Xid, status: XidStatus) -> Result<()> {
        let mut xids = self.inner.lock();
        xids.check_known(xid)?;
        xids.write_status(xid, status)?;
        debug!(xid, ?status, "xid.set_status");
        Ok(())
    }

    /// Read the durable status of `xid`.
    ///
    /// # Errors
    /// Returns `Error::UnknownTransaction` for the super xid or an xid that
    /// was never handed out.
    pub fn status(&self, xid: Xid) -> Result<XidStatus> {
        let mut xids = self.inner.lock();
        xids.check_known(xid)?;

        let mut byte = [0u8; 1];
        xids.file.seek(SeekFrom::Start(XidFile::position(xid)))?;
        xids.file.read_exact(&mut byte)?;
        XidStatus::from_byte(byte[0])
    }

    pub fn is_active(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.status(xid)? == XidStatus::Active)
    }

    pub fn is_committed(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(true);
        }
        Ok(self.status(xid)? == XidStatus::Committed)
    }

    pub fn is_aborted(&self, xid: Xid) -> Result<bool> {
        if xid == SUPER_XID {
            return Ok(false);
        }
        Ok(self.status(xid)? == XidStatus::Aborted)
    }

    /// Highest xid handed out so far.
    pub fn counter(&self) -> u64 {
        self.inner.lock().counter
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use tempfile::tempdir;

    #[test]
    fn test_begin_commit_abort() {
        let dir = tempdir().unwrap();
        let tm = TransactionManager::create(dir.path().join("t.xid")).unwrap();

        let a = tm.begin().unwrap();
        let b = tm.begin().unwrap();
        assert_eq!((a, b), (1, 2));
        assert!(tm.is_active(a).unwrap());

        tm.commit(a).unwrap();
        tm.abort(b).unwrap();
        assert!(tm.is_committed(a).unwrap());
        assert!(!tm.is_active(a).unwrap());
        assert!(tm.is_aborted(b).unwrap());
        assert!(!tm.is_committed(b).unwrap());
    }

    #[test]
    fn test_super_xid() {
        let dir = tempdir().unwrap();
        let tm = TransactionManager::create(dir.path().join("t.xid")).unwrap();

        assert!(tm.is_committed(SUPER_XID).unwrap());
        assert!(!tm.is_active(SUPER_XID).unwrap());
        assert!(!tm.is_aborted(SUPER_XID).unwrap());
    }

    #[test]
    fn test_unknown_xid() {
        let dir = tempdir().unwrap();
        let tm = TransactionManager::create(dir.path().join("t.xid")).unwrap();

        assert!(matches!(tm.is_active(1), Err(Error::UnknownTransaction(1))));
        assert!(matches!(tm.commit(3), Err(Error::UnknownTransaction(3))));
    }

    #[test]
    fn test_status_persists() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xid");

        {
            let tm = TransactionManager::create(&path).unwrap();
            let a = tm.begin().unwrap();
            tm.begin().unwrap();
            tm.commit(a).unwrap();
        }

        let tm = TransactionManager::open(&path).unwrap();
        assert_eq!(tm.counter(), 2);
        assert_eq!(tm.status(1).unwrap(), XidStatus::Committed);
        assert_eq!(tm.status(2).unwrap(), XidStatus::Active);
        assert_eq!(tm.begin().unwrap(), 3);
    }

    #[test]
    fn test_length_mismatch_is_corrupt() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xid");

        {
            let tm = TransactionManager::create(&path).unwrap();
            tm.begin().unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        bytes.push(0);
        std::fs::write(&path, &bytes).unwrap();

        assert!(matches!(
            TransactionManager::open(&path),
            Err(Error::CorruptXidFile)
        ));

        std::fs::write(&path, [0u8; 3]).unwrap();
        assert!(matches!(
            TransactionManager::open(&path),
            Err(Error::CorruptXidFile)
        ));
    }

    #[test]
    fn test_concurrent_begin_unique() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("t.xid");
        let tm = Arc::new(TransactionManager::create(&path).unwrap());

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tm = Arc::clone(&tm);
                thread::spawn(move || (0..25).map(|_| tm.begin().unwrap()).collect::<Vec<_>>())
            })
            .collect();

        let mut all: Vec<Xid> = handles
            .into_iter()
            .flat_map(|h| h.join().unwrap())
            .collect();
        all.sort_unstable();
        assert_eq!(all, (1..=100).collect::<Vec<_>>());

        drop(tm);
        assert_eq!(TransactionManager::open(&path).unwrap().counter(), 100);
    }
}
