//! MVCC row versions.
//!
//! # Entry Layout
//! ```text
//! ┌───────────┬───────────┬──────────────┐
//! │ xmin (8)  │ xmax (8)  │ row data     │
//! └───────────┴───────────┴──────────────┘
//! ```
//! `xmin` created the version; `xmax` deleted it, or is 0 while the version
//! is live. Stored as the payload of one data item.

use std::sync::Arc;

use crate::common::{Error, Result, Uid, Xid};
use crate::storage::{DataItem, DataManager};

const OFFSET_XMIN: usize = 0;
const OFFSET_XMAX: usize = OFFSET_XMIN + 8;
const OFFSET_DATA: usize = OFFSET_XMAX + 8;

/// Build the payload of a fresh version created by `xid`.
pub fn wrap_entry_raw(xid: Xid, data: &[u8]) -> Vec<u8> {
    let mut raw = Vec::with_capacity(OFFSET_DATA + data.len());
    raw.extend_from_slice(&xid.to_le_bytes());
    raw.extend_from_slice(&0u64.to_le_bytes());
    raw.extend_from_slice(data);
    raw
}

fn read_xid(bytes: &[u8], at: usize) -> Xid {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    Xid::from_le_bytes(buf)
}

/// One row version, backed by a cached data item.
#[derive(Debug)]
pub struct Entry {
    uid: Uid,
    item: Arc<DataItem>,
}

impl Entry {
    /// Take the item at `uid` from the data manager.
    ///
    /// Returns None, holding nothing, if the item has been invalidated.
    pub(crate) fn load(dm: &DataManager, uid: Uid) -> Result<Option<Self>> {
        let item = dm.acquire_item(uid)?;
        if !item.is_valid() {
            dm.release_item(uid)?;
            return Ok(None);
        }
        if item.data_len() < OFFSET_DATA {
            dm.release_item(uid)?;
            return Err(Error::InvalidUid(uid.0));
        }
        Ok(Some(Self { uid, item }))
    }

    /// Give the backing item back to the data manager.
    pub(crate) fn remove(&self, dm: &DataManager) -> Result<()> {
        dm.release_item(self.uid)
    }

    #[inline]
    pub fn uid(&self) -> Uid {
        self.uid
    }

    /// Copy of the row data.
    pub fn data(&self) -> Vec<u8> {
        self.item.read_data(|bytes| bytes[OFFSET_DATA..].to_vec())
    }

    pub fn xmin(&self) -> Xid {
        self.item.read_data(|bytes| read_xid(bytes, OFFSET_XMIN))
    }

    pub fn xmax(&self) -> Xid {
        self.item.read_data(|bytes| read_xid(bytes, OFFSET_XMAX))
    }

    /// Mark the version deleted by `xid`, logged under `xid`.
    pub fn set_xmax(&self, dm: &DataManager, xid: Xid) -> Result<()> {
        let update = self.item.before(dm);
        update.data_mut()[OFFSET_XMAX..OFFSET_DATA].copy_from_slice(&xid.to_le_bytes());
        update.after(xid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::DbOptions;
    use tempfile::tempdir;

    #[test]
    fn test_wrap_entry_raw() {
        let raw = wrap_entry_raw(7, b"row");
        assert_eq!(raw.len(), 16 + 3);
        assert_eq!(read_xid(&raw, OFFSET_XMIN), 7);
        assert_eq!(read_xid(&raw, OFFSET_XMAX), 0);
        assert_eq!(&raw[16..], b"row");
    }

    #[test]
    fn test_load_and_set_xmax() {
        let dir = tempdir().unwrap();
        let dm = DataManager::create(&dir.path().join("e"), &DbOptions::default().memory(1 << 20))
            .unwrap();
        let uid = dm.insert(3, &wrap_entry_raw(3, b"payload")).unwrap();

        let entry = Entry::load(&dm, uid).unwrap().unwrap();
        assert_eq!(entry.xmin(), 3);
        assert_eq!(entry.xmax(), 0);
        assert_eq!(entry.data(), b"payload");

        entry.set_xmax(&dm, 4).unwrap();
        assert_eq!(entry.xmax(), 4);
        assert_eq!(entry.data(), b"payload");
        entry.remove(&dm).unwrap();
    }

    #[test]
    fn test_short_item_is_not_an_entry() {
        let dir = tempdir().unwrap();
        let dm = DataManager::create(&dir.path().join("e"), &DbOptions::default().memory(1 << 20))
            .unwrap();
        let uid = dm.insert(1, b"tiny").unwrap();

        assert!(matches!(Entry::load(&dm, uid), Err(Error::InvalidUid(_))));
    }
}
