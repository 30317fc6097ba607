//! Log record codec.
//!
//! # Record Layout
//! ```text
//! Insert: [type=0:1][xid:8][page:4][offset:2][raw item bytes]
//! Update: [type=1:1][xid:8][uid:8][old raw][new raw]
//! ```
//! The two raw halves of an update always have the same length, so the
//! split point is the midpoint of what follows the uid. Integers are
//! little-endian.

use crate::common::{Error, PageId, Result, Uid, Xid};

const TYPE_INSERT: u8 = 0;
const TYPE_UPDATE: u8 = 1;

const OFFSET_XID: usize = 1;
const OFFSET_INSERT_PAGE: usize = OFFSET_XID + 8;
const OFFSET_INSERT_OFFSET: usize = OFFSET_INSERT_PAGE + 4;
const OFFSET_INSERT_RAW: usize = OFFSET_INSERT_OFFSET + 2;
const OFFSET_UPDATE_UID: usize = OFFSET_XID + 8;
const OFFSET_UPDATE_RAW: usize = OFFSET_UPDATE_UID + 8;

/// One decoded log record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogRecord {
    /// A data item was appended to a page.
    Insert {
        xid: Xid,
        page_id: PageId,
        offset: u16,
        raw: Vec<u8>,
    },
    /// A data item was overwritten in place.
    Update {
        xid: Xid,
        uid: Uid,
        old_raw: Vec<u8>,
        new_raw: Vec<u8>,
    },
}

impl LogRecord {
    /// Encode an insert record without building a `LogRecord` first.
    pub fn encode_insert(xid: Xid, page_id: PageId, offset: u16, raw: &[u8]) -> Vec<u8> {
        let mut buf = Vec::with_capacity(OFFSET_INSERT_RAW + raw.len());
        buf.push(TYPE_INSERT);
        buf.extend_from_slice(&xid.to_le_bytes());
        buf.extend_from_slice(&page_id.0.to_le_bytes());
        buf.extend_from_slice(&offset.to_le_bytes());
        buf.extend_from_slice(raw);
        buf
    }

    /// Encode an update record without building a `LogRecord` first.
    pub fn encode_update(xid: Xid, uid: Uid, old_raw: &[u8], new_raw: &[u8]) -> Vec<u8> {
        debug_assert_eq!(old_raw.len(), new_raw.len());
        let mut buf = Vec::with_capacity(OFFSET_UPDATE_RAW + old_raw.len() * 2);
        buf.push(TYPE_UPDATE);
        buf.extend_from_slice(&xid.to_le_bytes());
        buf.extend_from_slice(&uid.0.to_le_bytes());
        buf.extend_from_slice(old_raw);
        buf.extend_from_slice(new_raw);
        buf
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            LogRecord::Insert {
                xid,
                page_id,
                offset,
                raw,
            } => Self::encode_insert(*xid, *page_id, *offset, raw),
            LogRecord::Update {
                xid,
                uid,
                old_raw,
                new_raw,
            } => Self::encode_update(*xid, *uid, old_raw, new_raw),
        }
    }

    /// Decode a record read from the log.
    ///
    /// # Errors
    /// Returns `Error::CorruptLogFile` for an unknown type or a record too
    /// short for its fixed fields.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        match bytes.first() {
            Some(&TYPE_INSERT) if bytes.len() >= OFFSET_INSERT_RAW => Ok(LogRecord::Insert {
                xid: read_u64(bytes, OFFSET_XID),
                page_id: PageId::new(u32::from_le_bytes([
                    bytes[OFFSET_INSERT_PAGE],
                    bytes[OFFSET_INSERT_PAGE + 1],
                    bytes[OFFSET_INSERT_PAGE + 2],
                    bytes[OFFSET_INSERT_PAGE + 3],
                ])),
                offset: u16::from_le_bytes([
                    bytes[OFFSET_INSERT_OFFSET],
                    bytes[OFFSET_INSERT_OFFSET + 1],
                ]),
                raw: bytes[OFFSET_INSERT_RAW..].to_vec(),
            }),
            Some(&TYPE_UPDATE)
                if bytes.len() >= OFFSET_UPDATE_RAW
                    && (bytes.len() - OFFSET_UPDATE_RAW) % 2 == 0 =>
            {
                let half = (bytes.len() - OFFSET_UPDATE_RAW) / 2;
                let (old_raw, new_raw) = bytes[OFFSET_UPDATE_RAW..].split_at(half);
                Ok(LogRecord::Update {
                    xid: read_u64(bytes, OFFSET_XID),
                    uid: Uid(read_u64(bytes, OFFSET_UPDATE_UID)),
                    old_raw: old_raw.to_vec(),
                    new_raw: new_raw.to_vec(),
                })
            }
            _ => Err(Error::CorruptLogFile),
        }
    }

    /// Transaction that wrote the record.
    #[inline]
    pub fn xid(&self) -> Xid {
        match self {
            LogRecord::Insert { xid, .. } | LogRecord::Update { xid, .. } => *xid,
        }
    }

    /// Page the record touches.
    #[inline]
    pub fn page_id(&self) -> PageId {
        match self {
            LogRecord::Insert { page_id, .. } => *page_id,
            LogRecord::Update { uid, .. } => uid.page_id(),
        }
    }
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[at..at + 8]);
    u64::from_le_bytes(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_layout() {
        let bytes = LogRecord::encode_insert(5, PageId::new(3), 0x0102, b"xyz");
        assert_eq!(bytes[0], 0);
        assert_eq!(&bytes[1..9], &5u64.to_le_bytes());
        assert_eq!(&bytes[9..13], &3u32.to_le_bytes());
        assert_eq!(&bytes[13..15], &[0x02, 0x01]);
        assert_eq!(&bytes[15..], b"xyz");

        let record = LogRecord::decode(&bytes).unwrap();
        assert_eq!(record.xid(), 5);
        assert_eq!(record.page_id(), PageId::new(3));
    }

    #[test]
    fn test_update_splits_halves() {
        let uid = Uid::from_parts(PageId::new(9), 40);
        let record = LogRecord::Update {
            xid: 2,
            uid,
            old_raw: b"old!".to_vec(),
            new_raw: b"new!".to_vec(),
        };

        let decoded = LogRecord::decode(&record.encode()).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.page_id(), PageId::new(9));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(matches!(LogRecord::decode(&[]), Err(Error::CorruptLogFile)));
        assert!(matches!(LogRecord::decode(&[7, 0, 0]), Err(Error::CorruptLogFile)));
        assert!(matches!(LogRecord::decode(&[0, 1, 2]), Err(Error::CorruptLogFile)));
        // Update with uneven halves
        let mut odd = LogRecord::encode_update(1, Uid(1), b"a", b"b");
        odd.push(0);
        assert!(matches!(LogRecord::decode(&odd), Err(Error::CorruptLogFile)));
    }
}
