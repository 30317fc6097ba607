//! Write-ahead log.
//!
//! # File Layout
//! ```text
//! ┌──────────────┬──────────┬──────────┬─────┬──────────┬───────────┐
//! │ checksum (4) │ record 1 │ record 2 │ ... │ record N │ [bad tail]│
//! └──────────────┴──────────┴──────────┴─────┴──────────┴───────────┘
//!
//! record: [size:4][checksum:4][data:size]
//! ```
//! The header holds a running checksum folded over every complete record
//! (size and checksum fields included). Each record also carries a checksum
//! of its own data. All integers are little-endian.
//!
//! Every append is durable before it returns. A record that was only partly
//! written when the process died is a bad tail: it fails its own checksum or
//! runs past the end of the file, and is cut off the next time the log opens.

use std::fs::File;
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{debug, info, warn};

use crate::common::config::LOG_CHECKSUM_SEED;
use crate::common::{Error, Result};
use crate::storage::{create_new_file, open_existing_file};

/// Size of the running checksum at the start of the file.
pub const FILE_HEADER_SIZE: u64 = 4;

/// Size of the `[size][checksum]` prefix of each record.
pub const RECORD_HEADER_SIZE: u64 = 8;

/// Fold `bytes` into `acc`. Bytes are folded as signed values.
pub fn checksum(acc: u32, bytes: &[u8]) -> u32 {
    bytes.iter().fold(acc, |acc, &b| {
        acc.wrapping_mul(LOG_CHECKSUM_SEED)
            .wrapping_add(b as i8 as i32 as u32)
    })
}

struct WalFile {
    file: File,
    /// Running checksum stored in the header.
    checksum: u32,
    /// Read cursor, always at a record boundary.
    position: u64,
    /// Current file length.
    len: u64,
}

impl WalFile {
    /// Read the full record (prefix included) at the cursor and advance past
    /// it. Returns None at end of file or on a bad tail.
    fn read_record(&mut self) -> Result<Option<Vec<u8>>> {
        if self.position + RECORD_HEADER_SIZE > self.len {
            return Ok(None);
        }

        let mut prefix = [0u8; RECORD_HEADER_SIZE as usize];
        self.file.seek(SeekFrom::Start(self.position))?;
        self.file.read_exact(&mut prefix)?;

        let size = u32::from_le_bytes([prefix[0], prefix[1], prefix[2], prefix[3]]) as u64;
        let stored = u32::from_le_bytes([prefix[4], prefix[5], prefix[6], prefix[7]]);
        if self.position + RECORD_HEADER_SIZE + size > self.len {
            return Ok(None);
        }

        let mut record = vec![0u8; (RECORD_HEADER_SIZE + size) as usize];
        record[..RECORD_HEADER_SIZE as usize].copy_from_slice(&prefix);
        self.file.read_exact(&mut record[RECORD_HEADER_SIZE as usize..])?;

        if checksum(0, &record[RECORD_HEADER_SIZE as usize..]) != stored {
            return Ok(None);
        }

        self.position += record.len() as u64;
        Ok(Some(record))
    }

    fn write_header(&mut self) -> Result<()> {
        self.file.seek(SeekFrom::Start(0))?;
        self.file.write_all(&self.checksum.to_le_bytes())?;
        Ok(())
    }
}

/// The write-ahead log of one database.
///
/// # Thread Safety
/// One `Mutex` guards the file, the running checksum and the read cursor.
/// Appends from any thread are serialized; the cursor is meant for the
/// single-threaded recovery pass.
pub struct Wal {
    inner: Mutex<WalFile>,
}

impl Wal {
    /// Create an empty log.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = create_new_file(path.as_ref())?;
        file.write_all(&0u32.to_le_bytes())?;
        file.sync_all()?;

        Ok(Self {
            inner: Mutex::new(WalFile {
                file,
                checksum: 0,
                position: FILE_HEADER_SIZE,
                len: FILE_HEADER_SIZE,
            }),
        })
    }

    /// Open an existing log, validating it and cutting off any bad tail.
    ///
    /// # Errors
    /// - `Error::FileNotFound` if the file doesn't exist
    /// - `Error::CorruptLogFile` if the file is shorter than its header or
    ///   the header checksum doesn't match the complete records
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut file = open_existing_file(path.as_ref())?;
        let len = file.metadata()?.len();
        if len < FILE_HEADER_SIZE {
            return Err(Error::CorruptLogFile);
        }

        let mut header = [0u8; FILE_HEADER_SIZE as usize];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut header)?;

        let mut wal = WalFile {
            file,
            checksum: u32::from_le_bytes(header),
            position: FILE_HEADER_SIZE,
            len,
        };

        let mut computed = 0;
        let mut records = 0usize;
        while let Some(record) = wal.read_record()? {
            computed = checksum(computed, &record);
            records += 1;
        }
        if computed != wal.checksum {
            return Err(Error::CorruptLogFile);
        }

        if wal.position < wal.len {
            warn!(
                valid_len = wal.position,
                file_len = wal.len,
                "wal.open.bad_tail_truncated"
            );
            wal.file.set_len(wal.position)?;
            wal.file.sync_all()?;
            wal.len = wal.position;
        }
        wal.position = FILE_HEADER_SIZE;

        info!(records, len = wal.len, "wal.open");
        Ok(Self {
            inner: Mutex::new(wal),
        })
    }

    /// Append one record and make it durable.
    ///
    /// The record body is written first, then the header checksum that
    /// covers it; both are synced before returning.
    pub fn append(&self, data: &[u8]) -> Result<()> {
        let mut record = Vec::with_capacity(RECORD_HEADER_SIZE as usize + data.len());
        record.extend_from_slice(&(data.len() as u32).to_le_bytes());
        record.extend_from_slice(&checksum(0, data).to_le_bytes());
        record.extend_from_slice(data);

        let mut wal = self.inner.lock();
        let end = wal.len;
        wal.file.seek(SeekFrom::Start(end))?;
        wal.file.write_all(&record)?;
        wal.len += record.len() as u64;

        wal.checksum = checksum(wal.checksum, &record);
        wal.write_header()?;
        wal.file.sync_data()?;

        debug!(offset = end, size = data.len(), "wal.append");
        Ok(())
    }

    /// Reset the read cursor to the first record.
    pub fn rewind(&self) {
        self.inner.lock().position = FILE_HEADER_SIZE;
    }

    /// Read the data of the record at the cursor and advance.
    ///
    /// Returns None at end of log or at a malformed trailing record.
    pub fn next(&self) -> Result<Option<Vec<u8>>> {
        let mut wal = self.inner.lock();
        Ok(wal
            .read_record()?
            .map(|record| record[RECORD_HEADER_SIZE as usize..].to_vec()))
    }

    /// Current length of the log file in bytes.
    pub fn len(&self) -> u64 {
        self.inner.lock().len
    }

    /// Check if the log holds no records.
    pub fn is_empty(&self) -> bool {
        self.len() == FILE_HEADER_SIZE
    }
}
