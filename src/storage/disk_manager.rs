//! Disk Manager - low-level file I/O for database pages.
//!
//! The [`DiskManager`] handles all direct page-file operations:
//! - Reading and writing pages
//! - Appending new pages
//! - Truncating the file during recovery

use std::fs::{File, OpenOptions};
use std::io::{ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::common::config::PAGE_SIZE;
use crate::common::{Error, PageId, Result};

/// Fail with `Error::FileExists` if `path` already exists.
pub(crate) fn ensure_absent(path: &Path) -> Result<()> {
    if path.try_exists()? {
        return Err(Error::FileExists(path.to_path_buf()));
    }
    Ok(())
}

/// Create a file that must not exist yet.
pub(crate) fn create_new_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(|err| match err.kind() {
            ErrorKind::AlreadyExists => Error::FileExists(path.to_path_buf()),
            _ => Error::Io(err),
        })
}

/// Open a file that must already exist.
pub(crate) fn open_existing_file(path: &Path) -> Result<File> {
    OpenOptions::new()
        .read(true)
        .write(true)
        .open(path)
        .map_err(|err| match err.kind() {
            ErrorKind::NotFound => Error::FileNotFound(path.to_path_buf()),
            _ => Error::Io(err),
        })
}

/// Manages disk I/O for the page file.
///
/// # File Layout
/// Pages are numbered from 1 and laid out sequentially:
/// ```text
/// ┌─────────┬─────────┬─────────┬─────────┐
/// │ Page 1  │ Page 2  │  ...    │ Page N  │
/// │ (8KB)   │ (8KB)   │         │ (8KB)   │
/// └─────────┴─────────┴─────────┴─────────┘
/// Offset:  0      8192     ...   (N-1)×8192
/// ```
///
/// # Thread Safety
/// `DiskManager` is **single-threaded**. The `PageStore` serializes access
/// to it behind one mutex.
///
/// # Durability
/// Every write is followed by `fsync()`.
pub struct DiskManager {
    file: File,
    /// Number of pages in the file.
    page_count: u32,
}

impl DiskManager {
    /// Create a new page file.
    ///
    /// # Errors
    /// Returns `Error::FileExists` if the file already exists.
    pub fn create<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = create_new_file(path.as_ref())?;

        Ok(Self {
            file,
            page_count: 0,
        })
    }

    /// Open an existing page file.
    ///
    /// # Errors
    /// Returns `Error::FileNotFound` if the file doesn't exist.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = open_existing_file(path.as_ref())?;

        let file_size = file.metadata()?.len();
        let page_count = (file_size / PAGE_SIZE as u64) as u32;

        Ok(Self { file, page_count })
    }

    #[inline]
    fn offset_of(page_id: PageId) -> u64 {
        (page_id.0 as u64 - 1) * PAGE_SIZE as u64
    }

    fn check_exists(&self, page_id: PageId) -> Result<()> {
        if !page_id.is_valid() || page_id.0 > self.page_count {
            return Err(Error::PageNotFound(page_id.0));
        }
        Ok(())
    }

    /// Read a page from disk.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page doesn't exist.
    pub fn read_page(&mut self, page_id: PageId) -> Result<Box<[u8]>> {
        self.check_exists(page_id)?;

        self.file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        let mut data = vec![0u8; PAGE_SIZE].into_boxed_slice();
        self.file.read_exact(&mut data)?;

        Ok(data)
    }

    /// Write a page to disk and fsync.
    ///
    /// # Errors
    /// Returns `Error::PageNotFound` if the page hasn't been allocated.
    pub fn write_page(&mut self, page_id: PageId, data: &[u8]) -> Result<()> {
        self.check_exists(page_id)?;
        debug_assert_eq!(data.len(), PAGE_SIZE);

        self.file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        self.file.write_all(data)?;
        self.file.sync_all()?;

        Ok(())
    }

    /// Append a new page initialized with `init` (zero padded) and fsync.
    ///
    /// A new page is durable before its number is handed out.
    pub fn allocate_page(&mut self, init: &[u8]) -> Result<PageId> {
        debug_assert!(init.len() <= PAGE_SIZE);
        let page_id = PageId::new(self.page_count + 1);

        let mut data = vec![0u8; PAGE_SIZE];
        data[..init.len()].copy_from_slice(init);

        self.file.seek(SeekFrom::Start(Self::offset_of(page_id)))?;
        self.file.write_all(&data)?;
        self.file.sync_all()?;

        self.page_count += 1;
        Ok(page_id)
    }

    /// Shrink the file to exactly `max_page` pages.
    pub fn truncate(&mut self, max_page: u32) -> Result<()> {
        self.file.set_len(max_page as u64 * PAGE_SIZE as u64)?;
        self.file.sync_all()?;
        self.page_count = max_page;
        Ok(())
    }

    /// Get the number of pages in the file.
    #[inline]
    pub fn page_count(&self) -> u32 {
        self.page_count
    }

    /// Get the total size of the page file in bytes.
    #[inline]
    pub fn file_size(&self) -> u64 {
        (self.page_count as u64) * (PAGE_SIZE as u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_create_new_database() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        let dm = DiskManager::create(&path).unwrap();
        assert_eq!(dm.page_count(), 0);
        assert_eq!(dm.file_size(), 0);
    }

    #[test]
    fn test_create_existing_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        DiskManager::create(&path).unwrap();
        assert!(matches!(DiskManager::create(&path), Err(Error::FileExists(_))));
    }

    #[test]
    fn test_open_nonexistent_fails() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("nonexistent.db");

        assert!(matches!(DiskManager::open(&path), Err(Error::FileNotFound(_))));
    }

    #[test]
    fn test_pages_numbered_from_one() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("test.db")).unwrap();

        assert_eq!(dm.allocate_page(&[]).unwrap(), PageId::new(1));
        assert_eq!(dm.allocate_page(&[]).unwrap(), PageId::new(2));
        assert_eq!(dm.file_size(), 2 * PAGE_SIZE as u64);
    }

    #[test]
    fn test_allocate_with_initial_bytes() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("test.db")).unwrap();

        let page_id = dm.allocate_page(&[0xAB, 0xCD]).unwrap();
        let data = dm.read_page(page_id).unwrap();
        assert_eq!(&data[..3], &[0xAB, 0xCD, 0]);
        assert_eq!(data[PAGE_SIZE - 1], 0);
    }

    #[test]
    fn test_persistence() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");

        {
            let mut dm = DiskManager::create(&path).unwrap();
            let page_id = dm.allocate_page(&[]).unwrap();

            let mut data = vec![0u8; PAGE_SIZE];
            data[0] = 0x42;
            data[PAGE_SIZE - 1] = 0x24;
            dm.write_page(page_id, &data).unwrap();
        }

        {
            let mut dm = DiskManager::open(&path).unwrap();
            assert_eq!(dm.page_count(), 1);

            let data = dm.read_page(PageId::new(1)).unwrap();
            assert_eq!(data[0], 0x42);
            assert_eq!(data[PAGE_SIZE - 1], 0x24);
        }
    }

    #[test]
    fn test_read_invalid_page() {
        let dir = tempdir().unwrap();
        let mut dm = DiskManager::create(dir.path().join("test.db")).unwrap();
        dm.allocate_page(&[]).unwrap();

        assert!(matches!(dm.read_page(PageId::new(2)), Err(Error::PageNotFound(2))));
        assert!(matches!(dm.read_page(PageId::INVALID), Err(Error::PageNotFound(0))));
    }

    #[test]
    fn test_truncate() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.db");
        let mut dm = DiskManager::create(&path).unwrap();
        for _ in 0..5 {
            dm.allocate_page(&[]).unwrap();
        }

        dm.truncate(2).unwrap();
        assert_eq!(dm.page_count(), 2);
        assert!(dm.read_page(PageId::new(3)).is_err());

        // The next allocation reuses the truncated number
        assert_eq!(dm.allocate_page(&[]).unwrap(), PageId::new(3));
        drop(dm);

        assert_eq!(DiskManager::open(&path).unwrap().page_count(), 3);
    }
}
