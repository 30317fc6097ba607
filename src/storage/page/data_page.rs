//! Layout of ordinary data pages (every page except page 1).
//!
//! # Page Layout
//! ```text
//! ┌────────────────────┬──────────────────────────────┬────────────┐
//! │ free offset (2B)   │ records, packed from offset 2 │ free space │
//! └────────────────────┴──────────────────────────────┴────────────┘
//! ```
//! The free offset is the little-endian position of the first free byte.
//! Records are append-only; space is never reclaimed.

use crate::common::config::PAGE_SIZE;

use super::Page;

/// Size of the free-offset header.
pub const HEADER_SIZE: usize = 2;

/// Largest record payload a fresh data page can hold.
pub const MAX_FREE_SPACE: usize = PAGE_SIZE - HEADER_SIZE;

/// Raw bytes of a freshly initialized data page.
pub fn init_raw() -> Vec<u8> {
    let mut raw = vec![0u8; PAGE_SIZE];
    write_free_offset(&mut raw, HEADER_SIZE as u16);
    raw
}

#[inline]
fn read_free_offset(raw: &[u8]) -> u16 {
    u16::from_le_bytes([raw[0], raw[1]])
}

#[inline]
fn write_free_offset(raw: &mut [u8], offset: u16) {
    raw[..HEADER_SIZE].copy_from_slice(&offset.to_le_bytes());
}

/// Current free offset of the page.
pub fn free_offset(page: &Page) -> u16 {
    read_free_offset(&page.data())
}

/// Bytes still available at the end of the page.
pub fn free_space(page: &Page) -> usize {
    PAGE_SIZE - free_offset(page) as usize
}

/// Append `raw` at the free offset and return where it landed.
///
/// The caller must have checked that `raw` fits.
pub fn insert(page: &Page, raw: &[u8]) -> u16 {
    let mut data = page.data_mut();
    let offset = read_free_offset(&data);
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);
    write_free_offset(&mut data, offset + raw.len() as u16);
    page.mark_dirty();
    offset
}

/// Place `raw` at `offset` while replaying the log.
///
/// The free offset only ever grows, so replaying an insert twice is harmless.
pub fn recover_insert(page: &Page, raw: &[u8], offset: u16) {
    let mut data = page.data_mut();
    let start = offset as usize;
    data[start..start + raw.len()].copy_from_slice(raw);

    let end = offset + raw.len() as u16;
    if read_free_offset(&data) < end {
        write_free_offset(&mut data, end);
    }
    page.mark_dirty();
}

/// Overwrite bytes at `offset` while replaying the log. The free offset is
/// left untouched.
pub fn recover_update(page: &Page, raw: &[u8], offset: u16) {
    let start = offset as usize;
    page.data_mut()[start..start + raw.len()].copy_from_slice(raw);
    page.mark_dirty();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::PageId;

    fn create_test_page() -> Page {
        Page::new(PageId::new(2), init_raw().into_boxed_slice())
    }

    #[test]
    fn test_fresh_page() {
        let page = create_test_page();
        assert_eq!(free_offset(&page), 2);
        assert_eq!(free_space(&page), MAX_FREE_SPACE);
    }

    #[test]
    fn test_insert_appends() {
        let page = create_test_page();

        assert_eq!(insert(&page, b"abc"), 2);
        assert_eq!(insert(&page, b"defg"), 5);
        assert_eq!(free_offset(&page), 9);
        assert_eq!(&page.data()[2..9], b"abcdefg");
        assert!(page.is_dirty());
    }

    #[test]
    fn test_recover_insert_only_raises_offset() {
        let page = create_test_page();
        insert(&page, &[1u8; 20]);

        // Replaying an earlier insert must not move the offset back
        recover_insert(&page, &[7u8; 4], 2);
        assert_eq!(free_offset(&page), 22);
        assert_eq!(&page.data()[2..6], &[7u8; 4]);

        recover_insert(&page, &[9u8; 10], 22);
        assert_eq!(free_offset(&page), 32);
    }

    #[test]
    fn test_recover_update_keeps_offset() {
        let page = create_test_page();
        insert(&page, b"hello");

        recover_update(&page, b"J", 2);
        assert_eq!(&page.data()[2..7], b"Jello");
        assert_eq!(free_offset(&page), 7);
    }
}
