//! Free-space index over data pages.
//!
//! Pages are bucketed by free space in steps of `PAGE_SIZE / 40` bytes.
//! A page is held by the index only while no inserter owns it: `select`
//! removes the page it returns and the inserter adds it back afterwards with
//! its new free space. Two inserts therefore never target the same page.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::common::config::{FREE_SPACE_INTERVALS, PAGE_SIZE};
use crate::common::PageId;

/// Width of one free-space bucket in bytes.
pub const THRESHOLD: usize = PAGE_SIZE / FREE_SPACE_INTERVALS;

/// A page handed out by [`FreeSpaceIndex::select`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageInfo {
    pub page_id: PageId,
    pub free_space: usize,
}

/// Buckets of pages grouped by free space.
pub struct FreeSpaceIndex {
    buckets: Mutex<Vec<VecDeque<PageInfo>>>,
}

impl FreeSpaceIndex {
    pub fn new() -> Self {
        Self {
            buckets: Mutex::new(vec![VecDeque::new(); FREE_SPACE_INTERVALS + 1]),
        }
    }

    /// Record that `page_id` has `free_space` bytes available.
    pub fn add(&self, page_id: PageId, free_space: usize) {
        let bucket = (free_space / THRESHOLD).min(FREE_SPACE_INTERVALS);
        self.buckets.lock()[bucket].push_back(PageInfo { page_id, free_space });
    }

    /// Take a page with at least `needed` free bytes out of the index.
    ///
    /// The search starts one bucket above the one `needed` falls into, so
    /// any page found fits. The top bucket is searched as-is, so a request
    /// that lands there may get a page a few bytes short; callers recheck.
    /// Returns None if no candidate exists.
    pub fn select(&self, needed: usize) -> Option<PageInfo> {
        let mut start = needed / THRESHOLD;
        if start < FREE_SPACE_INTERVALS {
            start += 1;
        }

        let mut buckets = self.buckets.lock();
        buckets
            .iter_mut()
            .skip(start)
            .find_map(|pages| pages.pop_front())
    }

    /// Number of pages currently in the index.
    pub fn len(&self) -> usize {
        self.buckets.lock().iter().map(VecDeque::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for FreeSpaceIndex {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_select_empty() {
        let index = FreeSpaceIndex::new();
        assert_eq!(index.select(10), None);
    }

    #[test]
    fn test_select_removes_page() {
        let index = FreeSpaceIndex::new();
        index.add(PageId::new(2), 8000);

        let info = index.select(100).unwrap();
        assert_eq!(info.page_id, PageId::new(2));
        assert_eq!(info.free_space, 8000);
        assert!(index.is_empty());
        assert_eq!(index.select(100), None);
    }

    #[test]
    fn test_select_skips_same_bucket() {
        let index = FreeSpaceIndex::new();
        // 300 bytes lands in bucket 1, same as a 250-byte request
        index.add(PageId::new(2), 300);

        assert_eq!(index.select(250), None);
        assert_eq!(index.select(100).unwrap().page_id, PageId::new(2));
    }

    #[test]
    fn test_selected_page_always_fits() {
        let index = FreeSpaceIndex::new();
        for (pgno, free) in [(2, 50), (3, 900), (4, 4000), (5, 8190)] {
            index.add(PageId::new(pgno), free);
        }

        for needed in [10, 500, 3000, 8000] {
            if let Some(info) = index.select(needed) {
                assert!(info.free_space >= needed);
            }
        }
    }

    #[test]
    fn test_full_page_bucket() {
        let index = FreeSpaceIndex::new();
        index.add(PageId::new(7), PAGE_SIZE);

        // Requests in the top bucket search the top bucket itself
        assert_eq!(index.select(PAGE_SIZE - 2).unwrap().page_id, PageId::new(7));
    }
}
