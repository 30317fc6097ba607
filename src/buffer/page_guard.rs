//! RAII guard for cached pages.
//!
//! A [`PageHandle`] keeps its page pinned in the [`PageStore`] and releases
//! the pin when dropped. Byte access goes through the page's own lock:
//! - `handle.data()` - shared read access
//! - `handle.data_mut()` - exclusive write access (mark dirty yourself)

use std::ops::Deref;
use std::sync::Arc;

use tracing::error;

use crate::common::PageId;
use crate::storage::page::Page;

use super::page_store::PageStore;

/// Guard for a pinned page.
///
/// Multiple `PageHandle`s can exist for the same page simultaneously; each
/// one holds its own reference. The page is automatically unpinned when the
/// handle is dropped, and written back if it was the last reference and the
/// page is dirty.
///
/// # Example
/// ```ignore
/// let page = store.fetch(page_id)?;
/// let first = page.data()[0];  // Deref to &Page
/// // handle drops here, page unpinned
/// ```
pub struct PageHandle<'a> {
    /// Reference back to the store for unpin on drop.
    store: &'a PageStore,
    /// The pinned page.
    page: Arc<Page>,
}

impl<'a> PageHandle<'a> {
    /// Create a new handle over an already pinned page.
    ///
    /// Called by `PageStore::fetch()`.
    pub(crate) fn new(store: &'a PageStore, page: Arc<Page>) -> Self {
        Self { store, page }
    }

    /// Get the page ID.
    #[inline]
    pub fn page_id(&self) -> PageId {
        self.page.id()
    }
}

impl Deref for PageHandle<'_> {
    type Target = Page;

    #[inline]
    fn deref(&self) -> &Page {
        &self.page
    }
}

impl Drop for PageHandle<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.store.unpin(self.page.id()) {
            error!(page = %self.page.id(), error = %err, "page.unpin.failed");
        }
    }
}
