//! Caching layer.
//!
//! - [`RefCountedCache`] - reference-counted cache every other cache builds on
//! - [`PageStore`] - the page cache over the page file
//! - [`PageHandle`] - RAII pin on a cached page
//! - [`CacheStats`] - hit/miss/eviction counters

mod cache;
mod page_guard;
mod page_store;
mod stats;

pub use cache::{CacheBacking, RefCountedCache};
pub use page_guard::PageHandle;
pub use page_store::PageStore;
pub use stats::{CacheStats, StatsSnapshot};
