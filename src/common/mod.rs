//! Common types and utilities shared across tidedb.
//!
//! This module contains fundamental primitives used throughout the codebase:
//! - Configuration constants and open options
//! - Error types
//! - Identifiers (PageId, Uid, Xid)

pub mod config;
pub mod error;
mod page_id;
mod uid;

pub use config::DbOptions;
pub use error::{Error, Result};
pub use page_id::PageId;
pub use uid::Uid;

/// Transaction identifier. Assigned monotonically from 1; 0 is the
/// super transaction.
pub type Xid = u64;
