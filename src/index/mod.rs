//! Index structures.
//!
//! - [`BPlusTree`] - disk-resident B+Tree over data items

pub mod btree;

pub use btree::{BPlusTree, Key, MAX_KEY};
