//! Disk-resident B+Tree index.
//!
//! Nodes are ordinary data items edited through the before/after update
//! protocol, so index changes are logged and recovered like any record.

pub mod node;
mod tree;

pub use node::{Key, Node, MAX_KEY};
pub use tree::BPlusTree;
