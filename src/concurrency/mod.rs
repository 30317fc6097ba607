//! Transactions and multi-version concurrency control.
//!
//! - [`TransactionManager`] - durable per-xid status file
//! - [`VersionManager`] - MVCC row access with row locks
//! - [`LockTable`] - exclusive row locks with deadlock detection
//! - [`visibility`] - read-committed and repeatable-read rules

mod entry;
mod lock_table;
mod transaction;
mod transaction_manager;
mod version_manager;
pub mod visibility;

pub use entry::{wrap_entry_raw, Entry};
pub use lock_table::{LockTable, Waiter};
pub use transaction::{AbortCause, IsolationLevel, Transaction};
pub use transaction_manager::{TransactionManager, XidStatus};
pub use version_manager::VersionManager;
