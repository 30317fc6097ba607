//! tidedb - storage core of an embedded relational database.
//!
//! # Architecture
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                            Database                             │
//! ├─────────────────────────────────────────────────────────────────┤
//! │  ┌──────────────────────────────┐  ┌─────────────────────────┐  │
//! │  │  VersionManager (MVCC)       │  │  BPlusTree (index/)     │  │
//! │  │  Entry + Visibility          │  │  nodes are data items   │  │
//! │  │  LockTable (deadlocks)       │  │                         │  │
//! │  └──────────────┬───────────────┘  └────────────┬────────────┘  │
//! │                 ↓                               ↓               │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │  DataManager (storage/)                                 │    │
//! │  │  DataItem cache + FreeSpaceIndex + Wal (recovery/)      │    │
//! │  └──────────────────────────┬──────────────────────────────┘    │
//! │                             ↓                                   │
//! │  ┌──────────────────────────────┐  ┌─────────────────────────┐  │
//! │  │  PageStore (buffer/)         │  │  TransactionManager     │  │
//! │  │  RefCountedCache of pages    │  │  per-xid status file    │  │
//! │  └──────────────┬───────────────┘  └─────────────────────────┘  │
//! │                 ↓                                               │
//! │  ┌─────────────────────────────────────────────────────────┐    │
//! │  │  DiskManager: <base>.db                                 │    │
//! │  └─────────────────────────────────────────────────────────┘    │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! # Modules
//! - [`common`] - Shared primitives (PageId, Uid, Xid, Error, config)
//! - [`buffer`] - Reference-counted caching and the page store
//! - [`storage`] - Page file, page layouts, records and the data manager
//! - [`recovery`] - Write-ahead log and crash recovery
//! - [`concurrency`] - Transaction status, MVCC and row locks
//! - [`index`] - B+Tree index
//!
//! # Quick Start
//! ```no_run
//! use tidedb::{Database, DbOptions, IsolationLevel};
//!
//! let db = Database::create("my_database", &DbOptions::default())?;
//! let xid = db.begin(IsolationLevel::ReadCommitted)?;
//! let uid = db.insert(xid, b"hello")?;
//! db.commit(xid)?;
//! # Ok::<(), tidedb::Error>(())
//! ```

pub mod buffer;
pub mod common;
pub mod concurrency;
mod database;
pub mod index;
pub mod recovery;
pub mod storage;

// Re-export commonly used items at crate root for convenience
pub use common::config::PAGE_SIZE;
pub use common::{DbOptions, Error, PageId, Result, Uid, Xid};

pub use buffer::{PageStore, StatsSnapshot};
pub use concurrency::{IsolationLevel, TransactionManager, VersionManager};
pub use database::Database;
pub use index::BPlusTree;
pub use storage::page::Page;
pub use storage::{DataManager, DiskManager};
