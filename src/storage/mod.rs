//! Storage layer - disk I/O, page formats and records.
//!
//! This module handles persistent storage:
//! - [`DiskManager`] - Low-level page-file I/O
//! - [`page`] - In-memory pages and their layouts
//! - [`FreeSpaceIndex`] - Finds pages with room for a record
//! - [`DataItem`] - One record viewed in place
//! - [`DataManager`] - Record insert/read over pages and the log

pub mod data_item;
mod data_manager;
mod disk_manager;
pub mod free_space;
pub mod page;

pub use data_item::{DataItem, ItemRef, ItemUpdate};
pub use data_manager::DataManager;
pub(crate) use disk_manager::{create_new_file, ensure_absent, open_existing_file};
pub use disk_manager::DiskManager;
pub use free_space::FreeSpaceIndex;
