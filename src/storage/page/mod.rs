//! Page types and layout.
//!
//! This module contains:
//! - [`Page`] - An 8KB page held in memory
//! - [`data_page`] - Free-offset layout of ordinary data pages
//! - [`page_one`] - The clean-shutdown marker kept on page 1

#[allow(clippy::module_inception)]
mod page;

pub mod data_page;
pub mod page_one;

pub use page::Page;
