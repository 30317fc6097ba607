//! Durability layer.
//!
//! - [`Wal`] - checksummed append-only write-ahead log
//! - [`LogRecord`] - insert/update record codec
//! - [`recover`] - redo/undo replay run at open after an unclean shutdown

mod log_record;
#[allow(clippy::module_inception)]
mod recovery;
mod wal;

pub use log_record::LogRecord;
pub use recovery::{recover, redo, undo, RecoveryReport};
pub use wal::Wal;
