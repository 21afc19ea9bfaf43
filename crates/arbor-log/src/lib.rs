//! Recovery log for Arbor trees.
//!
//! Decodes the typed records a tree writer logs before it touches a node,
//! and reads them back from a log directory in order.

pub mod entry;
pub mod reader;
pub mod record;

pub use entry::{IndexPair, LogEntry, LogRecordType, LoggedHeader, LoggedRoots};
pub use reader::{log_file_name, LogReader, LOG_FILE_EXTENSION};
pub use record::LogRecord;
