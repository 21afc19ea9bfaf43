//! Error types for Arbor.

use thiserror::Error;

/// Result type alias using ArborError.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Errors that can occur in Arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Cache errors
    #[error("Page not found: {location} in file {file}")]
    PageNotFound { file: u32, location: u64 },

    #[error("Page corrupted: {location}, reason: {reason}")]
    PageCorrupted { location: u64, reason: String },

    #[error("Page too large: {location}, {size} bytes exceeds block limit {limit}")]
    PageTooLarge {
        location: u64,
        size: usize,
        limit: usize,
    },

    #[error("Page already pinned: {location}")]
    PageAlreadyPinned { location: u64 },

    #[error("Page not pinned: {location}")]
    PageNotPinned { location: u64 },

    #[error("Pin leak: {count} page(s) still pinned")]
    PinLeak { count: usize },

    // Registry errors
    #[error("Cache file not registered: {0}")]
    CacheFileNotFound(u32),

    #[error("No tree opened for file {0}")]
    TreeNotOpen(u32),

    // Tree errors
    #[error("Invalid node type: expected {expected}, got height {height}")]
    InvalidNodeType { expected: &'static str, height: u32 },

    #[error("Tree corrupted: {0}")]
    TreeCorrupted(String),

    #[error("Index {index} out of range (limit {limit})")]
    IndexOutOfRange { index: usize, limit: usize },

    #[error("Slot {0} already occupied")]
    SlotOccupied(usize),

    #[error("Slot {0} is empty")]
    SlotEmpty(usize),

    #[error("Unsupported header: {0}")]
    UnsupportedHeader(String),

    // Log errors
    #[error("Log corrupted at LSN {lsn}: {reason}")]
    LogCorrupted { lsn: u64, reason: String },

    #[error("Not implemented: {operation}")]
    Unimplemented { operation: &'static str },

    #[error("Recovery failed: {0}")]
    RecoveryFailed(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl ArborError {
    /// Returns true for record kinds whose handler was never written.
    pub fn is_unimplemented(&self) -> bool {
        matches!(self, ArborError::Unimplemented { .. })
    }
}

/// Shorthand for an unimplemented handler.
pub fn unimplemented(operation: &'static str) -> ArborError {
    ArborError::Unimplemented { operation }
}
