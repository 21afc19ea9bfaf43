//! Arbor common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Arbor components.

pub mod config;
pub mod error;
pub mod types;

pub use config::{CacheConfig, RecoveryConfig};
pub use error::{ArborError, Result};
pub use types::{DiskOff, FileNum, Lsn, TxnId};
