//! Configuration structures for Arbor.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Smallest cache the recovery pass will run with (32 MB).
pub const MIN_CACHE_BYTES: usize = 1 << 25;

/// Configuration for a recovery pass.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecoveryConfig {
    /// Directory holding the log files to replay.
    pub log_dir: PathBuf,
    /// Directory that file names in the log are resolved against.
    pub data_dir: PathBuf,
    /// Cache capacity in bytes (None = size from available memory).
    pub cache_size_bytes: Option<usize>,
    /// Recount fingerprints and byte counts after every leaf mutation.
    pub verify_counts: bool,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            log_dir: PathBuf::from("./data/log"),
            data_dir: PathBuf::from("./data"),
            cache_size_bytes: None,
            verify_counts: false,
        }
    }
}

impl RecoveryConfig {
    /// Creates a config that replays `log_dir` against files in `data_dir`.
    pub fn new(log_dir: impl Into<PathBuf>, data_dir: impl Into<PathBuf>) -> Self {
        Self {
            log_dir: log_dir.into(),
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Returns the cache config derived from this recovery config.
    pub fn cache_config(&self) -> CacheConfig {
        match self.cache_size_bytes {
            Some(capacity_bytes) => CacheConfig {
                capacity_bytes: capacity_bytes.max(MIN_CACHE_BYTES),
            },
            None => CacheConfig::default(),
        }
    }
}

/// Configuration for the page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Soft limit on the summed serialized size of resident pages.
    pub capacity_bytes: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity_bytes: MIN_CACHE_BYTES,
        }
    }
}
