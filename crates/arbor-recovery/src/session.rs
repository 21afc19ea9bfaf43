//! Recovery session: the state one recovery pass threads through every
//! handler.

use crate::registry::CacheFileRegistry;
use crate::rollback::Transaction;
use arbor_cache::{CacheFile, CacheTable};
use arbor_common::{ArborError, FileNum, RecoveryConfig, Result, TxnId};
use arbor_tree::Node;
use std::path::PathBuf;
use std::sync::Arc;

/// State of one recovery pass: configuration, node cache and file registry.
pub struct RecoverySession {
    config: RecoveryConfig,
    cache: CacheTable<Node>,
    registry: CacheFileRegistry,
}

impl RecoverySession {
    /// Starts a recovery pass.
    ///
    /// The cache is sized from `cache_size_bytes`, or from available memory
    /// when unset.
    pub fn new(config: RecoveryConfig) -> Result<Self> {
        if !config.data_dir.is_dir() {
            return Err(ArborError::ConfigError(format!(
                "data directory {} does not exist",
                config.data_dir.display()
            )));
        }

        let cache = match config.cache_size_bytes {
            Some(_) => CacheTable::new(config.cache_config()),
            None => CacheTable::auto_sized(),
        };
        tracing::info!(
            data_dir = %config.data_dir.display(),
            cache_bytes = cache.capacity(),
            verify_counts = config.verify_counts,
            "Starting recovery session"
        );

        Ok(Self {
            config,
            cache,
            registry: CacheFileRegistry::new(),
        })
    }

    pub fn config(&self) -> &RecoveryConfig {
        &self.config
    }

    pub fn cache(&self) -> &CacheTable<Node> {
        &self.cache
    }

    pub fn registry(&self) -> &CacheFileRegistry {
        &self.registry
    }

    pub fn registry_mut(&mut self) -> &mut CacheFileRegistry {
        &mut self.registry
    }

    /// Records that `file` is open as `cachefile`.
    pub fn note_cachefile(&mut self, file: FileNum, cachefile: Arc<CacheFile>) {
        self.registry.register(file, cachefile);
    }

    /// Resolves a logged file name against the data directory.
    pub fn data_path(&self, fname: &[u8]) -> Result<PathBuf> {
        resolve_fname(&self.config.data_dir, fname)
    }

    /// Returns a transaction that rolls back against this session's files.
    pub fn transaction(&self, txn_id: TxnId) -> Transaction<'_> {
        Transaction::new(
            txn_id,
            self.config.data_dir.clone(),
            &self.cache,
            &self.registry,
        )
        .with_verify_counts(self.config.verify_counts)
    }

    /// Ends the pass: closes every tree in registration order, then every
    /// remaining file. Fails if any node is still pinned.
    pub fn cleanup(mut self) -> Result<()> {
        let pinned = self.cache.pinned_count();
        if pinned > 0 {
            return Err(ArborError::PinLeak { count: pinned });
        }

        let trees = self.registry.close_all(&self.cache)?;
        self.cache.close()?;
        tracing::info!(trees, "Recovery session closed");
        Ok(())
    }
}

/// Joins a logged file name onto `dir`.
pub(crate) fn resolve_fname(dir: &std::path::Path, fname: &[u8]) -> Result<PathBuf> {
    if fname.is_empty() {
        return Err(ArborError::RecoveryFailed("empty file name in log".to_string()));
    }
    let name = std::str::from_utf8(fname)
        .map_err(|_| ArborError::RecoveryFailed("file name in log is not UTF-8".to_string()))?;
    Ok(dir.join(name))
}
