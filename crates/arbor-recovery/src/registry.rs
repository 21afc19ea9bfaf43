//! Registry of files opened during recovery.

use arbor_cache::{CacheFile, CacheTable};
use arbor_common::{ArborError, FileNum, Result};
use arbor_tree::{FileHeader, Node, TreeHandle};
use std::sync::Arc;

/// One file seen by recovery: its log-level number, its cache file and,
/// once a file-header record has been replayed, its tree handle.
#[derive(Debug)]
pub struct RegistryEntry {
    file: FileNum,
    cachefile: Arc<CacheFile>,
    tree: Option<TreeHandle>,
}

impl RegistryEntry {
    pub fn file(&self) -> FileNum {
        self.file
    }

    pub fn cachefile(&self) -> &Arc<CacheFile> {
        &self.cachefile
    }

    pub fn tree(&self) -> Option<&TreeHandle> {
        self.tree.as_ref()
    }

    /// Returns the tree handle, failing if no header has been seen yet.
    pub fn tree_mut(&mut self) -> Result<&mut TreeHandle> {
        self.tree.as_mut().ok_or(ArborError::TreeNotOpen(self.file.0))
    }

    /// Installs a new header, creating the tree handle on first use and
    /// replacing the previous header otherwise.
    pub fn install_header(&mut self, header: FileHeader) {
        match &mut self.tree {
            Some(tree) => tree.install_header(header),
            None => {
                self.tree = Some(TreeHandle::new(Arc::clone(&self.cachefile), header));
            }
        }
    }
}

/// Maps log file numbers to cache files and tree handles.
///
/// Entries are kept in registration order and live until teardown.
#[derive(Debug, Default)]
pub struct CacheFileRegistry {
    entries: Vec<RegistryEntry>,
}

impl CacheFileRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an entry with no tree handle.
    pub fn register(&mut self, file: FileNum, cachefile: Arc<CacheFile>) {
        tracing::debug!(%file, cachefile = %cachefile.id(), "Registered cache file");
        self.entries.push(RegistryEntry {
            file,
            cachefile,
            tree: None,
        });
    }

    fn position(&self, file: FileNum) -> Result<usize> {
        self.entries
            .iter()
            .rposition(|entry| entry.file == file)
            .ok_or(ArborError::CacheFileNotFound(file.0))
    }

    /// Returns the entry most recently registered for `file`.
    pub fn find(&self, file: FileNum) -> Result<&RegistryEntry> {
        let index = self.position(file)?;
        Ok(&self.entries[index])
    }

    /// Mutable form of [`CacheFileRegistry::find`].
    pub fn find_mut(&mut self, file: FileNum) -> Result<&mut RegistryEntry> {
        let index = self.position(file)?;
        Ok(&mut self.entries[index])
    }

    /// Returns the cache file for `file`, requiring that its tree is open.
    pub fn tree_cachefile(&self, file: FileNum) -> Result<Arc<CacheFile>> {
        let entry = self.find(file)?;
        if entry.tree.is_none() {
            return Err(ArborError::TreeNotOpen(file.0));
        }
        Ok(Arc::clone(&entry.cachefile))
    }

    /// Iterates over entries in registration order.
    pub fn entries(&self) -> impl Iterator<Item = &RegistryEntry> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Closes every tree handle in registration order and empties the
    /// registry. Returns the number of trees closed.
    pub fn close_all(&mut self, cache: &CacheTable<Node>) -> Result<usize> {
        let mut closed = 0;
        for entry in self.entries.drain(..) {
            if let Some(tree) = entry.tree {
                tree.close(cache)?;
                closed += 1;
            }
        }
        Ok(closed)
    }
}
