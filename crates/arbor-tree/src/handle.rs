//! Recovery-time tree handles.

use crate::header::FileHeader;
use crate::node::Node;
use arbor_cache::{CacheFile, CacheTable};
use arbor_common::Result;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

/// An open tree as seen by recovery.
///
/// Created by the first file-header record of a file and owns that file's
/// current header. Recovery never opens cursors or compares keys, so the
/// handle carries neither.
#[derive(Debug)]
pub struct TreeHandle {
    cachefile: Arc<CacheFile>,
    nodesize: u32,
    flags: u32,
    header: FileHeader,
}

impl TreeHandle {
    /// Creates a handle around a freshly installed header.
    pub fn new(cachefile: Arc<CacheFile>, header: FileHeader) -> Self {
        let mut handle = Self {
            cachefile,
            nodesize: header.nodesize,
            flags: header.flags,
            header,
        };
        handle.header.dirty = true;
        handle
    }

    pub fn cachefile(&self) -> &Arc<CacheFile> {
        &self.cachefile
    }

    pub fn nodesize(&self) -> u32 {
        self.nodesize
    }

    pub fn flags(&self) -> u32 {
        self.flags
    }

    pub fn header(&self) -> &FileHeader {
        &self.header
    }

    /// Replaces the header wholesale, dropping the previous one.
    pub fn install_header(&mut self, header: FileHeader) {
        self.nodesize = header.nodesize;
        self.flags = header.flags;
        self.header = header;
        self.header.dirty = true;
    }

    /// Pins the header for modification.
    pub fn read_and_pin_header(&mut self) -> PinnedHeader<'_> {
        PinnedHeader {
            header: &mut self.header,
        }
    }

    /// Writes the header if dirty, then flushes and closes the tree's file.
    pub fn close(mut self, cache: &CacheTable<Node>) -> Result<()> {
        if self.header.dirty {
            self.header.write_to(&self.cachefile)?;
        }
        cache.close_file(&self.cachefile)?;
        tracing::debug!(
            file = %self.cachefile.id(),
            root = %self.header.unnamed_root,
            "Closed tree"
        );
        Ok(())
    }
}

/// Mutable access to a tree's header; unpinning marks it dirty.
pub struct PinnedHeader<'a> {
    header: &'a mut FileHeader,
}

impl PinnedHeader<'_> {
    /// Releases the header, marking it dirty.
    pub fn unpin(self) {
        self.header.dirty = true;
    }
}

impl Deref for PinnedHeader<'_> {
    type Target = FileHeader;

    fn deref(&self) -> &FileHeader {
        self.header
    }
}

impl DerefMut for PinnedHeader<'_> {
    fn deref_mut(&mut self) -> &mut FileHeader {
        self.header.dirty = true;
        self.header
    }
}
