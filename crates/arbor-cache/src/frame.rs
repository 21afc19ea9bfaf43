//! Cache frame management.

use crate::file::CacheFileId;
use arbor_common::{DiskOff, Result};
use bytes::Bytes;
use parking_lot::Mutex;
use std::sync::Arc;

/// Callbacks a page type supplies to the cache.
///
/// `encode` is the flush callback, `decode` the fetch callback, and
/// `serialized_size` the size estimate reported on every unpin.
pub trait CachePage: Send + Sized + 'static {
    /// Serializes the page for write-back.
    fn encode(&self) -> Bytes;

    /// Rebuilds a page from a block read at `location`.
    fn decode(location: DiskOff, data: &[u8]) -> Result<Self>;

    /// Returns the number of bytes the page occupies once serialized.
    fn serialized_size(&self) -> usize;

    /// Largest block, framing included, the page may occupy on disk.
    /// Write-back refuses larger blocks instead of spilling into the next.
    fn block_limit(&self) -> Option<usize> {
        None
    }
}

/// Key of a cached page: owning file plus byte location.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PageKey {
    pub file: CacheFileId,
    pub location: DiskOff,
}

impl PageKey {
    /// Creates a new page key.
    pub fn new(file: CacheFileId, location: DiskOff) -> Self {
        Self { file, location }
    }
}

impl std::fmt::Display for PageKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.file, self.location)
    }
}

/// A resident page and its bookkeeping.
///
/// The page itself sits behind its own mutex; a pin holds that mutex for
/// its whole lifetime, so a pinned page is exclusively owned by the pin.
pub(crate) struct CacheFrame<P> {
    /// Page contents.
    pub(crate) page: Arc<Mutex<P>>,
    /// Number of outstanding pins (0 or 1).
    pub(crate) pin_count: u32,
    /// Whether the page has been modified since the last write-back.
    pub(crate) dirty: bool,
    /// Serialized size reported at the last pin or unpin.
    pub(crate) size: usize,
}

impl<P> CacheFrame<P> {
    /// Creates a frame for a freshly installed, pinned page.
    pub(crate) fn pinned(page: Arc<Mutex<P>>, size: usize, dirty: bool) -> Self {
        Self {
            page,
            pin_count: 1,
            dirty,
            size,
        }
    }

    /// Returns true if this frame is pinned.
    #[inline]
    pub(crate) fn is_pinned(&self) -> bool {
        self.pin_count > 0
    }
}
