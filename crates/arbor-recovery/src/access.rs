//! Node access layer: pinned, typed access to tree nodes in the cache.
//!
//! Every pin is a [`PinnedNode`] guard; dropping it on an error path
//! releases the pin with the node's current size, so no handler can leak
//! one.

use arbor_cache::{CacheFile, CacheTable, PinnedPage};
use arbor_common::{ArborError, DiskOff, Result};
use arbor_tree::{fingerprint, Node};

/// A pinned tree node.
pub type PinnedNode<'a> = PinnedPage<'a, Node>;

/// Pins the node at `location`, fetching it from disk if needed.
pub fn pin_node<'a>(
    cache: &'a CacheTable<Node>,
    cachefile: &CacheFile,
    location: DiskOff,
) -> Result<PinnedNode<'a>> {
    cache.get_and_pin(cachefile, location)
}

/// Pins a node that must be a leaf.
pub fn pin_leaf<'a>(
    cache: &'a CacheTable<Node>,
    cachefile: &CacheFile,
    location: DiskOff,
) -> Result<PinnedNode<'a>> {
    let node = pin_node(cache, cachefile, location)?;
    if !node.is_leaf() {
        return Err(ArborError::InvalidNodeType {
            expected: "leaf",
            height: node.height,
        });
    }
    Ok(node)
}

/// Pins a node that must be internal.
pub fn pin_internal<'a>(
    cache: &'a CacheTable<Node>,
    cachefile: &CacheFile,
    location: DiskOff,
) -> Result<PinnedNode<'a>> {
    let node = pin_node(cache, cachefile, location)?;
    if node.is_leaf() {
        return Err(ArborError::InvalidNodeType {
            expected: "internal",
            height: node.height,
        });
    }
    Ok(node)
}

/// Installs a freshly built node without fetching; it comes back pinned.
pub fn put_node<'a>(
    cache: &'a CacheTable<Node>,
    cachefile: &CacheFile,
    node: Node,
) -> Result<PinnedNode<'a>> {
    let location = node.location;
    cache.put(cachefile, location, node)
}

/// Releases a modified node, reporting its current serialized size.
pub fn unpin_node(node: PinnedNode<'_>) -> Result<()> {
    node.unpin(true)
}

/// Recounts a leaf when `enabled`, failing on drift.
pub fn check_counts(node: &Node, enabled: bool) -> Result<()> {
    if enabled && node.is_leaf() {
        fingerprint::verify_counts(node)?;
    }
    Ok(())
}
