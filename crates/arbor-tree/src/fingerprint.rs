//! Fingerprint and byte accounting for leaf contents.
//!
//! A leaf's `local_fingerprint` is the wrapping sum of
//! `rand4fingerprint * crc(key, value)` over its live items, and its
//! `n_bytes_in_buffer` is the sum of [`leaf_item_size`] over the same items.
//! Every function here changes storage and both counters together, so the
//! same code serves replay and rollback with opposite signs.

use crate::constants::LEAF_ITEM_OVERHEAD;
use crate::node::{LeafNode, Node, NodeBody};
use crate::pma::KvPair;
use arbor_common::{ArborError, Result};
use arbor_log::IndexPair;
use bytes::Bytes;

/// CRC32 of a key/value pair, each part prefixed by its length.
pub fn kv_pair_crc(key: &[u8], value: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&(key.len() as u32).to_be_bytes());
    hasher.update(key);
    hasher.update(&(value.len() as u32).to_be_bytes());
    hasher.update(value);
    hasher.finalize()
}

/// Contribution of one item to a node's fingerprint.
#[inline]
pub fn fingerprint_term(seed: u32, key: &[u8], value: &[u8]) -> u32 {
    seed.wrapping_mul(kv_pair_crc(key, value))
}

/// Contribution of one item to a leaf's byte count.
pub fn leaf_item_size(key: &[u8], value: &[u8]) -> Result<u32> {
    let len = key.len() + value.len();
    u32::try_from(len)
        .ok()
        .and_then(|len| len.checked_add(LEAF_ITEM_OVERHEAD))
        .ok_or_else(|| ArborError::TreeCorrupted(format!("leaf item of {} bytes too large", len)))
}

/// Mutable view of the parts of a leaf node that move together.
struct LeafParts<'a> {
    leaf: &'a mut LeafNode,
    fingerprint: &'a mut u32,
    seed: u32,
}

impl LeafParts<'_> {
    fn add(&mut self, key: &[u8], value: &[u8], size: u32) {
        *self.fingerprint = self
            .fingerprint
            .wrapping_add(fingerprint_term(self.seed, key, value));
        self.leaf.n_bytes_in_buffer = self.leaf.n_bytes_in_buffer.wrapping_add(size);
    }

    fn subtract(&mut self, key: &[u8], value: &[u8], size: u32) {
        *self.fingerprint = self
            .fingerprint
            .wrapping_sub(fingerprint_term(self.seed, key, value));
        self.leaf.n_bytes_in_buffer = self.leaf.n_bytes_in_buffer.wrapping_sub(size);
    }
}

fn leaf_parts(node: &mut Node) -> Result<LeafParts<'_>> {
    let height = node.height;
    match &mut node.body {
        NodeBody::Leaf(leaf) => Ok(LeafParts {
            leaf,
            fingerprint: &mut node.local_fingerprint,
            seed: node.rand4fingerprint,
        }),
        NodeBody::Internal(_) => Err(ArborError::InvalidNodeType {
            expected: "leaf",
            height,
        }),
    }
}

/// Stores `key`/`value` at `index` and adds its fingerprint term and size.
///
/// An item that would overflow the node's block is refused and the leaf
/// left unchanged.
pub fn insert_item(node: &mut Node, index: usize, key: Bytes, value: Bytes) -> Result<()> {
    let size = leaf_item_size(&key, &value)?;
    leaf_parts(node)?
        .leaf
        .storage
        .set_at_index(index, key.clone(), value.clone())?;
    if let Err(e) = node.check_fits() {
        leaf_parts(node)?.leaf.storage.clear_at_index(index)?;
        return Err(e);
    }
    leaf_parts(node)?.add(&key, &value, size);
    Ok(())
}

/// Clears slot `index`, which must hold `key`/`value`, and subtracts its
/// fingerprint term and size.
pub fn remove_item(node: &mut Node, index: usize, key: &[u8], value: &[u8]) -> Result<()> {
    let size = leaf_item_size(key, value)?;
    let mut parts = leaf_parts(node)?;
    match parts.leaf.storage.get(index) {
        Some(pair) if pair.key == key && pair.value == value => {}
        Some(_) => {
            return Err(ArborError::TreeCorrupted(format!(
                "leaf slot {} does not hold the logged item",
                index
            )))
        }
        None => {
            let limit = parts.leaf.storage.index_limit();
            return Err(if index >= limit {
                ArborError::IndexOutOfRange { index, limit }
            } else {
                ArborError::SlotEmpty(index)
            });
        }
    }
    parts.leaf.storage.clear_at_index(index)?;
    parts.subtract(key, value, size);
    Ok(())
}

fn shift_counts(from: &mut LeafParts<'_>, to: &mut LeafParts<'_>, moved: &[KvPair]) -> Result<()> {
    let sizes = moved
        .iter()
        .map(|pair| leaf_item_size(&pair.key, &pair.value))
        .collect::<Result<Vec<_>>>()?;
    for (pair, size) in moved.iter().zip(sizes) {
        from.subtract(&pair.key, &pair.value, size);
        to.add(&pair.key, &pair.value, size);
    }
    Ok(())
}

fn move_forward(source: &mut Node, dest: &mut Node, pairs: &[IndexPair]) -> Result<()> {
    let mut from = leaf_parts(source)?;
    let mut to = leaf_parts(dest)?;
    let moved = from.leaf.storage.move_indices(&mut to.leaf.storage, pairs)?;
    shift_counts(&mut from, &mut to, &moved)
}

fn move_back(source: &mut Node, dest: &mut Node, pairs: &[IndexPair]) -> Result<()> {
    let mut back_to = leaf_parts(source)?;
    let mut back_from = leaf_parts(dest)?;
    let moved = back_to
        .leaf
        .storage
        .move_indices_back(&mut back_from.leaf.storage, pairs)?;
    shift_counts(&mut back_from, &mut back_to, &moved)
}

/// Moves the items at each `pair.a` of `source` to `pair.b` of `dest`.
///
/// Every pair is validated before anything moves. Each node keeps its own
/// seed, so fingerprint terms are recomputed on arrival; byte counts are
/// conserved across the pair. A move that overflows `dest`'s block is
/// reverted.
pub fn redistribute(source: &mut Node, dest: &mut Node, pairs: &[IndexPair]) -> Result<()> {
    move_forward(source, dest, pairs)?;
    if let Err(e) = dest.check_fits() {
        move_back(source, dest, pairs)?;
        return Err(e);
    }
    Ok(())
}

/// Moves the items at each `pair.b` of `dest` back to `pair.a` of `source`,
/// undoing [`redistribute`].
pub fn redistribute_back(source: &mut Node, dest: &mut Node, pairs: &[IndexPair]) -> Result<()> {
    move_back(source, dest, pairs)?;
    if let Err(e) = source.check_fits() {
        move_forward(source, dest, pairs)?;
        return Err(e);
    }
    Ok(())
}

/// Recomputes a leaf's fingerprint and byte count from its storage.
pub fn recount(node: &Node) -> Result<(u32, u32)> {
    let leaf = node.leaf()?;
    let mut fingerprint = 0u32;
    let mut n_bytes = 0u32;
    for (_, pair) in leaf.storage.iter() {
        fingerprint =
            fingerprint.wrapping_add(fingerprint_term(node.rand4fingerprint, &pair.key, &pair.value));
        n_bytes = n_bytes.wrapping_add(leaf_item_size(&pair.key, &pair.value)?);
    }
    Ok((fingerprint, n_bytes))
}

/// Checks that a leaf's counters match its storage.
pub fn verify_counts(node: &Node) -> Result<()> {
    let (fingerprint, n_bytes) = recount(node)?;
    let leaf = node.leaf()?;
    if fingerprint != node.local_fingerprint || n_bytes != leaf.n_bytes_in_buffer {
        return Err(ArborError::TreeCorrupted(format!(
            "leaf {} counts drifted: fingerprint {:#010x} (stored {:#010x}), bytes {} (stored {})",
            node.location, fingerprint, node.local_fingerprint, n_bytes, leaf.n_bytes_in_buffer
        )));
    }
    Ok(())
}
