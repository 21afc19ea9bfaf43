//! Tree nodes and their cache page codec.
//!
//! Serialized node layout (all integers little-endian):
//! ```text
//! +----------------------------+
//! | magic: u32                 |
//! | layout_version: u32        |
//! | height: u32                |
//! | nodesize: u32              |
//! | flags: u32                 |
//! | rand4fingerprint: u32      |
//! | local_fingerprint: u32     |
//! | lsn: u64                   |  (log_lsn at flush time)
//! +----------------------------+ 36
//! | body                       |
//! +----------------------------+
//! ```
//! Internal body: `n_children: u32`, then per child `location: u64`,
//! `subtree_fingerprint: u32`, `n_bytes_in_buffer: u32`, message buffer;
//! then `total_pivot_len: u32`, `n_pivots: u32` and per pivot a presence
//! byte followed by the key bytes when present.
//!
//! Leaf body: `capacity: u32`, `n_bytes_in_buffer: u32`, `n_entries: u32`,
//! then per entry `index: u32`, key bytes, value bytes.

use crate::buffer::MessageBuffer;
use crate::codec::{bytes_size, put_bytes, BlockReader};
use crate::constants::{
    FLAG_DUP_SORT, LAYOUT_VERSION, LEAF_INITIAL_CAPACITY, MAX_LEAF_CAPACITY, NODE_MAGIC,
};
use crate::pma::PackedStorage;
use arbor_cache::{CacheFile, CachePage};
use arbor_common::{ArborError, DiskOff, Lsn, Result};
use bytes::{BufMut, Bytes, BytesMut};

/// One child slot of an internal node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChildInfo {
    /// Location of the child node.
    pub location: DiskOff,
    /// Fingerprint of the whole subtree under the child.
    pub subtree_fingerprint: u32,
    /// Bytes of buffered messages waiting for this child.
    pub n_bytes_in_buffer: u32,
    /// Buffered messages waiting for this child.
    pub buffer: MessageBuffer,
}

impl ChildInfo {
    /// Creates a child slot with an empty buffer.
    pub fn new(location: DiskOff, subtree_fingerprint: u32) -> Self {
        Self {
            location,
            subtree_fingerprint,
            n_bytes_in_buffer: 0,
            buffer: MessageBuffer::new(),
        }
    }

    fn encoded_size(&self) -> usize {
        8 + 4 + 4 + self.buffer.encoded_size()
    }
}

/// Body of an internal (height > 0) node.
///
/// Pivot `i` separates child `i` from child `i + 1`, so a node with
/// children always holds one fewer pivot than children. A pivot slot is
/// `None` between an add-child and the set-pivot that fills it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InternalNode {
    children: Vec<ChildInfo>,
    pivots: Vec<Option<Bytes>>,
    total_pivot_len: u32,
}

fn pivot_len(pivot: &Option<Bytes>) -> u32 {
    pivot.as_ref().map_or(0, |key| key.len() as u32)
}

impl InternalNode {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn n_children(&self) -> usize {
        self.children.len()
    }

    pub fn children(&self) -> &[ChildInfo] {
        &self.children
    }

    pub fn child(&self, childnum: usize) -> Option<&ChildInfo> {
        self.children.get(childnum)
    }

    pub fn pivots(&self) -> &[Option<Bytes>] {
        &self.pivots
    }

    /// Summed length of all pivot keys.
    pub fn total_pivot_len(&self) -> u32 {
        self.total_pivot_len
    }

    fn child_mut(&mut self, childnum: usize) -> Result<&mut ChildInfo> {
        let limit = self.children.len();
        self.children
            .get_mut(childnum)
            .ok_or(ArborError::IndexOutOfRange {
                index: childnum,
                limit,
            })
    }

    /// Inserts a child at `childnum` together with an empty pivot before it.
    ///
    /// The first child of an empty node gets no pivot. Later children may
    /// not be inserted in front of child 0.
    pub fn add_child(&mut self, childnum: usize, location: DiskOff, fingerprint: u32) -> Result<()> {
        let n = self.children.len();
        if childnum > n {
            return Err(ArborError::IndexOutOfRange {
                index: childnum,
                limit: n + 1,
            });
        }
        if n > 0 && childnum == 0 {
            return Err(ArborError::TreeCorrupted(
                "cannot add a child in front of child 0".to_string(),
            ));
        }

        self.children.insert(childnum, ChildInfo::new(location, fingerprint));
        if n > 0 {
            self.pivots.insert(childnum - 1, None);
        }
        Ok(())
    }

    /// Removes child `childnum` and the pivot before it.
    ///
    /// The caller's view of the child (location and fingerprint) must match
    /// the node, the child's buffer must be empty, and at least two children
    /// must remain. Returns the removed pivot.
    pub fn delete_child(
        &mut self,
        childnum: usize,
        location: DiskOff,
        fingerprint: u32,
    ) -> Result<Option<Bytes>> {
        let n = self.children.len();
        let child = self.child(childnum).ok_or(ArborError::IndexOutOfRange {
            index: childnum,
            limit: n,
        })?;

        if child.subtree_fingerprint != fingerprint {
            return Err(ArborError::TreeCorrupted(format!(
                "child {} fingerprint is {:#010x}, expected {:#010x}",
                childnum, child.subtree_fingerprint, fingerprint
            )));
        }
        if child.location != location {
            return Err(ArborError::TreeCorrupted(format!(
                "child {} is at {}, expected {}",
                childnum, child.location, location
            )));
        }
        if !child.buffer.is_empty() || child.n_bytes_in_buffer != 0 {
            return Err(ArborError::TreeCorrupted(format!(
                "child {} still has {} buffered messages",
                childnum,
                child.buffer.n_entries()
            )));
        }
        if n <= 2 {
            return Err(ArborError::TreeCorrupted(format!(
                "deleting a child would leave {} children",
                n - 1
            )));
        }
        if childnum == 0 {
            return Err(ArborError::TreeCorrupted(
                "child 0 has no preceding pivot".to_string(),
            ));
        }

        let pivot = self.pivots.remove(childnum - 1);
        self.total_pivot_len = self.total_pivot_len.wrapping_sub(pivot_len(&pivot));
        self.children.remove(childnum);
        Ok(pivot)
    }

    /// Points child `childnum` at a new location.
    pub fn set_child(&mut self, childnum: usize, location: DiskOff) -> Result<()> {
        self.child_mut(childnum)?.location = location;
        Ok(())
    }

    /// Overwrites the subtree fingerprint of child `childnum`.
    pub fn set_child_fingerprint(&mut self, childnum: usize, fingerprint: u32) -> Result<()> {
        self.child_mut(childnum)?.subtree_fingerprint = fingerprint;
        Ok(())
    }

    /// Replaces pivot `childnum`, keeping the pivot length total exact.
    pub fn set_pivot(&mut self, childnum: usize, key: Bytes) -> Result<()> {
        let limit = self.pivots.len();
        let slot = self
            .pivots
            .get_mut(childnum)
            .ok_or(ArborError::IndexOutOfRange {
                index: childnum,
                limit,
            })?;
        let new_pivot = Some(key);
        self.total_pivot_len = self
            .total_pivot_len
            .wrapping_sub(pivot_len(slot))
            .wrapping_add(pivot_len(&new_pivot));
        *slot = new_pivot;
        Ok(())
    }

    fn encoded_size(&self) -> usize {
        let children: usize = self.children.iter().map(ChildInfo::encoded_size).sum();
        let pivots: usize = self
            .pivots
            .iter()
            .map(|p| 1 + p.as_ref().map_or(0, |key| bytes_size(key)))
            .sum();
        4 + children + 4 + 4 + pivots
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.children.len() as u32);
        for child in &self.children {
            buf.put_u64_le(child.location.0);
            buf.put_u32_le(child.subtree_fingerprint);
            buf.put_u32_le(child.n_bytes_in_buffer);
            child.buffer.encode(buf);
        }
        buf.put_u32_le(self.total_pivot_len);
        buf.put_u32_le(self.pivots.len() as u32);
        for pivot in &self.pivots {
            match pivot {
                Some(key) => {
                    buf.put_u8(1);
                    put_bytes(buf, key);
                }
                None => buf.put_u8(0),
            }
        }
    }

    fn decode(reader: &mut BlockReader<'_>) -> Result<Self> {
        let n_children = reader.count(20)?;
        let mut children = Vec::with_capacity(n_children);
        for _ in 0..n_children {
            let location = reader.off()?;
            let subtree_fingerprint = reader.u32()?;
            let n_bytes_in_buffer = reader.u32()?;
            let buffer = MessageBuffer::decode(reader)?;
            children.push(ChildInfo {
                location,
                subtree_fingerprint,
                n_bytes_in_buffer,
                buffer,
            });
        }

        let total_pivot_len = reader.u32()?;
        let n_pivots = reader.count(1)?;
        if n_pivots != n_children.saturating_sub(1) {
            return Err(reader.corrupted(format!(
                "{} pivots for {} children",
                n_pivots, n_children
            )));
        }
        let mut pivots = Vec::with_capacity(n_pivots);
        for _ in 0..n_pivots {
            let pivot = match reader.u8()? {
                0 => None,
                1 => Some(reader.bytes()?),
                tag => return Err(reader.corrupted(format!("invalid pivot tag {}", tag))),
            };
            pivots.push(pivot);
        }

        Ok(Self {
            children,
            pivots,
            total_pivot_len,
        })
    }
}

/// Body of a leaf (height 0) node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeafNode {
    pub(crate) storage: PackedStorage,
    pub(crate) n_bytes_in_buffer: u32,
}

impl LeafNode {
    /// Creates an empty leaf with `capacity` storage slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            storage: PackedStorage::new(capacity),
            n_bytes_in_buffer: 0,
        }
    }

    pub fn storage(&self) -> &PackedStorage {
        &self.storage
    }

    /// Bytes occupied by the leaf's items, overhead included.
    pub fn n_bytes_in_buffer(&self) -> u32 {
        self.n_bytes_in_buffer
    }

    /// Resizes the storage. Capacity changes carry no fingerprint.
    pub fn resize_storage(&mut self, old_size: usize, new_size: usize) -> Result<()> {
        if new_size > MAX_LEAF_CAPACITY {
            return Err(ArborError::IndexOutOfRange {
                index: new_size,
                limit: MAX_LEAF_CAPACITY,
            });
        }
        self.storage.resize_exactly(old_size, new_size)
    }

    fn encoded_size(&self) -> usize {
        let entries: usize = self
            .storage
            .iter()
            .map(|(_, pair)| 4 + bytes_size(&pair.key) + bytes_size(&pair.value))
            .sum();
        4 + 4 + 4 + entries
    }

    fn encode(&self, buf: &mut BytesMut) {
        buf.put_u32_le(self.storage.index_limit() as u32);
        buf.put_u32_le(self.n_bytes_in_buffer);
        buf.put_u32_le(self.storage.n_entries() as u32);
        for (index, pair) in self.storage.iter() {
            buf.put_u32_le(index as u32);
            put_bytes(buf, &pair.key);
            put_bytes(buf, &pair.value);
        }
    }

    fn decode(reader: &mut BlockReader<'_>) -> Result<Self> {
        let capacity = reader.u32()? as usize;
        if capacity > MAX_LEAF_CAPACITY {
            return Err(reader.corrupted(format!("leaf capacity {} too large", capacity)));
        }
        let n_bytes_in_buffer = reader.u32()?;
        let n_entries = reader.count(12)?;

        let mut storage = PackedStorage::new(capacity);
        for _ in 0..n_entries {
            let index = reader.u32()? as usize;
            let key = reader.bytes()?;
            let value = reader.bytes()?;
            storage
                .set_at_index(index, key, value)
                .map_err(|e| reader.corrupted(format!("leaf entry: {}", e)))?;
        }

        Ok(Self {
            storage,
            n_bytes_in_buffer,
        })
    }
}

/// Node body, chosen by height.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NodeBody {
    Internal(InternalNode),
    Leaf(LeafNode),
}

/// A tree node as held in the cache.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Node {
    pub nodesize: u32,
    /// Location of this node in its file; its cache key.
    pub location: DiskOff,
    /// LSN of the last log record applied to this node.
    pub log_lsn: Lsn,
    /// LSN the on-disk image of this node reflects.
    pub disk_lsn: Lsn,
    pub layout_version: u32,
    pub height: u32,
    /// Per-node fingerprint seed, fixed at creation.
    pub rand4fingerprint: u32,
    /// Sum of `rand4fingerprint * crc(key, value)` over the live leaf items.
    pub local_fingerprint: u32,
    pub flags: u32,
    pub dirty: bool,
    pub body: NodeBody,
}

impl Node {
    /// Fixed size of the serialized node header.
    pub const HEADER_SIZE: usize = 36;

    /// Creates an empty node as logged by a new-node record.
    ///
    /// Height 0 builds a leaf with [`LEAF_INITIAL_CAPACITY`] slots; any other
    /// height builds an internal node with no children.
    pub fn create(
        location: DiskOff,
        height: u32,
        nodesize: u32,
        rand4fingerprint: u32,
        is_dup_sort: bool,
        lsn: Lsn,
    ) -> Self {
        let body = if height == 0 {
            NodeBody::Leaf(LeafNode::new(LEAF_INITIAL_CAPACITY))
        } else {
            NodeBody::Internal(InternalNode::new())
        };
        Self {
            nodesize,
            location,
            log_lsn: lsn,
            disk_lsn: lsn,
            layout_version: LAYOUT_VERSION,
            height,
            rand4fingerprint,
            local_fingerprint: 0,
            flags: if is_dup_sort { FLAG_DUP_SORT } else { 0 },
            dirty: true,
            body,
        }
    }

    #[inline]
    pub fn is_leaf(&self) -> bool {
        self.height == 0
    }

    pub fn leaf(&self) -> Result<&LeafNode> {
        match &self.body {
            NodeBody::Leaf(leaf) => Ok(leaf),
            NodeBody::Internal(_) => Err(self.wrong_kind("leaf")),
        }
    }

    pub fn leaf_mut(&mut self) -> Result<&mut LeafNode> {
        let height = self.height;
        match &mut self.body {
            NodeBody::Leaf(leaf) => Ok(leaf),
            NodeBody::Internal(_) => Err(ArborError::InvalidNodeType {
                expected: "leaf",
                height,
            }),
        }
    }

    pub fn internal(&self) -> Result<&InternalNode> {
        match &self.body {
            NodeBody::Internal(internal) => Ok(internal),
            NodeBody::Leaf(_) => Err(self.wrong_kind("internal")),
        }
    }

    pub fn internal_mut(&mut self) -> Result<&mut InternalNode> {
        let height = self.height;
        match &mut self.body {
            NodeBody::Internal(internal) => Ok(internal),
            NodeBody::Leaf(_) => Err(ArborError::InvalidNodeType {
                expected: "internal",
                height,
            }),
        }
    }

    fn wrong_kind(&self, expected: &'static str) -> ArborError {
        ArborError::InvalidNodeType {
            expected,
            height: self.height,
        }
    }

    /// Records that the log record at `lsn` has been applied.
    pub fn mark_applied(&mut self, lsn: Lsn) {
        self.log_lsn = lsn;
        self.dirty = true;
    }

    /// Fails if the serialized node no longer fits its `nodesize` block.
    pub fn check_fits(&self) -> Result<()> {
        let size = CacheFile::block_size(self.serialized_size());
        if size > self.nodesize as usize {
            return Err(ArborError::PageTooLarge {
                location: self.location.0,
                size,
                limit: self.nodesize as usize,
            });
        }
        Ok(())
    }
}

impl CachePage for Node {
    fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.serialized_size());
        buf.put_u32_le(NODE_MAGIC);
        buf.put_u32_le(self.layout_version);
        buf.put_u32_le(self.height);
        buf.put_u32_le(self.nodesize);
        buf.put_u32_le(self.flags);
        buf.put_u32_le(self.rand4fingerprint);
        buf.put_u32_le(self.local_fingerprint);
        buf.put_u64_le(self.log_lsn.0);
        match &self.body {
            NodeBody::Internal(internal) => internal.encode(&mut buf),
            NodeBody::Leaf(leaf) => leaf.encode(&mut buf),
        }
        buf.freeze()
    }

    fn decode(location: DiskOff, data: &[u8]) -> Result<Self> {
        let mut reader = BlockReader::new(location, data);

        let magic = reader.u32()?;
        if magic != NODE_MAGIC {
            return Err(reader.corrupted(format!("bad node magic {:#010x}", magic)));
        }
        let layout_version = reader.u32()?;
        if layout_version != LAYOUT_VERSION {
            return Err(reader.corrupted(format!(
                "unsupported layout version {}",
                layout_version
            )));
        }
        let height = reader.u32()?;
        let nodesize = reader.u32()?;
        let flags = reader.u32()?;
        let rand4fingerprint = reader.u32()?;
        let local_fingerprint = reader.u32()?;
        let lsn = Lsn(reader.u64()?);

        let body = if height == 0 {
            NodeBody::Leaf(LeafNode::decode(&mut reader)?)
        } else {
            NodeBody::Internal(InternalNode::decode(&mut reader)?)
        };
        reader.finish()?;

        Ok(Self {
            nodesize,
            location,
            log_lsn: lsn,
            disk_lsn: lsn,
            layout_version,
            height,
            rand4fingerprint,
            local_fingerprint,
            flags,
            dirty: false,
            body,
        })
    }

    fn serialized_size(&self) -> usize {
        Self::HEADER_SIZE
            + match &self.body {
                NodeBody::Internal(internal) => internal.encoded_size(),
                NodeBody::Leaf(leaf) => leaf.encoded_size(),
            }
    }

    fn block_limit(&self) -> Option<usize> {
        Some(self.nodesize as usize)
    }
}
