//! Tree structures for Arbor.
//!
//! This crate provides:
//! - Internal and leaf nodes with their cache page codec
//! - Packed, index-addressed leaf storage
//! - Fingerprint and byte accounting for leaf contents
//! - The file header and the recovery-time tree handle

mod buffer;
mod codec;
pub mod constants;
pub mod fingerprint;
mod handle;
mod header;
mod node;
mod pma;

pub use buffer::{BufferedMessage, MessageBuffer};
pub use constants::{LEAF_INITIAL_CAPACITY, LEAF_ITEM_OVERHEAD, MAX_LEAF_CAPACITY};
pub use handle::{PinnedHeader, TreeHandle};
pub use header::FileHeader;
pub use node::{ChildInfo, InternalNode, LeafNode, Node, NodeBody};
pub use pma::{KvPair, PackedStorage};
