//! Tree layout constants.

/// Per-item bookkeeping cost of a packed-storage slot.
pub const PMA_ITEM_OVERHEAD: u32 = 4;

/// Per-item cost of the key and value length prefixes.
pub const KEY_VALUE_OVERHEAD: u32 = 8;

/// Bytes a leaf item contributes beyond its key and value.
pub const LEAF_ITEM_OVERHEAD: u32 = PMA_ITEM_OVERHEAD + KEY_VALUE_OVERHEAD;

/// Slot capacity of the packed storage in a freshly created leaf.
pub const LEAF_INITIAL_CAPACITY: usize = 4;

/// Largest leaf slot capacity, on disk or after a resize.
pub const MAX_LEAF_CAPACITY: usize = 1 << 20;

/// Node layout version written by this crate.
pub const LAYOUT_VERSION: u32 = 1;

/// Tree and node flag: duplicate keys are sorted by value.
pub const FLAG_DUP_SORT: u32 = 0x2;

/// Magic number at the start of every serialized node ("ARBN").
pub(crate) const NODE_MAGIC: u32 = 0x4E42_5241;

/// Magic number at the start of the file header block ("ARBH").
pub(crate) const HEADER_MAGIC: u32 = 0x4842_5241;
