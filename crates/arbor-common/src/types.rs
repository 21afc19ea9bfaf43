//! Identifiers shared by the log, the cache and the tree layers.

use serde::{Deserialize, Serialize};

/// Identifier a log uses to refer to an open tree file.
///
/// File numbers are assigned when a file is opened and are only meaningful
/// within the log that assigned them.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct FileNum(pub u32);

impl std::fmt::Display for FileNum {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "file:{}", self.0)
    }
}

/// Byte offset of a node inside a tree file.
///
/// Location 0 is reserved for the file header; every node lives at a
/// non-zero offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct DiskOff(pub u64);

impl DiskOff {
    /// Location of the file header block.
    pub const HEADER: DiskOff = DiskOff(0);

    /// Returns true if this is the header location.
    pub fn is_header(&self) -> bool {
        *self == Self::HEADER
    }
}

impl std::fmt::Display for DiskOff {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "@{}", self.0)
    }
}

/// Log Sequence Number - position of a record in the log.
///
/// Every node remembers the LSN of the last record applied to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Lsn(pub u64);

impl Lsn {
    /// Invalid/uninitialized LSN.
    pub const INVALID: Lsn = Lsn(0);

    /// Returns true if this is a valid LSN.
    pub fn is_valid(&self) -> bool {
        self.0 > 0
    }
}

impl std::fmt::Display for Lsn {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "lsn:{}", self.0)
    }
}

/// Transaction identifier carried by every log record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct TxnId(pub u64);

impl std::fmt::Display for TxnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "txn:{}", self.0)
    }
}
