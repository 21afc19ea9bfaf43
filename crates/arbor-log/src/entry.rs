//! Decoded log entries, one struct per record kind.
//!
//! Every entry carries the LSN it was logged at. Key, value and pivot bytes
//! are owned by the entry; the handler that applies an entry consumes it.

use arbor_common::{DiskOff, FileNum, Lsn};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

/// Types of log records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum LogRecordType {
    /// Transaction commit.
    Commit = 1,
    /// Key delete issued against a tree.
    Delete = 2,
    /// Data file created.
    FileCreate = 3,
    /// Data file opened and assigned a file number.
    FileOpen = 4,
    /// File header written.
    FileHeader = 5,
    /// Node allocated.
    NewNode = 6,
    /// Message added to a child buffer.
    Enqueue = 7,
    /// Message removed from a child buffer.
    Dequeue = 8,
    /// Child added to an internal node.
    AddChild = 9,
    /// Child removed from an internal node.
    DeleteChild = 10,
    /// Child location overwritten.
    SetChild = 11,
    /// Pivot key overwritten.
    SetPivot = 12,
    /// Child subtree fingerprint overwritten.
    ChangeChildFingerprint = 13,
    /// Item inserted into leaf storage.
    InsertInLeaf = 14,
    /// Item removed from leaf storage.
    DeleteInLeaf = 15,
    /// Leaf storage capacity changed.
    ResizeLeafStorage = 16,
    /// Items moved between two leaves.
    RedistributeLeafStorage = 17,
    /// Unnamed root moved.
    ChangeUnnamedRoot = 18,
    /// Named root moved.
    ChangeNamedRoot = 19,
    /// Unused-memory offset moved.
    ChangeUnusedMemory = 20,
}

impl LogRecordType {
    /// Returns a short lowercase name for logging.
    pub fn name(&self) -> &'static str {
        match self {
            LogRecordType::Commit => "commit",
            LogRecordType::Delete => "delete",
            LogRecordType::FileCreate => "file-create",
            LogRecordType::FileOpen => "file-open",
            LogRecordType::FileHeader => "file-header",
            LogRecordType::NewNode => "new-node",
            LogRecordType::Enqueue => "enqueue",
            LogRecordType::Dequeue => "dequeue",
            LogRecordType::AddChild => "add-child",
            LogRecordType::DeleteChild => "delete-child",
            LogRecordType::SetChild => "set-child",
            LogRecordType::SetPivot => "set-pivot",
            LogRecordType::ChangeChildFingerprint => "change-child-fingerprint",
            LogRecordType::InsertInLeaf => "insert-in-leaf",
            LogRecordType::DeleteInLeaf => "delete-in-leaf",
            LogRecordType::ResizeLeafStorage => "resize-leaf-storage",
            LogRecordType::RedistributeLeafStorage => "redistribute-leaf-storage",
            LogRecordType::ChangeUnnamedRoot => "change-unnamed-root",
            LogRecordType::ChangeNamedRoot => "change-named-root",
            LogRecordType::ChangeUnusedMemory => "change-unused-memory",
        }
    }

    /// Returns the record type with the given wire tag.
    pub fn from_tag(value: u8) -> Option<Self> {
        let record_type = match value {
            1 => LogRecordType::Commit,
            2 => LogRecordType::Delete,
            3 => LogRecordType::FileCreate,
            4 => LogRecordType::FileOpen,
            5 => LogRecordType::FileHeader,
            6 => LogRecordType::NewNode,
            7 => LogRecordType::Enqueue,
            8 => LogRecordType::Dequeue,
            9 => LogRecordType::AddChild,
            10 => LogRecordType::DeleteChild,
            11 => LogRecordType::SetChild,
            12 => LogRecordType::SetPivot,
            13 => LogRecordType::ChangeChildFingerprint,
            14 => LogRecordType::InsertInLeaf,
            15 => LogRecordType::DeleteInLeaf,
            16 => LogRecordType::ResizeLeafStorage,
            17 => LogRecordType::RedistributeLeafStorage,
            18 => LogRecordType::ChangeUnnamedRoot,
            19 => LogRecordType::ChangeNamedRoot,
            20 => LogRecordType::ChangeUnusedMemory,
            _ => return None,
        };
        Some(record_type)
    }
}

impl std::fmt::Display for LogRecordType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Root layout as logged in a file header.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoggedRoots {
    /// A single root with no name.
    Unnamed(DiskOff),
    /// Any number of roots keyed by database name.
    Named(Vec<(Bytes, DiskOff)>),
}

impl LoggedRoots {
    /// Returns the logged root count, -1 meaning "one unnamed root".
    pub fn n_named_roots(&self) -> i32 {
        match self {
            LoggedRoots::Unnamed(_) => -1,
            LoggedRoots::Named(roots) => roots.len() as i32,
        }
    }
}

/// File header contents carried by a file-header record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedHeader {
    pub flags: u32,
    pub nodesize: u32,
    pub freelist: DiskOff,
    pub unused_memory: DiskOff,
    pub roots: LoggedRoots,
}

/// Source and destination slot of one moved leaf item.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IndexPair {
    /// Slot in the source leaf.
    pub a: u32,
    /// Slot in the destination leaf.
    pub b: u32,
}

impl IndexPair {
    pub fn new(a: u32, b: u32) -> Self {
        Self { a, b }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Commit {
    pub lsn: Lsn,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delete {
    pub lsn: Lsn,
    pub file: FileNum,
    pub key: Bytes,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileCreate {
    pub lsn: Lsn,
    /// File name relative to the data directory.
    pub fname: Bytes,
    /// Unix permission bits.
    pub mode: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileOpen {
    pub lsn: Lsn,
    pub file: FileNum,
    pub fname: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderEntry {
    pub lsn: Lsn,
    pub file: FileNum,
    pub header: LoggedHeader,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewNode {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub height: u32,
    pub nodesize: u32,
    pub is_dup_sort: bool,
    pub rand4fingerprint: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enqueue {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub childnum: u32,
    pub msg_type: u8,
    pub key: Bytes,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dequeue {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub childnum: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AddChild {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub childnum: u32,
    pub child: DiskOff,
    pub child_fingerprint: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteChild {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub childnum: u32,
    pub child: DiskOff,
    pub child_fingerprint: u32,
    pub pivot_key: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetChild {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub childnum: u32,
    pub old_child: DiskOff,
    pub new_child: DiskOff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SetPivot {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub childnum: u32,
    pub pivot_key: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeChildFingerprint {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub childnum: u32,
    pub old_fingerprint: u32,
    pub new_fingerprint: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InsertInLeaf {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub index: u32,
    pub key: Bytes,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeleteInLeaf {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub index: u32,
    pub key: Bytes,
    pub data: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResizeLeafStorage {
    pub lsn: Lsn,
    pub file: FileNum,
    pub location: DiskOff,
    pub old_size: u32,
    pub new_size: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RedistributeLeafStorage {
    pub lsn: Lsn,
    pub file: FileNum,
    pub old_location: DiskOff,
    pub new_location: DiskOff,
    pub pairs: Vec<IndexPair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUnnamedRoot {
    pub lsn: Lsn,
    pub file: FileNum,
    pub old_root: DiskOff,
    pub new_root: DiskOff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeNamedRoot {
    pub lsn: Lsn,
    pub file: FileNum,
    pub name: Bytes,
    pub old_root: DiskOff,
    pub new_root: DiskOff,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeUnusedMemory {
    pub lsn: Lsn,
    pub file: FileNum,
    pub old_unused: DiskOff,
    pub new_unused: DiskOff,
}

/// A decoded log entry of any kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogEntry {
    Commit(Commit),
    Delete(Delete),
    FileCreate(FileCreate),
    FileOpen(FileOpen),
    FileHeader(HeaderEntry),
    NewNode(NewNode),
    Enqueue(Enqueue),
    Dequeue(Dequeue),
    AddChild(AddChild),
    DeleteChild(DeleteChild),
    SetChild(SetChild),
    SetPivot(SetPivot),
    ChangeChildFingerprint(ChangeChildFingerprint),
    InsertInLeaf(InsertInLeaf),
    DeleteInLeaf(DeleteInLeaf),
    ResizeLeafStorage(ResizeLeafStorage),
    RedistributeLeafStorage(RedistributeLeafStorage),
    ChangeUnnamedRoot(ChangeUnnamedRoot),
    ChangeNamedRoot(ChangeNamedRoot),
    ChangeUnusedMemory(ChangeUnusedMemory),
}

impl LogEntry {
    /// Returns the record type of this entry.
    pub fn kind(&self) -> LogRecordType {
        match self {
            LogEntry::Commit(_) => LogRecordType::Commit,
            LogEntry::Delete(_) => LogRecordType::Delete,
            LogEntry::FileCreate(_) => LogRecordType::FileCreate,
            LogEntry::FileOpen(_) => LogRecordType::FileOpen,
            LogEntry::FileHeader(_) => LogRecordType::FileHeader,
            LogEntry::NewNode(_) => LogRecordType::NewNode,
            LogEntry::Enqueue(_) => LogRecordType::Enqueue,
            LogEntry::Dequeue(_) => LogRecordType::Dequeue,
            LogEntry::AddChild(_) => LogRecordType::AddChild,
            LogEntry::DeleteChild(_) => LogRecordType::DeleteChild,
            LogEntry::SetChild(_) => LogRecordType::SetChild,
            LogEntry::SetPivot(_) => LogRecordType::SetPivot,
            LogEntry::ChangeChildFingerprint(_) => LogRecordType::ChangeChildFingerprint,
            LogEntry::InsertInLeaf(_) => LogRecordType::InsertInLeaf,
            LogEntry::DeleteInLeaf(_) => LogRecordType::DeleteInLeaf,
            LogEntry::ResizeLeafStorage(_) => LogRecordType::ResizeLeafStorage,
            LogEntry::RedistributeLeafStorage(_) => LogRecordType::RedistributeLeafStorage,
            LogEntry::ChangeUnnamedRoot(_) => LogRecordType::ChangeUnnamedRoot,
            LogEntry::ChangeNamedRoot(_) => LogRecordType::ChangeNamedRoot,
            LogEntry::ChangeUnusedMemory(_) => LogRecordType::ChangeUnusedMemory,
        }
    }

    /// Returns the LSN this entry was logged at.
    pub fn lsn(&self) -> Lsn {
        match self {
            LogEntry::Commit(e) => e.lsn,
            LogEntry::Delete(e) => e.lsn,
            LogEntry::FileCreate(e) => e.lsn,
            LogEntry::FileOpen(e) => e.lsn,
            LogEntry::FileHeader(e) => e.lsn,
            LogEntry::NewNode(e) => e.lsn,
            LogEntry::Enqueue(e) => e.lsn,
            LogEntry::Dequeue(e) => e.lsn,
            LogEntry::AddChild(e) => e.lsn,
            LogEntry::DeleteChild(e) => e.lsn,
            LogEntry::SetChild(e) => e.lsn,
            LogEntry::SetPivot(e) => e.lsn,
            LogEntry::ChangeChildFingerprint(e) => e.lsn,
            LogEntry::InsertInLeaf(e) => e.lsn,
            LogEntry::DeleteInLeaf(e) => e.lsn,
            LogEntry::ResizeLeafStorage(e) => e.lsn,
            LogEntry::RedistributeLeafStorage(e) => e.lsn,
            LogEntry::ChangeUnnamedRoot(e) => e.lsn,
            LogEntry::ChangeNamedRoot(e) => e.lsn,
            LogEntry::ChangeUnusedMemory(e) => e.lsn,
        }
    }

    /// Returns the file the entry refers to, if it refers to one.
    pub fn file(&self) -> Option<FileNum> {
        match self {
            LogEntry::Commit(_) | LogEntry::FileCreate(_) => None,
            LogEntry::Delete(e) => Some(e.file),
            LogEntry::FileOpen(e) => Some(e.file),
            LogEntry::FileHeader(e) => Some(e.file),
            LogEntry::NewNode(e) => Some(e.file),
            LogEntry::Enqueue(e) => Some(e.file),
            LogEntry::Dequeue(e) => Some(e.file),
            LogEntry::AddChild(e) => Some(e.file),
            LogEntry::DeleteChild(e) => Some(e.file),
            LogEntry::SetChild(e) => Some(e.file),
            LogEntry::SetPivot(e) => Some(e.file),
            LogEntry::ChangeChildFingerprint(e) => Some(e.file),
            LogEntry::InsertInLeaf(e) => Some(e.file),
            LogEntry::DeleteInLeaf(e) => Some(e.file),
            LogEntry::ResizeLeafStorage(e) => Some(e.file),
            LogEntry::RedistributeLeafStorage(e) => Some(e.file),
            LogEntry::ChangeUnnamedRoot(e) => Some(e.file),
            LogEntry::ChangeNamedRoot(e) => Some(e.file),
            LogEntry::ChangeUnusedMemory(e) => Some(e.file),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_type_tags() {
        for tag in 1..=20u8 {
            let record_type = LogRecordType::from_tag(tag).unwrap();
            assert_eq!(record_type as u8, tag);
        }
        assert!(LogRecordType::from_tag(0).is_none());
        assert!(LogRecordType::from_tag(21).is_none());
    }

    #[test]
    fn test_record_type_display() {
        assert_eq!(LogRecordType::InsertInLeaf.to_string(), "insert-in-leaf");
        assert_eq!(
            LogRecordType::RedistributeLeafStorage.to_string(),
            "redistribute-leaf-storage"
        );
    }

    #[test]
    fn test_logged_roots_count() {
        assert_eq!(LoggedRoots::Unnamed(DiskOff(100)).n_named_roots(), -1);
        let named = LoggedRoots::Named(vec![
            (Bytes::from_static(b"a"), DiskOff(1)),
            (Bytes::from_static(b"b"), DiskOff(2)),
        ]);
        assert_eq!(named.n_named_roots(), 2);
    }

    #[test]
    fn test_entry_accessors() {
        let entry = LogEntry::InsertInLeaf(InsertInLeaf {
            lsn: Lsn(7),
            file: FileNum(1),
            location: DiskOff(100),
            index: 0,
            key: Bytes::from_static(b"a"),
            data: Bytes::from_static(b"1"),
        });
        assert_eq!(entry.kind(), LogRecordType::InsertInLeaf);
        assert_eq!(entry.lsn(), Lsn(7));
        assert_eq!(entry.file(), Some(FileNum(1)));

        let commit = LogEntry::Commit(Commit { lsn: Lsn(8) });
        assert_eq!(commit.file(), None);
    }
}
