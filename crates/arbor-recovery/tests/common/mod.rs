//! Shared log builders for recovery integration tests.

#![allow(dead_code)]

use arbor_common::{DiskOff, FileNum, Lsn, RecoveryConfig, TxnId};
use arbor_log::entry::*;
use arbor_log::{IndexPair, LogEntry, LogRecord, LoggedHeader, LoggedRoots};
use arbor_recovery::access::pin_node;
use arbor_recovery::RecoverySession;
use arbor_tree::Node;
use bytes::Bytes;
use std::path::Path;
use std::sync::Arc;

pub const NODESIZE: u32 = 4096;

/// Sends handler logs to the test harness; filter with `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub fn config(dir: &Path) -> RecoveryConfig {
    let mut config = RecoveryConfig::new(dir.join("log"), dir);
    config.cache_size_bytes = Some(1 << 25);
    config.verify_counts = true;
    config
}

pub fn b(s: &str) -> Bytes {
    Bytes::copy_from_slice(s.as_bytes())
}

pub fn record(entry: LogEntry) -> LogRecord {
    LogRecord::new(TxnId(1), entry)
}

pub fn file_create(lsn: u64, fname: &str) -> LogRecord {
    record(LogEntry::FileCreate(FileCreate {
        lsn: Lsn(lsn),
        fname: b(fname),
        mode: 0o644,
    }))
}

pub fn file_open(lsn: u64, file: FileNum, fname: &str) -> LogRecord {
    record(LogEntry::FileOpen(FileOpen {
        lsn: Lsn(lsn),
        file,
        fname: b(fname),
    }))
}

pub fn file_header(lsn: u64, file: FileNum, root: DiskOff) -> LogRecord {
    record(LogEntry::FileHeader(HeaderEntry {
        lsn: Lsn(lsn),
        file,
        header: LoggedHeader {
            flags: 0,
            nodesize: NODESIZE,
            freelist: DiskOff(0),
            unused_memory: DiskOff(1 << 20),
            roots: LoggedRoots::Unnamed(root),
        },
    }))
}

/// Create, open and header records for a fresh tree file.
pub fn open_tree(first_lsn: u64, file: FileNum, fname: &str, root: DiskOff) -> Vec<LogRecord> {
    vec![
        file_create(first_lsn, fname),
        file_open(first_lsn + 1, file, fname),
        file_header(first_lsn + 2, file, root),
    ]
}

pub fn new_node(lsn: u64, file: FileNum, location: DiskOff, height: u32, seed: u32) -> LogRecord {
    record(LogEntry::NewNode(NewNode {
        lsn: Lsn(lsn),
        file,
        location,
        height,
        nodesize: NODESIZE,
        is_dup_sort: false,
        rand4fingerprint: seed,
    }))
}

pub fn insert(lsn: u64, file: FileNum, location: DiskOff, index: u32, key: &str, data: &str) -> LogRecord {
    record(LogEntry::InsertInLeaf(InsertInLeaf {
        lsn: Lsn(lsn),
        file,
        location,
        index,
        key: b(key),
        data: b(data),
    }))
}

pub fn delete(lsn: u64, file: FileNum, location: DiskOff, index: u32, key: &str, data: &str) -> LogRecord {
    record(LogEntry::DeleteInLeaf(DeleteInLeaf {
        lsn: Lsn(lsn),
        file,
        location,
        index,
        key: b(key),
        data: b(data),
    }))
}

pub fn resize(lsn: u64, file: FileNum, location: DiskOff, old_size: u32, new_size: u32) -> LogRecord {
    record(LogEntry::ResizeLeafStorage(ResizeLeafStorage {
        lsn: Lsn(lsn),
        file,
        location,
        old_size,
        new_size,
    }))
}

pub fn redistribute(
    lsn: u64,
    file: FileNum,
    old_location: DiskOff,
    new_location: DiskOff,
    pairs: &[(u32, u32)],
) -> LogRecord {
    record(LogEntry::RedistributeLeafStorage(RedistributeLeafStorage {
        lsn: Lsn(lsn),
        file,
        old_location,
        new_location,
        pairs: pairs.iter().map(|&(a, b)| IndexPair::new(a, b)).collect(),
    }))
}

/// Runs `f` against the node at `location`, pinned for the call.
pub fn with_node<T>(
    session: &RecoverySession,
    file: FileNum,
    location: DiskOff,
    f: impl FnOnce(&Node) -> T,
) -> T {
    let cachefile = Arc::clone(session.registry().find(file).unwrap().cachefile());
    let node = pin_node(session.cache(), &cachefile, location).unwrap();
    let out = f(&node);
    node.unpin(false).unwrap();
    out
}

/// The leaf's live items in slot order.
pub fn leaf_items(node: &Node) -> Vec<(usize, Bytes, Bytes)> {
    node.leaf()
        .unwrap()
        .storage()
        .iter()
        .map(|(index, pair)| (index, pair.key.clone(), pair.value.clone()))
        .collect()
}
