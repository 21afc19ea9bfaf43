//! Redo and rollback handlers against a live recovery session.

mod common;

use arbor_cache::CacheTable;
use arbor_common::{ArborError, CacheConfig, DiskOff, FileNum, Lsn, TxnId};
use arbor_log::entry::*;
use arbor_log::{LogEntry, LogRecord, LoggedHeader, LoggedRoots};
use arbor_recovery::access::pin_leaf;
use arbor_recovery::{abort, redo, rollback, RecoverySession};
use arbor_tree::fingerprint::{fingerprint_term, leaf_item_size};
use arbor_tree::{Node, LEAF_ITEM_OVERHEAD};
use bytes::Bytes;
use common::*;
use rand::Rng;
use std::sync::Arc;
use tempfile::tempdir;

const F1: FileNum = FileNum(1);
const SEED: u32 = 0x9e37_79b9;

fn replay(session: &mut RecoverySession, records: Vec<LogRecord>) {
    for record in records {
        redo(session, record).unwrap();
    }
}

fn undo(session: &RecoverySession, record: LogRecord) -> arbor_common::Result<()> {
    rollback(&session.transaction(TxnId(1)), record)
}

// =============================================================================
// End-to-end scenario
// =============================================================================

#[test]
fn test_replay_two_inserts_then_roll_back_second() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let leaf = DiskOff(100);

    let second = insert(6, F1, leaf, 1, "b", "2");
    let mut records = open_tree(1, F1, "f1.arbor", leaf);
    records.push(new_node(4, F1, leaf, 0, SEED));
    records.push(insert(5, F1, leaf, 0, "a", "1"));
    records.push(second.clone());
    replay(&mut session, records);

    let term_a = fingerprint_term(SEED, b"a", b"1");
    let term_b = fingerprint_term(SEED, b"b", b"2");
    with_node(&session, F1, leaf, |node| {
        assert_eq!(
            leaf_items(node),
            vec![(0, b("a"), b("1")), (1, b("b"), b("2"))]
        );
        assert_eq!(node.local_fingerprint, term_a.wrapping_add(term_b));
        assert_eq!(
            node.leaf().unwrap().n_bytes_in_buffer(),
            2 * (LEAF_ITEM_OVERHEAD + 2)
        );
        assert_eq!(node.log_lsn, Lsn(6));
    });

    undo(&session, second).unwrap();

    with_node(&session, F1, leaf, |node| {
        assert_eq!(leaf_items(node), vec![(0, b("a"), b("1"))]);
        assert_eq!(node.local_fingerprint, term_a);
        assert_eq!(node.leaf().unwrap().n_bytes_in_buffer(), LEAF_ITEM_OVERHEAD + 2);
    });

    session.cleanup().unwrap();
}

// =============================================================================
// Fingerprint and byte accounting
// =============================================================================

#[test]
fn test_random_redo_and_undo_conserve_counts() {
    const SLOTS: usize = 64;

    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let leaf = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", leaf);
    records.push(new_node(4, F1, leaf, 0, SEED));
    records.push(resize(5, F1, leaf, 4, SLOTS as u32));
    replay(&mut session, records);

    let mut rng = rand::rng();
    let mut model: Vec<Option<(Bytes, Bytes)>> = vec![None; SLOTS];
    // (record, slot, slot contents before the record)
    let mut history: Vec<(LogRecord, usize, Option<(Bytes, Bytes)>)> = Vec::new();
    let mut lsn = 6;

    for step in 0..500 {
        if step % 7 == 6 {
            if let Some((record, slot, before)) = history.pop() {
                undo(&session, record).unwrap();
                model[slot] = before;
            }
        } else {
            let empty: Vec<usize> = (0..SLOTS).filter(|&i| model[i].is_none()).collect();
            let full: Vec<usize> = (0..SLOTS).filter(|&i| model[i].is_some()).collect();

            let do_insert = full.is_empty() || (!empty.is_empty() && rng.random_bool(0.6));
            if do_insert {
                let slot = empty[rng.random_range(0..empty.len())];
                let key = format!("key-{:08x}", rng.random::<u32>());
                let value = "v".repeat(rng.random_range(0..32));
                let record = insert(lsn, F1, leaf, slot as u32, &key, &value);
                redo(&mut session, record.clone()).unwrap();
                history.push((record, slot, None));
                model[slot] = Some((b(&key), b(&value)));
            } else {
                let slot = full[rng.random_range(0..full.len())];
                let before = model[slot].clone();
                let (key, value) = before.clone().unwrap();
                let record = record(LogEntry::DeleteInLeaf(DeleteInLeaf {
                    lsn: Lsn(lsn),
                    file: F1,
                    location: leaf,
                    index: slot as u32,
                    key,
                    data: value,
                }));
                redo(&mut session, record.clone()).unwrap();
                history.push((record, slot, before));
                model[slot] = None;
            }
            lsn += 1;
        }

        let expected_fp = model
            .iter()
            .flatten()
            .fold(0u32, |acc, (k, v)| acc.wrapping_add(fingerprint_term(SEED, k, v)));
        let expected_bytes = model
            .iter()
            .flatten()
            .fold(0u32, |acc, (k, v)| acc.wrapping_add(leaf_item_size(k, v).unwrap()));
        let expected_items: Vec<(usize, Bytes, Bytes)> = model
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.clone().map(|(k, v)| (i, k, v)))
            .collect();

        with_node(&session, F1, leaf, |node| {
            assert_eq!(node.local_fingerprint, expected_fp, "step {}", step);
            assert_eq!(node.leaf().unwrap().n_bytes_in_buffer(), expected_bytes);
            assert_eq!(leaf_items(node), expected_items);
        });
    }

    session.cleanup().unwrap();
}

#[test]
fn test_insert_then_undo_restores_leaf() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let leaf = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", leaf);
    records.push(new_node(4, F1, leaf, 0, SEED));
    records.push(insert(5, F1, leaf, 2, "keep", "me"));
    replay(&mut session, records);

    let before = with_node(&session, F1, leaf, |node| {
        (leaf_items(node), node.local_fingerprint, node.leaf().unwrap().n_bytes_in_buffer())
    });

    let record = insert(6, F1, leaf, 0, "temp", "value");
    redo(&mut session, record.clone()).unwrap();
    undo(&session, record).unwrap();

    let after = with_node(&session, F1, leaf, |node| {
        (leaf_items(node), node.local_fingerprint, node.leaf().unwrap().n_bytes_in_buffer())
    });
    assert_eq!(before, after);

    let record = delete(7, F1, leaf, 2, "keep", "me");
    redo(&mut session, record.clone()).unwrap();
    with_node(&session, F1, leaf, |node| {
        assert!(node.leaf().unwrap().storage().is_empty());
        assert_eq!(node.local_fingerprint, 0);
    });
    undo(&session, record).unwrap();

    let after = with_node(&session, F1, leaf, |node| {
        (leaf_items(node), node.local_fingerprint, node.leaf().unwrap().n_bytes_in_buffer())
    });
    assert_eq!(before, after);
}

#[test]
fn test_delete_must_match_logged_item() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let leaf = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", leaf);
    records.push(new_node(4, F1, leaf, 0, SEED));
    records.push(insert(5, F1, leaf, 0, "a", "1"));
    replay(&mut session, records);

    assert!(matches!(
        redo(&mut session, delete(6, F1, leaf, 0, "a", "2")),
        Err(ArborError::TreeCorrupted(_))
    ));
    assert!(matches!(
        redo(&mut session, delete(6, F1, leaf, 1, "a", "1")),
        Err(ArborError::SlotEmpty(1))
    ));
    assert!(matches!(
        redo(&mut session, insert(6, F1, leaf, 0, "b", "2")),
        Err(ArborError::SlotOccupied(0))
    ));

    // Failed handlers released their pins and left the leaf alone
    assert_eq!(session.cache().pinned_count(), 0);
    with_node(&session, F1, leaf, |node| {
        assert_eq!(leaf_items(node), vec![(0, b("a"), b("1"))]);
        assert_eq!(node.log_lsn, Lsn(5));
    });
    session.cleanup().unwrap();
}

#[test]
fn test_verify_counts_catches_drift() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let leaf = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", leaf);
    records.push(new_node(4, F1, leaf, 0, SEED));
    records.push(insert(5, F1, leaf, 0, "a", "1"));
    replay(&mut session, records);

    {
        let cachefile = Arc::clone(session.registry().find(F1).unwrap().cachefile());
        let mut node = pin_leaf(session.cache(), &cachefile, leaf).unwrap();
        node.local_fingerprint ^= 1;
        node.unpin(true).unwrap();
    }

    assert!(matches!(
        redo(&mut session, insert(6, F1, leaf, 1, "b", "2")),
        Err(ArborError::TreeCorrupted(_))
    ));
    assert_eq!(session.cache().pinned_count(), 0);
}

// =============================================================================
// Redistribution
// =============================================================================

#[test]
fn test_oversized_insert_keeps_neighbour_intact() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let (left, right) = (DiskOff(4096), DiskOff(8192));

    let mut records = open_tree(1, F1, "t.arbor", left);
    records.push(new_node(4, F1, left, 0, SEED));
    records.push(new_node(5, F1, right, 0, SEED));
    records.push(insert(6, F1, right, 0, "r", "x"));
    records.push(insert(7, F1, left, 0, "l", "y"));
    replay(&mut session, records);

    let big = "v".repeat(6000);
    let err = redo(&mut session, insert(8, F1, left, 1, "big", &big)).unwrap_err();
    assert!(matches!(err, ArborError::PageTooLarge { location: 4096, .. }));
    assert_eq!(session.cache().pinned_count(), 0);
    with_node(&session, F1, left, |node| {
        assert_eq!(leaf_items(node), vec![(0, b("l"), b("y"))]);
        assert_eq!(node.log_lsn, Lsn(7));
    });
    session.cleanup().unwrap();

    let cache = CacheTable::<Node>::new(CacheConfig::default());
    let file = cache.open_file(&dir.path().join("t.arbor")).unwrap();
    for (location, item) in [(left, (0, b("l"), b("y"))), (right, (0, b("r"), b("x")))] {
        let node = cache.get_and_pin(&file, location).unwrap();
        assert_eq!(leaf_items(&node), vec![item]);
        node.unpin(false).unwrap();
    }
}

#[test]
fn test_oversized_node_is_not_flushed() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let root = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", root);
    records.push(new_node(4, F1, root, 1, SEED));
    records.push(add_child(5, root, 0, 8192, 0));
    records.push(add_child(6, root, 1, 12288, 0));
    records.push(record(LogEntry::SetPivot(SetPivot {
        lsn: Lsn(7),
        file: F1,
        location: root,
        childnum: 0,
        pivot_key: Bytes::from(vec![b'p'; 5000]),
    })));
    replay(&mut session, records);

    assert!(matches!(
        session.cleanup(),
        Err(ArborError::PageTooLarge { location: 4096, limit: 4096, .. })
    ));
    let len = std::fs::metadata(dir.path().join("t.arbor")).unwrap().len();
    assert!(len <= 4096);
}

#[test]
fn test_redistribute_is_neutral_and_undoable() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let left = DiskOff(4096);
    let right = DiskOff(8192);

    let mut records = open_tree(1, F1, "t.arbor", left);
    records.push(new_node(4, F1, left, 0, SEED));
    records.push(new_node(5, F1, right, 0, SEED));
    records.push(resize(6, F1, left, 4, 8));
    records.push(resize(7, F1, right, 4, 8));
    for i in 0..6u32 {
        records.push(insert(8 + i as u64, F1, left, i, &format!("k{}", i), &"x".repeat(i as usize)));
    }
    replay(&mut session, records);

    let snapshot = |session: &RecoverySession| {
        let l = with_node(session, F1, left, |n| {
            (leaf_items(n), n.local_fingerprint, n.leaf().unwrap().n_bytes_in_buffer())
        });
        let r = with_node(session, F1, right, |n| {
            (leaf_items(n), n.local_fingerprint, n.leaf().unwrap().n_bytes_in_buffer())
        });
        (l, r)
    };
    let before = snapshot(&session);

    let record = redistribute(20, F1, left, right, &[(1, 0), (3, 1), (5, 2)]);
    redo(&mut session, record.clone()).unwrap();
    let after = snapshot(&session);

    let (l_before, r_before) = &before;
    let (l_after, r_after) = &after;
    assert_eq!(
        l_before.1.wrapping_add(r_before.1),
        l_after.1.wrapping_add(r_after.1)
    );
    assert_eq!(l_before.2 + r_before.2, l_after.2 + r_after.2);

    let left_slots: Vec<usize> = l_after.0.iter().map(|(i, _, _)| *i).collect();
    assert_eq!(left_slots, vec![0, 2, 4]);
    let right_keys: Vec<Bytes> = r_after.0.iter().map(|(_, k, _)| k.clone()).collect();
    assert_eq!(right_keys, vec![b("k1"), b("k3"), b("k5")]);

    with_node(&session, F1, left, |n| assert_eq!(n.log_lsn, Lsn(20)));
    with_node(&session, F1, right, |n| assert_eq!(n.log_lsn, Lsn(20)));

    undo(&session, record).unwrap();
    assert_eq!(snapshot(&session), before);
    session.cleanup().unwrap();
}

#[test]
fn test_redistribute_between_seeds_moves_bytes() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let left = DiskOff(4096);
    let right = DiskOff(8192);

    let mut records = open_tree(1, F1, "t.arbor", left);
    records.push(new_node(4, F1, left, 0, 3));
    records.push(new_node(5, F1, right, 0, 7));
    records.push(insert(6, F1, left, 0, "a", "1"));
    records.push(insert(7, F1, left, 1, "b", "2"));
    records.push(redistribute(8, F1, left, right, &[(1, 3)]));
    replay(&mut session, records);

    with_node(&session, F1, left, |n| {
        assert_eq!(n.local_fingerprint, fingerprint_term(3, b"a", b"1"));
        assert_eq!(n.leaf().unwrap().n_bytes_in_buffer(), LEAF_ITEM_OVERHEAD + 2);
    });
    with_node(&session, F1, right, |n| {
        assert_eq!(leaf_items(n), vec![(3, b("b"), b("2"))]);
        assert_eq!(n.local_fingerprint, fingerprint_term(7, b"b", b"2"));
        assert_eq!(n.leaf().unwrap().n_bytes_in_buffer(), LEAF_ITEM_OVERHEAD + 2);
    });
}

#[test]
fn test_redistribute_pin_failure_releases_first_leaf() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let left = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", left);
    records.push(new_node(4, F1, left, 0, SEED));
    records.push(insert(5, F1, left, 0, "a", "1"));
    replay(&mut session, records);

    let missing = DiskOff(1 << 16);
    assert!(matches!(
        redo(&mut session, redistribute(6, F1, left, missing, &[(0, 0)])),
        Err(ArborError::PageNotFound { .. })
    ));
    assert_eq!(session.cache().pinned_count(), 0);
    with_node(&session, F1, left, |n| assert_eq!(leaf_items(n).len(), 1));
}

// =============================================================================
// Internal nodes
// =============================================================================

fn add_child(lsn: u64, location: DiskOff, childnum: u32, child: u64, fp: u32) -> LogRecord {
    record(LogEntry::AddChild(AddChild {
        lsn: Lsn(lsn),
        file: F1,
        location,
        childnum,
        child: DiskOff(child),
        child_fingerprint: fp,
    }))
}

fn delete_child(lsn: u64, location: DiskOff, childnum: u32, child: u64, fp: u32) -> LogRecord {
    record(LogEntry::DeleteChild(DeleteChild {
        lsn: Lsn(lsn),
        file: F1,
        location,
        childnum,
        child: DiskOff(child),
        child_fingerprint: fp,
        pivot_key: Bytes::new(),
    }))
}

#[test]
fn test_child_list_shape() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let root = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", root);
    records.push(new_node(4, F1, root, 1, SEED));
    records.push(add_child(5, root, 0, 8192, 11));
    records.push(add_child(6, root, 1, 12288, 22));
    replay(&mut session, records);

    let shape = |session: &RecoverySession| {
        with_node(session, F1, root, |n| {
            let internal = n.internal().unwrap();
            (internal.n_children(), internal.pivots().len(), internal.total_pivot_len())
        })
    };
    assert_eq!(shape(&session), (2, 1, 0));

    redo(&mut session, add_child(7, root, 2, 16384, 33)).unwrap();
    assert_eq!(shape(&session), (3, 2, 0));

    replay(
        &mut session,
        vec![
            record(LogEntry::SetPivot(SetPivot {
                lsn: Lsn(8),
                file: F1,
                location: root,
                childnum: 0,
                pivot_key: b("m"),
            })),
            record(LogEntry::SetPivot(SetPivot {
                lsn: Lsn(9),
                file: F1,
                location: root,
                childnum: 1,
                pivot_key: b("tt"),
            })),
            // Replacing a pivot swaps its length out of the total
            record(LogEntry::SetPivot(SetPivot {
                lsn: Lsn(10),
                file: F1,
                location: root,
                childnum: 1,
                pivot_key: b("t"),
            })),
            record(LogEntry::SetChild(SetChild {
                lsn: Lsn(11),
                file: F1,
                location: root,
                childnum: 1,
                old_child: DiskOff(12288),
                new_child: DiskOff(20480),
            })),
            record(LogEntry::ChangeChildFingerprint(ChangeChildFingerprint {
                lsn: Lsn(12),
                file: F1,
                location: root,
                childnum: 1,
                old_fingerprint: 22,
                new_fingerprint: 44,
            })),
        ],
    );
    assert_eq!(shape(&session), (3, 2, 2));

    redo(&mut session, delete_child(13, root, 2, 16384, 33)).unwrap();
    assert_eq!(shape(&session), (2, 1, 1));

    with_node(&session, F1, root, |n| {
        let internal = n.internal().unwrap();
        let child = internal.child(1).unwrap();
        assert_eq!(child.location, DiskOff(20480));
        assert_eq!(child.subtree_fingerprint, 44);
        assert_eq!(internal.pivots()[0], Some(b("m")));
        assert_eq!(n.log_lsn, Lsn(13));
    });

    // Two children is the floor
    assert!(matches!(
        redo(&mut session, delete_child(14, root, 1, 20480, 44)),
        Err(ArborError::TreeCorrupted(_))
    ));
    // Only the first child may go in front
    assert!(redo(&mut session, add_child(14, root, 0, 24576, 55)).is_err());
    assert_eq!(shape(&session), (2, 1, 1));
    assert_eq!(session.cache().pinned_count(), 0);
}

#[test]
fn test_delete_child_checks_logged_child() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let root = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", root);
    records.push(new_node(4, F1, root, 1, SEED));
    records.push(add_child(5, root, 0, 8192, 11));
    records.push(add_child(6, root, 1, 12288, 22));
    records.push(add_child(7, root, 2, 16384, 33));
    replay(&mut session, records);

    assert!(redo(&mut session, delete_child(8, root, 2, 16384, 34)).is_err());
    assert!(redo(&mut session, delete_child(8, root, 2, 12288, 33)).is_err());
    redo(&mut session, delete_child(8, root, 2, 16384, 33)).unwrap();
}

#[test]
fn test_node_kind_is_checked() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let leaf = DiskOff(4096);
    let root = DiskOff(8192);

    let mut records = open_tree(1, F1, "t.arbor", root);
    records.push(new_node(4, F1, leaf, 0, SEED));
    records.push(new_node(5, F1, root, 1, SEED));
    replay(&mut session, records);

    assert!(matches!(
        redo(&mut session, add_child(6, leaf, 0, 12288, 1)),
        Err(ArborError::InvalidNodeType { expected: "internal", .. })
    ));
    assert!(matches!(
        redo(&mut session, insert(6, F1, root, 0, "a", "1")),
        Err(ArborError::InvalidNodeType { expected: "leaf", .. })
    ));
    assert_eq!(session.cache().pinned_count(), 0);
}

// =============================================================================
// Files, headers and the registry
// =============================================================================

#[test]
fn test_handlers_require_registration() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let leaf = DiskOff(4096);

    assert!(matches!(
        redo(&mut session, insert(1, F1, leaf, 0, "a", "1")),
        Err(ArborError::CacheFileNotFound(1))
    ));
    assert!(matches!(
        redo(&mut session, file_header(1, F1, leaf)),
        Err(ArborError::CacheFileNotFound(1))
    ));

    replay(
        &mut session,
        vec![file_create(1, "t.arbor"), file_open(2, F1, "t.arbor")],
    );
    assert!(matches!(
        redo(&mut session, insert(3, F1, leaf, 0, "a", "1")),
        Err(ArborError::TreeNotOpen(1))
    ));
}

#[test]
fn test_multi_root_header_rejected() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    replay(
        &mut session,
        vec![file_create(1, "t.arbor"), file_open(2, F1, "t.arbor")],
    );

    let record = record(LogEntry::FileHeader(HeaderEntry {
        lsn: Lsn(3),
        file: F1,
        header: LoggedHeader {
            flags: 0,
            nodesize: NODESIZE,
            freelist: DiskOff(0),
            unused_memory: DiskOff(8192),
            roots: LoggedRoots::Named(vec![(b("db"), DiskOff(4096))]),
        },
    }));
    assert!(matches!(
        redo(&mut session, record),
        Err(ArborError::UnsupportedHeader(_))
    ));
    assert!(session.registry().find(F1).unwrap().tree().is_none());
}

#[test]
fn test_header_changes() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    replay(&mut session, open_tree(1, F1, "t.arbor", DiskOff(4096)));

    replay(
        &mut session,
        vec![
            record(LogEntry::ChangeUnnamedRoot(ChangeUnnamedRoot {
                lsn: Lsn(4),
                file: F1,
                old_root: DiskOff(4096),
                new_root: DiskOff(12288),
            })),
            record(LogEntry::ChangeUnusedMemory(ChangeUnusedMemory {
                lsn: Lsn(5),
                file: F1,
                old_unused: DiskOff(1 << 20),
                new_unused: DiskOff(1 << 21),
            })),
        ],
    );

    let tree = session.registry().find(F1).unwrap().tree().unwrap();
    assert_eq!(tree.header().unnamed_root, DiskOff(12288));
    assert_eq!(tree.header().unused_memory, DiskOff(1 << 21));
    assert!(tree.header().dirty);

    // A later header record replaces the header wholesale
    redo(&mut session, file_header(6, F1, DiskOff(4096))).unwrap();
    let tree = session.registry().find(F1).unwrap().tree().unwrap();
    assert_eq!(tree.header().unnamed_root, DiskOff(4096));
    assert_eq!(tree.header().unused_memory, DiskOff(1 << 20));
}

#[test]
fn test_registry_keeps_registration_order() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();

    let files: Vec<FileNum> = (0..8).map(|i| FileNum(100 - i * 3)).collect();
    let mut lsn = 1;
    for file in &files {
        let name = format!("{}.arbor", file.0);
        replay(
            &mut session,
            vec![file_create(lsn, &name), file_open(lsn + 1, *file, &name)],
        );
        lsn += 2;
    }

    let order: Vec<FileNum> = session.registry().entries().map(|e| e.file()).collect();
    assert_eq!(order, files);
    for file in &files {
        let entry = session.registry().find(*file).unwrap();
        assert_eq!(
            entry.cachefile().path(),
            dir.path().join(format!("{}.arbor", file.0))
        );
    }
    session.cleanup().unwrap();
}

#[test]
fn test_rollback_file_create_removes_file() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();

    redo(&mut session, file_create(1, "made.arbor")).unwrap();
    let path = session.data_path(b"made.arbor").unwrap();
    assert!(path.exists());

    undo(&session, file_create(1, "made.arbor")).unwrap();
    assert!(!path.exists());

    // Already gone
    assert!(matches!(
        undo(&session, file_create(1, "made.arbor")),
        Err(ArborError::Io(_))
    ));
    session.cleanup().unwrap();
}

#[test]
fn test_rollback_file_create_ignores_log_dir() {
    let dir = tempdir().unwrap();
    let session = RecoverySession::new(config(dir.path())).unwrap();

    let log_dir = dir.path().join("log");
    std::fs::create_dir_all(&log_dir).unwrap();
    std::fs::write(log_dir.join("made.arbor"), b"").unwrap();

    assert!(undo(&session, file_create(1, "made.arbor")).is_err());
    assert!(log_dir.join("made.arbor").exists());
}

#[test]
fn test_abort_undoes_newest_first() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let leaf = DiskOff(4096);

    let mut records = open_tree(1, F1, "t.arbor", leaf);
    records.push(new_node(4, F1, leaf, 0, SEED));
    replay(&mut session, records);

    let txn_records = vec![
        insert(5, F1, leaf, 0, "a", "1"),
        insert(6, F1, leaf, 1, "b", "2"),
        delete(7, F1, leaf, 0, "a", "1"),
    ];
    replay(&mut session, txn_records.clone());

    let undone = abort(&session.transaction(TxnId(1)), txn_records).unwrap();
    assert_eq!(undone, 3);

    with_node(&session, F1, leaf, |n| {
        assert!(n.leaf().unwrap().storage().is_empty());
        assert_eq!(n.local_fingerprint, 0);
        assert_eq!(n.leaf().unwrap().n_bytes_in_buffer(), 0);
    });
    session.cleanup().unwrap();
}

// =============================================================================
// Unimplemented kinds
// =============================================================================

#[test]
fn test_unimplemented_redo_kinds() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    replay(&mut session, open_tree(1, F1, "t.arbor", DiskOff(4096)));

    let unimplemented = vec![
        LogEntry::Delete(Delete {
            lsn: Lsn(4),
            file: F1,
            key: b("k"),
            data: b("v"),
        }),
        LogEntry::Enqueue(Enqueue {
            lsn: Lsn(4),
            file: F1,
            location: DiskOff(4096),
            childnum: 0,
            msg_type: 1,
            key: b("k"),
            data: b("v"),
        }),
        LogEntry::Dequeue(Dequeue {
            lsn: Lsn(4),
            file: F1,
            location: DiskOff(4096),
            childnum: 0,
        }),
        LogEntry::ChangeNamedRoot(ChangeNamedRoot {
            lsn: Lsn(4),
            file: F1,
            name: b("db"),
            old_root: DiskOff(4096),
            new_root: DiskOff(8192),
        }),
    ];
    for entry in unimplemented {
        let kind = entry.kind();
        let err = redo(&mut session, record(entry)).unwrap_err();
        assert!(err.is_unimplemented(), "{} gave {}", kind, err);
    }

    redo(&mut session, record(LogEntry::Commit(Commit { lsn: Lsn(5) }))).unwrap();
}

#[test]
fn test_rollback_coverage() {
    let dir = tempdir().unwrap();
    let mut session = RecoverySession::new(config(dir.path())).unwrap();
    let root = DiskOff(4096);
    let mut records = open_tree(1, F1, "t.arbor", root);
    records.push(new_node(4, F1, root, 1, SEED));
    replay(&mut session, records);

    let lsn = Lsn(10);
    let loc = root;
    let unimplemented = vec![
        LogEntry::Delete(Delete { lsn, file: F1, key: b("k"), data: b("v") }),
        LogEntry::FileHeader(HeaderEntry {
            lsn,
            file: F1,
            header: LoggedHeader {
                flags: 0,
                nodesize: NODESIZE,
                freelist: DiskOff(0),
                unused_memory: DiskOff(0),
                roots: LoggedRoots::Unnamed(root),
            },
        }),
        LogEntry::Enqueue(Enqueue {
            lsn,
            file: F1,
            location: loc,
            childnum: 0,
            msg_type: 1,
            key: b("k"),
            data: b("v"),
        }),
        LogEntry::Dequeue(Dequeue { lsn, file: F1, location: loc, childnum: 0 }),
        LogEntry::AddChild(AddChild {
            lsn,
            file: F1,
            location: loc,
            childnum: 0,
            child: DiskOff(8192),
            child_fingerprint: 0,
        }),
        LogEntry::DeleteChild(DeleteChild {
            lsn,
            file: F1,
            location: loc,
            childnum: 1,
            child: DiskOff(8192),
            child_fingerprint: 0,
            pivot_key: b("p"),
        }),
        LogEntry::SetChild(SetChild {
            lsn,
            file: F1,
            location: loc,
            childnum: 0,
            old_child: DiskOff(8192),
            new_child: DiskOff(12288),
        }),
        LogEntry::SetPivot(SetPivot {
            lsn,
            file: F1,
            location: loc,
            childnum: 0,
            pivot_key: b("p"),
        }),
        LogEntry::ChangeChildFingerprint(ChangeChildFingerprint {
            lsn,
            file: F1,
            location: loc,
            childnum: 0,
            old_fingerprint: 1,
            new_fingerprint: 2,
        }),
        LogEntry::ResizeLeafStorage(ResizeLeafStorage {
            lsn,
            file: F1,
            location: loc,
            old_size: 4,
            new_size: 8,
        }),
        LogEntry::ChangeUnnamedRoot(ChangeUnnamedRoot {
            lsn,
            file: F1,
            old_root: root,
            new_root: DiskOff(8192),
        }),
        LogEntry::ChangeNamedRoot(ChangeNamedRoot {
            lsn,
            file: F1,
            name: b("db"),
            old_root: root,
            new_root: DiskOff(8192),
        }),
        LogEntry::ChangeUnusedMemory(ChangeUnusedMemory {
            lsn,
            file: F1,
            old_unused: DiskOff(0),
            new_unused: DiskOff(8192),
        }),
    ];
    for entry in unimplemented {
        let kind = entry.kind();
        let err = undo(&session, record(entry)).unwrap_err();
        assert!(err.is_unimplemented(), "{} gave {}", kind, err);
    }

    // Nothing to undo for these
    undo(&session, record(LogEntry::Commit(Commit { lsn }))).unwrap();
    undo(&session, file_open(lsn.0, F1, "t.arbor")).unwrap();
    undo(&session, new_node(lsn.0, F1, DiskOff(8192), 0, SEED)).unwrap();

    // The tree was not touched
    with_node(&session, F1, root, |n| {
        assert_eq!(n.internal().unwrap().n_children(), 0);
        assert_eq!(n.log_lsn, Lsn(4));
    });
    assert!(session.registry().find(F1).unwrap().tree().is_some());
}
