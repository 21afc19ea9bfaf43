//! Redo: replaying logged mutations against tree files.
//!
//! Each handler resolves its file through the session registry, pins the
//! nodes it touches, applies the logged change, stamps the record's LSN on
//! every node it changed and unpins them. Records are applied in the order
//! given; handlers do not reorder or skip. Every error returned here is
//! fatal to the recovery pass.

use crate::access::{check_counts, pin_internal, pin_leaf, put_node, unpin_node};
use crate::session::RecoverySession;
use arbor_cache::CacheFile;
use arbor_common::error::unimplemented;
use arbor_common::{FileNum, Result};
use arbor_log::entry::*;
use arbor_log::{LogEntry, LogRecord};
use arbor_tree::{fingerprint, FileHeader, Node};
use std::fs::OpenOptions;
use std::sync::Arc;

/// Replays one record.
pub fn redo(session: &mut RecoverySession, record: LogRecord) -> Result<()> {
    tracing::debug!(
        lsn = record.lsn().0,
        txn = record.txn_id.0,
        kind = record.kind().name(),
        "Redo"
    );

    match record.entry {
        LogEntry::Commit(e) => redo_commit(session, e),
        LogEntry::Delete(e) => redo_delete(session, e),
        LogEntry::FileCreate(e) => redo_file_create(session, e),
        LogEntry::FileOpen(e) => redo_file_open(session, e),
        LogEntry::FileHeader(e) => redo_file_header(session, e),
        LogEntry::NewNode(e) => redo_new_node(session, e),
        LogEntry::Enqueue(e) => redo_enqueue(session, e),
        LogEntry::Dequeue(e) => redo_dequeue(session, e),
        LogEntry::AddChild(e) => redo_add_child(session, e),
        LogEntry::DeleteChild(e) => redo_delete_child(session, e),
        LogEntry::SetChild(e) => redo_set_child(session, e),
        LogEntry::SetPivot(e) => redo_set_pivot(session, e),
        LogEntry::ChangeChildFingerprint(e) => redo_change_child_fingerprint(session, e),
        LogEntry::InsertInLeaf(e) => redo_insert_in_leaf(session, e),
        LogEntry::DeleteInLeaf(e) => redo_delete_in_leaf(session, e),
        LogEntry::ResizeLeafStorage(e) => redo_resize_leaf_storage(session, e),
        LogEntry::RedistributeLeafStorage(e) => redo_redistribute_leaf_storage(session, e),
        LogEntry::ChangeUnnamedRoot(e) => redo_change_unnamed_root(session, e),
        LogEntry::ChangeNamedRoot(e) => redo_change_named_root(session, e),
        LogEntry::ChangeUnusedMemory(e) => redo_change_unused_memory(session, e),
    }
}

/// Cache file of a file whose tree has been opened by a header record.
fn tree_file(session: &RecoverySession, file: FileNum) -> Result<Arc<CacheFile>> {
    session.registry().tree_cachefile(file)
}

/// Commit records carry nothing to replay.
///
/// Replay assumes every logged operation eventually commits, so work of a
/// transaction that never committed before the crash is replayed too.
pub fn redo_commit(_session: &mut RecoverySession, _entry: Commit) -> Result<()> {
    Ok(())
}

pub fn redo_delete(_session: &mut RecoverySession, _entry: Delete) -> Result<()> {
    Err(unimplemented("redo delete"))
}

/// Creates the logged file in the data directory, truncating any old copy.
pub fn redo_file_create(session: &mut RecoverySession, entry: FileCreate) -> Result<()> {
    let path = session.data_path(&entry.fname)?;

    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(entry.mode);
    }
    options.open(&path)?;

    tracing::info!(path = %path.display(), mode = format_args!("{:o}", entry.mode), "Created file");
    Ok(())
}

/// Opens the logged file and registers it under its file number.
pub fn redo_file_open(session: &mut RecoverySession, entry: FileOpen) -> Result<()> {
    let path = session.data_path(&entry.fname)?;
    let cachefile = session.cache().open_file(&path)?;
    tracing::info!(file = %entry.file, path = %path.display(), "Opened file");
    session.note_cachefile(entry.file, cachefile);
    Ok(())
}

/// Installs a new header for the file, creating its tree handle on first
/// sight.
pub fn redo_file_header(session: &mut RecoverySession, entry: HeaderEntry) -> Result<()> {
    let header = FileHeader::from_logged(&entry.header)?;
    session
        .registry_mut()
        .find_mut(entry.file)?
        .install_header(header);
    Ok(())
}

/// Builds an empty node and installs it in the cache.
pub fn redo_new_node(session: &mut RecoverySession, entry: NewNode) -> Result<()> {
    let cachefile = Arc::clone(session.registry().find(entry.file)?.cachefile());
    let node = Node::create(
        entry.location,
        entry.height,
        entry.nodesize,
        entry.rand4fingerprint,
        entry.is_dup_sort,
        entry.lsn,
    );

    let pinned = put_node(session.cache(), &cachefile, node)?;
    check_counts(&pinned, session.config().verify_counts)?;
    unpin_node(pinned)
}

pub fn redo_enqueue(_session: &mut RecoverySession, _entry: Enqueue) -> Result<()> {
    Err(unimplemented("redo enqueue"))
}

pub fn redo_dequeue(_session: &mut RecoverySession, _entry: Dequeue) -> Result<()> {
    Err(unimplemented("redo dequeue"))
}

pub fn redo_add_child(session: &mut RecoverySession, entry: AddChild) -> Result<()> {
    let cachefile = tree_file(session, entry.file)?;
    let mut node = pin_internal(session.cache(), &cachefile, entry.location)?;
    node.internal_mut()?
        .add_child(entry.childnum as usize, entry.child, entry.child_fingerprint)?;
    node.mark_applied(entry.lsn);
    unpin_node(node)
}

pub fn redo_delete_child(session: &mut RecoverySession, entry: DeleteChild) -> Result<()> {
    let cachefile = tree_file(session, entry.file)?;
    let mut node = pin_internal(session.cache(), &cachefile, entry.location)?;
    node.internal_mut()?
        .delete_child(entry.childnum as usize, entry.child, entry.child_fingerprint)?;
    node.mark_applied(entry.lsn);
    unpin_node(node)
}

pub fn redo_set_child(session: &mut RecoverySession, entry: SetChild) -> Result<()> {
    let cachefile = tree_file(session, entry.file)?;
    let mut node = pin_internal(session.cache(), &cachefile, entry.location)?;
    node.internal_mut()?
        .set_child(entry.childnum as usize, entry.new_child)?;
    node.mark_applied(entry.lsn);
    unpin_node(node)
}

pub fn redo_set_pivot(session: &mut RecoverySession, entry: SetPivot) -> Result<()> {
    let cachefile = tree_file(session, entry.file)?;
    let mut node = pin_internal(session.cache(), &cachefile, entry.location)?;
    node.internal_mut()?
        .set_pivot(entry.childnum as usize, entry.pivot_key)?;
    node.mark_applied(entry.lsn);
    unpin_node(node)
}

pub fn redo_change_child_fingerprint(
    session: &mut RecoverySession,
    entry: ChangeChildFingerprint,
) -> Result<()> {
    let cachefile = tree_file(session, entry.file)?;
    let mut node = pin_internal(session.cache(), &cachefile, entry.location)?;
    node.internal_mut()?
        .set_child_fingerprint(entry.childnum as usize, entry.new_fingerprint)?;
    node.mark_applied(entry.lsn);
    unpin_node(node)
}

pub fn redo_insert_in_leaf(session: &mut RecoverySession, entry: InsertInLeaf) -> Result<()> {
    let verify = session.config().verify_counts;
    let cachefile = tree_file(session, entry.file)?;
    let mut node = pin_leaf(session.cache(), &cachefile, entry.location)?;

    check_counts(&node, verify)?;
    fingerprint::insert_item(&mut node, entry.index as usize, entry.key, entry.data)?;
    check_counts(&node, verify)?;

    node.mark_applied(entry.lsn);
    unpin_node(node)
}

pub fn redo_delete_in_leaf(session: &mut RecoverySession, entry: DeleteInLeaf) -> Result<()> {
    let verify = session.config().verify_counts;
    let cachefile = tree_file(session, entry.file)?;
    let mut node = pin_leaf(session.cache(), &cachefile, entry.location)?;

    check_counts(&node, verify)?;
    fingerprint::remove_item(&mut node, entry.index as usize, &entry.key, &entry.data)?;
    check_counts(&node, verify)?;

    node.mark_applied(entry.lsn);
    unpin_node(node)
}

/// Resizes a leaf's storage. The leaf must already exist from a new-node
/// record or an earlier flush.
pub fn redo_resize_leaf_storage(
    session: &mut RecoverySession,
    entry: ResizeLeafStorage,
) -> Result<()> {
    let cachefile = tree_file(session, entry.file)?;
    let mut node = pin_leaf(session.cache(), &cachefile, entry.location)?;
    node.leaf_mut()?
        .resize_storage(entry.old_size as usize, entry.new_size as usize)?;
    check_counts(&node, session.config().verify_counts)?;
    node.mark_applied(entry.lsn);
    unpin_node(node)
}

/// Moves items between two leaves.
///
/// The old leaf is pinned first; if pinning the new one fails the old pin
/// is released as its guard drops, and any later failure releases both.
pub fn redo_redistribute_leaf_storage(
    session: &mut RecoverySession,
    entry: RedistributeLeafStorage,
) -> Result<()> {
    let verify = session.config().verify_counts;
    let cachefile = tree_file(session, entry.file)?;
    let mut old = pin_leaf(session.cache(), &cachefile, entry.old_location)?;
    let mut new = pin_leaf(session.cache(), &cachefile, entry.new_location)?;

    fingerprint::redistribute(&mut old, &mut new, &entry.pairs)?;
    check_counts(&old, verify)?;
    check_counts(&new, verify)?;

    old.mark_applied(entry.lsn);
    new.mark_applied(entry.lsn);
    unpin_node(old)?;
    unpin_node(new)
}

pub fn redo_change_unnamed_root(
    session: &mut RecoverySession,
    entry: ChangeUnnamedRoot,
) -> Result<()> {
    let tree = session.registry_mut().find_mut(entry.file)?.tree_mut()?;
    let mut header = tree.read_and_pin_header();
    header.unnamed_root = entry.new_root;
    header.unpin();
    Ok(())
}

pub fn redo_change_named_root(
    _session: &mut RecoverySession,
    _entry: ChangeNamedRoot,
) -> Result<()> {
    Err(unimplemented("redo change-named-root"))
}

pub fn redo_change_unused_memory(
    session: &mut RecoverySession,
    entry: ChangeUnusedMemory,
) -> Result<()> {
    let tree = session.registry_mut().find_mut(entry.file)?.tree_mut()?;
    let mut header = tree.read_and_pin_header();
    header.unused_memory = entry.new_unused;
    header.unpin();
    Ok(())
}
