//! Rollback: undoing the logged mutations of an aborting transaction.
//!
//! Each implemented handler applies the inverse of its redo counterpart.
//! Unlike redo, every failure here is returned to the caller, which is
//! already on an error path and must be able to report it.

use crate::access::{check_counts, pin_leaf, unpin_node};
use crate::registry::CacheFileRegistry;
use crate::session::resolve_fname;
use arbor_cache::{CacheFile, CacheTable};
use arbor_common::error::unimplemented;
use arbor_common::{FileNum, Result, TxnId};
use arbor_log::entry::*;
use arbor_log::{LogEntry, LogRecord};
use arbor_tree::{fingerprint, Node};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// What rollback needs from the transaction being aborted.
pub trait TransactionEnv {
    fn txn_id(&self) -> TxnId;

    /// Directory the transaction's file names are relative to. Replay
    /// creates and opens files against the same directory.
    fn data_dir(&self) -> &Path;

    fn cache(&self) -> &CacheTable<Node>;

    /// Cache file of an open tree, by log file number.
    fn tree_cachefile(&self, file: FileNum) -> Result<Arc<CacheFile>>;

    /// Recount leaves after every mutation.
    fn verify_counts(&self) -> bool {
        false
    }
}

/// A transaction whose files are resolved through a [`CacheFileRegistry`].
pub struct Transaction<'a> {
    txn_id: TxnId,
    data_dir: PathBuf,
    cache: &'a CacheTable<Node>,
    registry: &'a CacheFileRegistry,
    verify_counts: bool,
}

impl<'a> Transaction<'a> {
    pub fn new(
        txn_id: TxnId,
        data_dir: PathBuf,
        cache: &'a CacheTable<Node>,
        registry: &'a CacheFileRegistry,
    ) -> Self {
        Self {
            txn_id,
            data_dir,
            cache,
            registry,
            verify_counts: false,
        }
    }

    pub fn with_verify_counts(mut self, verify_counts: bool) -> Self {
        self.verify_counts = verify_counts;
        self
    }
}

impl TransactionEnv for Transaction<'_> {
    fn txn_id(&self) -> TxnId {
        self.txn_id
    }

    fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn cache(&self) -> &CacheTable<Node> {
        self.cache
    }

    fn tree_cachefile(&self, file: FileNum) -> Result<Arc<CacheFile>> {
        self.registry.tree_cachefile(file)
    }

    fn verify_counts(&self) -> bool {
        self.verify_counts
    }
}

/// Undoes one record.
pub fn rollback<E: TransactionEnv + ?Sized>(env: &E, record: LogRecord) -> Result<()> {
    tracing::debug!(
        lsn = record.lsn().0,
        txn = env.txn_id().0,
        kind = record.kind().name(),
        "Rollback"
    );

    match record.entry {
        LogEntry::Commit(e) => rollback_commit(env, e),
        LogEntry::Delete(e) => rollback_delete(env, e),
        LogEntry::FileCreate(e) => rollback_file_create(env, e),
        LogEntry::FileOpen(e) => rollback_file_open(env, e),
        LogEntry::FileHeader(e) => rollback_file_header(env, e),
        LogEntry::NewNode(e) => rollback_new_node(env, e),
        LogEntry::Enqueue(e) => rollback_enqueue(env, e),
        LogEntry::Dequeue(e) => rollback_dequeue(env, e),
        LogEntry::AddChild(e) => rollback_add_child(env, e),
        LogEntry::DeleteChild(e) => rollback_delete_child(env, e),
        LogEntry::SetChild(e) => rollback_set_child(env, e),
        LogEntry::SetPivot(e) => rollback_set_pivot(env, e),
        LogEntry::ChangeChildFingerprint(e) => rollback_change_child_fingerprint(env, e),
        LogEntry::InsertInLeaf(e) => rollback_insert_in_leaf(env, e),
        LogEntry::DeleteInLeaf(e) => rollback_delete_in_leaf(env, e),
        LogEntry::ResizeLeafStorage(e) => rollback_resize_leaf_storage(env, e),
        LogEntry::RedistributeLeafStorage(e) => rollback_redistribute_leaf_storage(env, e),
        LogEntry::ChangeUnnamedRoot(e) => rollback_change_unnamed_root(env, e),
        LogEntry::ChangeNamedRoot(e) => rollback_change_named_root(env, e),
        LogEntry::ChangeUnusedMemory(e) => rollback_change_unused_memory(env, e),
    }
}

/// Undoes a transaction's records, newest first. Stops at the first
/// failure.
pub fn abort<E: TransactionEnv + ?Sized>(env: &E, records: Vec<LogRecord>) -> Result<usize> {
    let mut undone = 0;
    for record in records.into_iter().rev() {
        rollback(env, record)?;
        undone += 1;
    }
    tracing::info!(txn = env.txn_id().0, records = undone, "Transaction rolled back");
    Ok(undone)
}

/// Rollback only runs for transactions that did not commit, so this is
/// never reached in practice.
pub fn rollback_commit<E: TransactionEnv + ?Sized>(_env: &E, _entry: Commit) -> Result<()> {
    Ok(())
}

pub fn rollback_delete<E: TransactionEnv + ?Sized>(_env: &E, _entry: Delete) -> Result<()> {
    Err(unimplemented("rollback delete"))
}

/// Removes the created file.
pub fn rollback_file_create<E: TransactionEnv + ?Sized>(env: &E, entry: FileCreate) -> Result<()> {
    let path = resolve_fname(env.data_dir(), &entry.fname)?;
    std::fs::remove_file(&path)?;
    tracing::info!(path = %path.display(), "Removed created file");
    Ok(())
}

pub fn rollback_file_open<E: TransactionEnv + ?Sized>(_env: &E, _entry: FileOpen) -> Result<()> {
    Ok(())
}

pub fn rollback_file_header<E: TransactionEnv + ?Sized>(
    _env: &E,
    _entry: HeaderEntry,
) -> Result<()> {
    Err(unimplemented("rollback file-header"))
}

/// Nothing to undo: the abandoned location would go to a freelist, and
/// there is none yet.
pub fn rollback_new_node<E: TransactionEnv + ?Sized>(_env: &E, _entry: NewNode) -> Result<()> {
    Ok(())
}

pub fn rollback_enqueue<E: TransactionEnv + ?Sized>(_env: &E, _entry: Enqueue) -> Result<()> {
    Err(unimplemented("rollback enqueue"))
}

pub fn rollback_dequeue<E: TransactionEnv + ?Sized>(_env: &E, _entry: Dequeue) -> Result<()> {
    Err(unimplemented("rollback dequeue"))
}

pub fn rollback_add_child<E: TransactionEnv + ?Sized>(_env: &E, _entry: AddChild) -> Result<()> {
    Err(unimplemented("rollback add-child"))
}

pub fn rollback_delete_child<E: TransactionEnv + ?Sized>(
    _env: &E,
    _entry: DeleteChild,
) -> Result<()> {
    Err(unimplemented("rollback delete-child"))
}

pub fn rollback_set_child<E: TransactionEnv + ?Sized>(_env: &E, _entry: SetChild) -> Result<()> {
    Err(unimplemented("rollback set-child"))
}

pub fn rollback_set_pivot<E: TransactionEnv + ?Sized>(_env: &E, _entry: SetPivot) -> Result<()> {
    Err(unimplemented("rollback set-pivot"))
}

pub fn rollback_change_child_fingerprint<E: TransactionEnv + ?Sized>(
    _env: &E,
    _entry: ChangeChildFingerprint,
) -> Result<()> {
    Err(unimplemented("rollback change-child-fingerprint"))
}

/// Removes the inserted item.
pub fn rollback_insert_in_leaf<E: TransactionEnv + ?Sized>(
    env: &E,
    entry: InsertInLeaf,
) -> Result<()> {
    let cachefile = env.tree_cachefile(entry.file)?;
    let mut node = pin_leaf(env.cache(), &cachefile, entry.location)?;

    fingerprint::remove_item(&mut node, entry.index as usize, &entry.key, &entry.data)?;
    check_counts(&node, env.verify_counts())?;

    node.mark_applied(entry.lsn);
    unpin_node(node)
}

/// Puts the deleted item back.
pub fn rollback_delete_in_leaf<E: TransactionEnv + ?Sized>(
    env: &E,
    entry: DeleteInLeaf,
) -> Result<()> {
    let cachefile = env.tree_cachefile(entry.file)?;
    let mut node = pin_leaf(env.cache(), &cachefile, entry.location)?;

    fingerprint::insert_item(&mut node, entry.index as usize, entry.key, entry.data)?;
    check_counts(&node, env.verify_counts())?;

    node.mark_applied(entry.lsn);
    unpin_node(node)
}

pub fn rollback_resize_leaf_storage<E: TransactionEnv + ?Sized>(
    _env: &E,
    _entry: ResizeLeafStorage,
) -> Result<()> {
    Err(unimplemented("rollback resize-leaf-storage"))
}

/// Moves every pair back from the new leaf to the old one.
pub fn rollback_redistribute_leaf_storage<E: TransactionEnv + ?Sized>(
    env: &E,
    entry: RedistributeLeafStorage,
) -> Result<()> {
    let cachefile = env.tree_cachefile(entry.file)?;
    let mut old = pin_leaf(env.cache(), &cachefile, entry.old_location)?;
    let mut new = pin_leaf(env.cache(), &cachefile, entry.new_location)?;

    fingerprint::redistribute_back(&mut old, &mut new, &entry.pairs)?;
    check_counts(&old, env.verify_counts())?;
    check_counts(&new, env.verify_counts())?;

    old.mark_applied(entry.lsn);
    new.mark_applied(entry.lsn);
    unpin_node(old)?;
    unpin_node(new)
}

pub fn rollback_change_unnamed_root<E: TransactionEnv + ?Sized>(
    _env: &E,
    _entry: ChangeUnnamedRoot,
) -> Result<()> {
    Err(unimplemented("rollback change-unnamed-root"))
}

pub fn rollback_change_named_root<E: TransactionEnv + ?Sized>(
    _env: &E,
    _entry: ChangeNamedRoot,
) -> Result<()> {
    Err(unimplemented("rollback change-named-root"))
}

pub fn rollback_change_unused_memory<E: TransactionEnv + ?Sized>(
    _env: &E,
    _entry: ChangeUnusedMemory,
) -> Result<()> {
    Err(unimplemented("rollback change-unused-memory"))
}
