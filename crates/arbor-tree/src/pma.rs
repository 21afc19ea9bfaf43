//! Packed leaf storage.
//!
//! A leaf keeps its key/value pairs in a fixed-capacity array of slots
//! addressed by index. The log names slots directly, so replay never
//! compares keys: it sets, clears, resizes and moves slots exactly as
//! logged.

use arbor_common::{ArborError, Result};
use arbor_log::IndexPair;
use bytes::Bytes;
use std::collections::HashSet;

/// A key/value pair stored in a leaf slot.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KvPair {
    pub key: Bytes,
    pub value: Bytes,
}

impl KvPair {
    pub fn new(key: Bytes, value: Bytes) -> Self {
        Self { key, value }
    }
}

/// Index-addressable slot array of a leaf node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackedStorage {
    slots: Vec<Option<KvPair>>,
    n_entries: usize,
}

impl PackedStorage {
    /// Creates empty storage with `capacity` slots.
    pub fn new(capacity: usize) -> Self {
        Self {
            slots: vec![None; capacity],
            n_entries: 0,
        }
    }

    /// Returns the number of slots (one past the highest valid index).
    #[inline]
    pub fn index_limit(&self) -> usize {
        self.slots.len()
    }

    /// Returns the number of occupied slots.
    #[inline]
    pub fn n_entries(&self) -> usize {
        self.n_entries
    }

    /// Returns true if no slot is occupied.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.n_entries == 0
    }

    /// Returns the pair at `index`, if the slot is occupied.
    pub fn get(&self, index: usize) -> Option<&KvPair> {
        self.slots.get(index).and_then(|slot| slot.as_ref())
    }

    /// Iterates over occupied slots as `(index, pair)` in index order.
    pub fn iter(&self) -> impl Iterator<Item = (usize, &KvPair)> {
        self.slots
            .iter()
            .enumerate()
            .filter_map(|(i, slot)| slot.as_ref().map(|pair| (i, pair)))
    }

    fn check_index(&self, index: usize) -> Result<()> {
        if index >= self.slots.len() {
            return Err(ArborError::IndexOutOfRange {
                index,
                limit: self.slots.len(),
            });
        }
        Ok(())
    }

    /// Stores a pair in an empty slot.
    pub fn set_at_index(&mut self, index: usize, key: Bytes, value: Bytes) -> Result<()> {
        self.check_index(index)?;
        let slot = &mut self.slots[index];
        if slot.is_some() {
            return Err(ArborError::SlotOccupied(index));
        }
        *slot = Some(KvPair::new(key, value));
        self.n_entries += 1;
        Ok(())
    }

    /// Empties an occupied slot, returning the pair it held.
    pub fn clear_at_index(&mut self, index: usize) -> Result<KvPair> {
        self.check_index(index)?;
        let pair = self.slots[index]
            .take()
            .ok_or(ArborError::SlotEmpty(index))?;
        self.n_entries -= 1;
        Ok(pair)
    }

    /// Changes the capacity from exactly `old_size` to `new_size` slots.
    ///
    /// Shrinking may only drop empty slots.
    pub fn resize_exactly(&mut self, old_size: usize, new_size: usize) -> Result<()> {
        if old_size != self.slots.len() {
            return Err(ArborError::TreeCorrupted(format!(
                "resize from {} slots but storage holds {}",
                old_size,
                self.slots.len()
            )));
        }
        if let Some(index) = self.slots[new_size.min(old_size)..]
            .iter()
            .position(|slot| slot.is_some())
        {
            return Err(ArborError::SlotOccupied(new_size + index));
        }
        self.slots.resize(new_size, None);
        Ok(())
    }

    /// Moves the pair in each `pair.a` of `self` to slot `pair.b` of `dest`.
    ///
    /// Every pair is validated before anything moves. Returns the moved
    /// pairs in `pairs` order.
    pub fn move_indices(
        &mut self,
        dest: &mut PackedStorage,
        pairs: &[IndexPair],
    ) -> Result<Vec<KvPair>> {
        transfer(self, dest, pairs.iter().map(|p| (p.a as usize, p.b as usize)))
    }

    /// Moves the pair in each `pair.b` of `source` back to slot `pair.a` of
    /// `self`, undoing [`PackedStorage::move_indices`].
    pub fn move_indices_back(
        &mut self,
        source: &mut PackedStorage,
        pairs: &[IndexPair],
    ) -> Result<Vec<KvPair>> {
        transfer(source, self, pairs.iter().map(|p| (p.b as usize, p.a as usize)))
    }
}

fn transfer(
    from: &mut PackedStorage,
    to: &mut PackedStorage,
    moves: impl Iterator<Item = (usize, usize)> + Clone,
) -> Result<Vec<KvPair>> {
    let mut sources = HashSet::new();
    let mut targets = HashSet::new();
    for (src, dst) in moves.clone() {
        from.check_index(src)?;
        to.check_index(dst)?;
        if from.get(src).is_none() || !sources.insert(src) {
            return Err(ArborError::SlotEmpty(src));
        }
        if to.get(dst).is_some() || !targets.insert(dst) {
            return Err(ArborError::SlotOccupied(dst));
        }
    }

    let mut moved = Vec::with_capacity(sources.len());
    for (src, dst) in moves {
        let pair = from.clear_at_index(src)?;
        to.set_at_index(dst, pair.key.clone(), pair.value.clone())?;
        moved.push(pair);
    }
    Ok(moved)
}
