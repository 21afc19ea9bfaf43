//! Page replacement policies for the cache table.

use parking_lot::Mutex;
use std::collections::HashMap;
use std::hash::Hash;

/// Trait for page replacement algorithms.
pub trait Replacer<K>: Send + Sync {
    /// Records that the given page was accessed.
    fn record_access(&self, key: K);

    /// Marks a page as evictable (unpinned) or not. Unknown keys are added.
    fn set_evictable(&self, key: K, evictable: bool);

    /// Selects a victim page for eviction and forgets it.
    ///
    /// Returns None if no pages are evictable.
    fn evict(&self) -> Option<K>;

    /// Removes a page from the replacer.
    fn remove(&self, key: K);

    /// Returns the number of evictable pages.
    fn size(&self) -> usize;
}

/// Clock replacement over an open-ended set of page keys.
///
/// Keys sit on a ring in insertion order. When selecting a victim:
/// 1. Check if the key under the hand is evictable with reference bit 0
/// 2. If yes, select it as victim
/// 3. If no, clear its reference bit and advance the hand
/// 4. Repeat for at most two rotations
pub struct ClockReplacer<K> {
    inner: Mutex<ClockReplacerInner<K>>,
}

struct ClockSlot {
    index: usize,
    reference: bool,
    evictable: bool,
}

struct ClockReplacerInner<K> {
    /// Keys in clock order.
    ring: Vec<K>,
    /// Per-key state, including its index in `ring`.
    slots: HashMap<K, ClockSlot>,
    /// Number of evictable keys.
    evictable: usize,
    /// Current clock hand position.
    clock_hand: usize,
}

impl<K: Copy + Eq + Hash> ClockReplacerInner<K> {
    fn forget(&mut self, key: K) {
        let Some(slot) = self.slots.remove(&key) else {
            return;
        };
        if slot.evictable {
            self.evictable -= 1;
        }
        self.ring.swap_remove(slot.index);
        if let Some(moved) = self.ring.get(slot.index).copied() {
            if let Some(moved_slot) = self.slots.get_mut(&moved) {
                moved_slot.index = slot.index;
            }
        }
        if self.clock_hand >= self.ring.len() {
            self.clock_hand = 0;
        }
    }
}

impl<K: Copy + Eq + Hash> ClockReplacer<K> {
    /// Creates an empty clock replacer.
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(ClockReplacerInner {
                ring: Vec::new(),
                slots: HashMap::new(),
                evictable: 0,
                clock_hand: 0,
            }),
        }
    }

    /// Returns the number of tracked keys, evictable or not.
    pub fn len(&self) -> usize {
        self.inner.lock().ring.len()
    }

    /// Returns true if no keys are tracked.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<K: Copy + Eq + Hash> Default for ClockReplacer<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: Copy + Eq + Hash + Send> Replacer<K> for ClockReplacer<K> {
    fn record_access(&self, key: K) {
        let mut inner = self.inner.lock();
        if let Some(slot) = inner.slots.get_mut(&key) {
            slot.reference = true;
        }
    }

    fn set_evictable(&self, key: K, evictable: bool) {
        let mut inner = self.inner.lock();
        let inner = &mut *inner;

        match inner.slots.get_mut(&key) {
            Some(slot) => {
                if slot.evictable != evictable {
                    slot.evictable = evictable;
                    if evictable {
                        inner.evictable += 1;
                    } else {
                        inner.evictable -= 1;
                    }
                }
            }
            None => {
                let index = inner.ring.len();
                inner.ring.push(key);
                inner.slots.insert(
                    key,
                    ClockSlot {
                        index,
                        reference: false,
                        evictable,
                    },
                );
                if evictable {
                    inner.evictable += 1;
                }
            }
        }
    }

    fn evict(&self) -> Option<K> {
        let mut inner = self.inner.lock();

        if inner.evictable == 0 {
            return None;
        }

        // Make at most 2 full rotations to find a victim
        for _ in 0..(2 * inner.ring.len()) {
            let hand = inner.clock_hand;
            let key = inner.ring[hand];
            let mut victim = false;

            if let Some(slot) = inner.slots.get_mut(&key) {
                if slot.evictable {
                    if slot.reference {
                        slot.reference = false;
                    } else {
                        victim = true;
                    }
                }
            }

            if victim {
                inner.forget(key);
                return Some(key);
            }

            inner.clock_hand = (hand + 1) % inner.ring.len();
        }

        None
    }

    fn remove(&self, key: K) {
        self.inner.lock().forget(key);
    }

    fn size(&self) -> usize {
        self.inner.lock().evictable
    }
}
