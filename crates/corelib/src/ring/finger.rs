//! Finger table.
//!
//! Slot `i` holds the current estimate of the owner of `(self + 2^i) mod 2^63`.
//! Slot 0 is the immediate successor. Readers never block; writers replace a
//! slot with compare-and-set so concurrent repairs never tear a value.

use std::fmt;

use crate::node::AtomicNodeId;
use crate::token::{NodeId, KEY_SPACE_BITS};

/// One slot per bit of the key space.
pub const FINGER_COUNT: usize = KEY_SPACE_BITS as usize;

pub struct FingerTable {
    slots: Box<[AtomicNodeId]>,
}

impl FingerTable {
    /// A table with every slot unknown.
    pub fn new() -> Self {
        let slots = (0..FINGER_COUNT).map(|_| AtomicNodeId::unknown()).collect();
        Self { slots }
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// # Panics
    ///
    /// Panics if `index >= FINGER_COUNT`.
    #[inline]
    pub fn get(&self, index: usize) -> Option<NodeId> {
        self.slots[index].load()
    }

    /// Unconditional write, used when a join or ring creation resets slot 0.
    #[inline]
    pub fn set(&self, index: usize, id: Option<NodeId>) {
        self.slots[index].store(id);
    }

    #[inline]
    pub fn compare_and_set(&self, index: usize, expected: Option<NodeId>, new: Option<NodeId>) -> bool {
        self.slots[index].compare_and_set(expected, new)
    }

    #[inline]
    pub fn successor(&self) -> Option<NodeId> {
        self.get(0)
    }

    /// Slots from highest index down, as `(index, id)` for the known ones.
    pub fn iter_descending(&self) -> impl Iterator<Item = (usize, NodeId)> + '_ {
        (0..self.slots.len())
            .rev()
            .filter_map(move |i| self.get(i).map(|id| (i, id)))
    }

    /// Point-in-time copy of every slot.
    pub fn snapshot(&self) -> Vec<Option<NodeId>> {
        self.slots.iter().map(AtomicNodeId::load).collect()
    }

    /// Clears every routing slot still pointing at `id`. Slot 0 is left
    /// alone: it is only ever replaced, never cleared. Returns how many slots
    /// were cleared.
    pub fn forget(&self, id: NodeId) -> usize {
        self.slots[1..]
            .iter()
            .filter(|slot| slot.compare_and_set(Some(id), None))
            .count()
    }
}

impl Default for FingerTable {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for FingerTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.snapshot()).finish()
    }
}
