//! Atomic storage for node identifiers.
//!
//! Predecessor pointers and finger slots are read without locks and updated
//! by compare-and-set. An unknown id is stored as `-1`; callers only ever see
//! `Option<NodeId>`.

use std::fmt;
use std::sync::atomic::{AtomicI64, Ordering};

use crate::token::{NodeId, Token};

const UNKNOWN: i64 = -1;

#[inline]
fn encode(id: Option<NodeId>) -> i64 {
    match id {
        // Tokens are below 2^63, so the cast never goes negative.
        Some(id) => id.value() as i64,
        None => UNKNOWN,
    }
}

#[inline]
fn decode(raw: i64) -> Option<NodeId> {
    if raw < 0 {
        None
    } else {
        Some(Token::wrapping(raw as u64))
    }
}

/// A node id that may be unknown, updated atomically.
pub struct AtomicNodeId(AtomicI64);

impl AtomicNodeId {
    pub fn new(id: Option<NodeId>) -> Self {
        Self(AtomicI64::new(encode(id)))
    }

    pub fn unknown() -> Self {
        Self::new(None)
    }

    #[inline]
    pub fn load(&self) -> Option<NodeId> {
        decode(self.0.load(Ordering::Acquire))
    }

    #[inline]
    pub fn store(&self, id: Option<NodeId>) {
        self.0.store(encode(id), Ordering::Release);
    }

    /// Replaces the value with `new` only if it still equals `expected`.
    ///
    /// Returns `true` when the swap happened.
    #[inline]
    pub fn compare_and_set(&self, expected: Option<NodeId>, new: Option<NodeId>) -> bool {
        self.0
            .compare_exchange(encode(expected), encode(new), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for AtomicNodeId {
    fn default() -> Self {
        Self::unknown()
    }
}

impl fmt::Debug for AtomicNodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("AtomicNodeId").field(&self.load()).finish()
    }
}
