//! Ring membership state machine.

use std::fmt;
use std::sync::atomic::{AtomicU8, Ordering};

use crate::error::{Error, Result};

/// Lifecycle of a node on the ring.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Hash)]
#[repr(u8)]
pub enum NodeState {
    /// Joined the ring but no predecessor accepted yet. Client traffic waits.
    Joining = 0,
    /// Serving traffic while records still arrive from the previous owner.
    Merging = 1,
    /// Fully responsible for its interval.
    Stable = 2,
}

impl TryFrom<u8> for NodeState {
    type Error = Error;

    fn try_from(raw: u8) -> Result<Self> {
        match raw {
            0 => Ok(NodeState::Joining),
            1 => Ok(NodeState::Merging),
            2 => Ok(NodeState::Stable),
            other => Err(Error::InvalidState(other)),
        }
    }
}

impl fmt::Display for NodeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            NodeState::Joining => "JOINING",
            NodeState::Merging => "MERGING",
            NodeState::Stable => "STABLE",
        };
        f.write_str(name)
    }
}

/// Atomically held [`NodeState`]. Transitions go through compare-and-set so
/// repeating one is a no-op.
pub struct RingState(AtomicU8);

impl RingState {
    pub fn new(state: NodeState) -> Self {
        Self(AtomicU8::new(state as u8))
    }

    #[inline]
    pub fn load(&self) -> NodeState {
        let raw = self.0.load(Ordering::Acquire);
        match NodeState::try_from(raw) {
            Ok(state) => state,
            // Only `NodeState as u8` is ever stored.
            Err(err) => unreachable!("{err}"),
        }
    }

    /// Forces a state regardless of the current one. Only ring creation and
    /// join reset the lifecycle this way.
    #[inline]
    pub fn reset(&self, state: NodeState) {
        self.0.store(state as u8, Ordering::Release);
    }

    /// Moves `from -> to`. Returns `false` if the state was not `from`.
    #[inline]
    pub fn transition(&self, from: NodeState, to: NodeState) -> bool {
        self.0
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}

impl Default for RingState {
    fn default() -> Self {
        Self::new(NodeState::Joining)
    }
}

impl fmt::Debug for RingState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("RingState").field(&self.load()).finish()
    }
}
