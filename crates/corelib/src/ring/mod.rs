//! Ring bookkeeping shared by every node.
//!
//! Interval arithmetic on the circular key space, the finger table used for
//! routing, and the membership state machine.

pub mod finger;
pub mod interval;
pub mod state;

pub use finger::{FingerTable, FINGER_COUNT};
pub use interval::{inside, inside_half_open, inside_open};
pub use state::{NodeState, RingState};
