//! Core library for the peer-to-peer ring.
//!
//! This crate provides the keyspace primitives every node shares:
//! - Tokens: positions in the 63-bit circular key space
//! - Interval arithmetic on the circle
//! - Atomically updated node pointers and the finger table
//! - The ring membership state machine

pub mod error;
pub mod node;
pub mod ring;
pub mod token;

pub use error::{Error, Result};
pub use node::AtomicNodeId;
pub use ring::{inside, FingerTable, NodeState, RingState, FINGER_COUNT};
pub use token::{NodeId, RecordKey, Token, KEY_SPACE_BITS, KEY_SPACE_MASK};
