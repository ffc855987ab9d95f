//! Peer-to-peer key distribution over a self-organizing ring.
//!
//! This crate provides the node side of the ring:
//! - Membership lifecycle: create, join, notify, migration hand-off
//! - Finger-table routing from any key to its owner
//! - Stabilization of successor, finger and predecessor pointers
//! - Background record migration when a node joins in front of us
//! - A record façade that stays correct while keys are in flight

pub mod config;
pub mod directory;
pub mod error;
pub mod handle;
pub mod lock;
pub mod migration;
pub mod node;
pub mod records;
pub mod routing;
pub mod scheduler;
pub mod stabilize;
pub mod store;

pub use config::{Credential, DhtConfig};
pub use directory::{InMemoryDirectory, NodeLookup};
pub use error::{DhtError, Result, StoreError};
pub use handle::DhtNode;
pub use lock::KeyLockManager;
pub use node::LocalDhtNode;
pub use scheduler::Maintenance;
pub use store::{MemoryStore, Record, RecordStore};
