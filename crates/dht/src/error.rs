//! Error types for ring operations and the local record store.

use std::time::Duration;

use corelib::{NodeId, RecordKey};

/// Errors raised by a [`crate::store::RecordStore`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    #[error("record {key} not found in storage '{storage}'")]
    NotFound { storage: String, key: RecordKey },

    #[error("record {key} already exists in storage '{storage}'")]
    AlreadyExists { storage: String, key: RecordKey },

    /// Optimistic version check failed.
    #[error("version conflict on record {key}: expected {expected}, found {actual}")]
    VersionConflict {
        key: RecordKey,
        expected: u64,
        actual: u64,
    },

    #[error("principal '{0}' is not allowed to open the store")]
    Unauthorized(String),
}

/// Errors raised by ring membership, routing and record operations.
#[derive(Debug, Clone, thiserror::Error)]
pub enum DhtError {
    /// The node-lookup directory has no reachable handle for this id.
    #[error("node {0} is not reachable through the directory")]
    NodeUnreachable(NodeId),

    /// The node has neither created nor joined a ring.
    #[error("node {0} has no successor yet")]
    NoSuccessor(NodeId),

    /// Routing gave up after too many hops, usually because of stale fingers.
    #[error("lookup of key {key} exceeded {hops} hops")]
    HopLimitExceeded { key: RecordKey, hops: usize },

    #[error("timed out after {timeout:?} waiting for the lock on record {key}")]
    LockTimeout { key: RecordKey, timeout: Duration },

    #[error("node {node} is still joining after {waited:?}")]
    JoinWaitTimeout { node: NodeId, waited: Duration },

    /// The local node was dropped while a request was in flight.
    #[error("node {0} is shut down")]
    ShutDown(NodeId),

    /// A peer reported a failure of its own.
    #[error("remote call to node {node} failed: {message}")]
    Remote { node: NodeId, message: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl DhtError {
    /// True for a missing record, the only store error a MERGING fallback
    /// treats as plain absence.
    pub fn is_not_found(&self) -> bool {
        matches!(self, DhtError::Store(StoreError::NotFound { .. }))
    }
}

pub type Result<T> = std::result::Result<T, DhtError>;
