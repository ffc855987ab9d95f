//! The RPC surface every peer exposes.
//!
//! Calls are peer-to-peer and synchronous from the caller's point of view.
//! [`crate::LocalDhtNode`] implements it directly; a networked deployment
//! would implement it on a client stub that talks to the remote process.

use async_trait::async_trait;
use bytes::Bytes;
use corelib::{NodeId, RecordKey};

use crate::error::Result;
use crate::store::Record;

#[async_trait]
pub trait DhtNode: Send + Sync + 'static {
    fn node_id(&self) -> NodeId;

    /// Owner of `key`, resolved from this peer's point of view.
    async fn find_successor(&self, key: RecordKey) -> Result<NodeId>;

    /// Highest known finger strictly between this peer and `key`, or the
    /// peer itself when none qualifies. One step of an iterative lookup.
    async fn closest_preceding_finger(&self, key: RecordKey) -> Result<NodeId>;

    async fn successor(&self) -> Result<Option<NodeId>>;

    async fn predecessor(&self) -> Result<Option<NodeId>>;

    /// `candidate` believes it might be this peer's predecessor.
    async fn notify(&self, candidate: NodeId) -> Result<()>;

    /// `source` finished moving records to this peer.
    async fn notify_migration_end(&self, source: NodeId) -> Result<()>;

    /// `requester` just joined in front of this peer and wants its records.
    async fn request_migration(&self, requester: NodeId) -> Result<()>;

    async fn create_record(&self, storage: &str, key: RecordKey, content: Bytes, version: u64) -> Result<u64>;

    async fn read_record(&self, storage: &str, key: RecordKey) -> Result<Option<Record>>;

    async fn update_record(&self, storage: &str, key: RecordKey, content: Bytes, version: u64) -> Result<u64>;

    async fn delete_record(&self, storage: &str, key: RecordKey, version: u64) -> Result<bool>;
}
