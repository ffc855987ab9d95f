//! Client record operations.
//!
//! Every operation waits out JOINING and holds the record's exclusive lock
//! for the local part of its work. While MERGING, reads and deletes that miss
//! locally also consult the node we are migrating from; a failure there
//! counts as "not found".

use bytes::Bytes;
use corelib::{NodeId, NodeState, RecordKey};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{DhtError, Result};
use crate::node::LocalDhtNode;
use crate::store::Record;

impl LocalDhtNode {
    pub async fn create_record(&self, storage: &str, key: RecordKey, content: Bytes, version: u64) -> Result<u64> {
        self.wait_until_joined().await?;
        let _guard = self.locks.acquire(storage, key, self.config.lock_timeout).await?;
        let credential = &self.config.replication_credential;
        Ok(self.store.create(credential, storage, key, content, version).await?)
    }

    pub async fn read_record(&self, storage: &str, key: RecordKey) -> Result<Option<Record>> {
        self.wait_until_joined().await?;
        if let Some(record) = self.read_local(storage, key).await? {
            return Ok(Some(record));
        }
        let Some(source) = self.merge_source() else {
            return Ok(None);
        };

        match self.resolve(source) {
            Ok(peer) => match peer.read_record(storage, key).await {
                Ok(Some(record)) => return Ok(Some(record)),
                Ok(None) => {}
                Err(err) => warn!(node = %self.id, %source, %key, error = %err, "fallback read failed"),
            },
            Err(err) => warn!(node = %self.id, %source, %key, error = %err, "fallback read failed"),
        }

        // The record may have been migrated here while we were asking.
        self.read_local(storage, key).await
    }

    pub async fn update_record(&self, storage: &str, key: RecordKey, content: Bytes, version: u64) -> Result<u64> {
        self.wait_until_joined().await?;
        let _guard = self.locks.acquire(storage, key, self.config.lock_timeout).await?;
        let credential = &self.config.replication_credential;
        Ok(self.store.update(credential, storage, key, content, version).await?)
    }

    pub async fn delete_record(&self, storage: &str, key: RecordKey, version: u64) -> Result<bool> {
        self.wait_until_joined().await?;
        if self.delete_local(storage, key, version).await? {
            return Ok(true);
        }
        let Some(source) = self.merge_source() else {
            return Ok(false);
        };

        match self.resolve(source) {
            Ok(peer) => match peer.delete_record(storage, key, version).await {
                Ok(true) => return Ok(true),
                Ok(false) => {}
                Err(err) => warn!(node = %self.id, %source, %key, error = %err, "fallback delete failed"),
            },
            Err(err) => warn!(node = %self.id, %source, %key, error = %err, "fallback delete failed"),
        }

        self.delete_local(storage, key, version).await
    }

    async fn read_local(&self, storage: &str, key: RecordKey) -> Result<Option<Record>> {
        let _guard = self.locks.acquire(storage, key, self.config.lock_timeout).await?;
        let credential = &self.config.replication_credential;
        Ok(self.store.read(credential, storage, key).await?)
    }

    async fn delete_local(&self, storage: &str, key: RecordKey, version: u64) -> Result<bool> {
        let _guard = self.locks.acquire(storage, key, self.config.lock_timeout).await?;
        let credential = &self.config.replication_credential;
        Ok(self.store.delete(credential, storage, key, version).await?)
    }

    /// Previous owner to fall back on, only while MERGING.
    fn merge_source(&self) -> Option<NodeId> {
        if self.state.load() != NodeState::Merging {
            return None;
        }
        self.migration_source.load().filter(|source| *source != self.id)
    }

    /// Polls until the node has left JOINING.
    async fn wait_until_joined(&self) -> Result<()> {
        let started = Instant::now();
        while self.state.load() == NodeState::Joining {
            if let Some(timeout) = self.config.join_wait_timeout {
                let waited = started.elapsed();
                if waited >= timeout {
                    return Err(DhtError::JoinWaitTimeout { node: self.id, waited });
                }
            }
            debug!(node = %self.id, "waiting for join to complete");
            tokio::time::sleep(self.config.join_poll_interval).await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use bytes::Bytes;
    use corelib::{NodeState, Token};

    use crate::config::{Credential, DhtConfig};
    use crate::directory::InMemoryDirectory;
    use crate::error::{DhtError, StoreError};
    use crate::node::LocalDhtNode;
    use crate::store::MemoryStore;

    const STORAGE: &str = "docs";

    fn node(directory: &Arc<InMemoryDirectory>, id: u64) -> Arc<LocalDhtNode> {
        let node = LocalDhtNode::new(
            Token::wrapping(id),
            directory.clone(),
            Arc::new(MemoryStore::new()),
            DhtConfig::test_config(),
        );
        directory.register(node.clone());
        node
    }

    /// `new_owner` is MERGING and has not received anything from `old_owner`.
    fn merging_pair(directory: &Arc<InMemoryDirectory>) -> (Arc<LocalDhtNode>, Arc<LocalDhtNode>) {
        let old_owner = node(directory, 1000);
        let new_owner = node(directory, 500);
        old_owner.create();
        new_owner.fingers.set(0, Some(old_owner.id()));
        new_owner.migration_source.store(Some(old_owner.id()));
        new_owner.state.reset(NodeState::Merging);
        (old_owner, new_owner)
    }

    #[tokio::test]
    async fn test_crud_on_stable_node() {
        let directory = Arc::new(InMemoryDirectory::new());
        let a = node(&directory, 1);
        a.create();
        let key = Token::wrapping(42);

        assert_eq!(a.create_record(STORAGE, key, Bytes::from_static(b"v0"), 0).await.unwrap(), 0);
        assert_eq!(a.update_record(STORAGE, key, Bytes::from_static(b"v1"), 0).await.unwrap(), 1);

        let record = a.read_record(STORAGE, key).await.unwrap().unwrap();
        assert_eq!(record.content, Bytes::from_static(b"v1"));
        assert_eq!(record.version, 1);

        assert!(a.delete_record(STORAGE, key, 1).await.unwrap());
        assert_eq!(a.read_record(STORAGE, key).await.unwrap(), None);
        assert!(!a.delete_record(STORAGE, key, 1).await.unwrap());
        assert!(a.locks.is_empty());
    }

    #[tokio::test]
    async fn test_merging_read_falls_back_to_previous_owner() {
        let directory = Arc::new(InMemoryDirectory::new());
        let (old_owner, new_owner) = merging_pair(&directory);
        let key = Token::wrapping(400);
        old_owner
            .create_record(STORAGE, key, Bytes::from_static(b"in flight"), 3)
            .await
            .unwrap();

        let record = new_owner.read_record(STORAGE, key).await.unwrap().unwrap();
        assert_eq!(record.version, 3);
        assert_eq!(new_owner.read_record(STORAGE, Token::wrapping(401)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_merging_delete_falls_back_to_previous_owner() {
        let directory = Arc::new(InMemoryDirectory::new());
        let (old_owner, new_owner) = merging_pair(&directory);
        let key = Token::wrapping(400);
        old_owner.create_record(STORAGE, key, Bytes::new(), 0).await.unwrap();

        assert!(new_owner.delete_record(STORAGE, key, 0).await.unwrap());
        assert_eq!(old_owner.read_record(STORAGE, key).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_merging_create_and_update_stay_local() {
        let directory = Arc::new(InMemoryDirectory::new());
        let (old_owner, new_owner) = merging_pair(&directory);
        let key = Token::wrapping(400);
        old_owner.create_record(STORAGE, key, Bytes::new(), 0).await.unwrap();

        let err = new_owner
            .update_record(STORAGE, key, Bytes::from_static(b"x"), 0)
            .await
            .unwrap_err();
        assert!(err.is_not_found());

        new_owner.create_record(STORAGE, Token::wrapping(450), Bytes::new(), 0).await.unwrap();
        assert_eq!(old_owner.read_record(STORAGE, Token::wrapping(450)).await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_unreachable_previous_owner_means_not_found() {
        let directory = Arc::new(InMemoryDirectory::new());
        let (old_owner, new_owner) = merging_pair(&directory);
        let key = Token::wrapping(400);
        old_owner.create_record(STORAGE, key, Bytes::new(), 0).await.unwrap();
        directory.remove(old_owner.id());

        assert_eq!(new_owner.read_record(STORAGE, key).await.unwrap(), None);
        assert!(!new_owner.delete_record(STORAGE, key, 0).await.unwrap());
    }

    #[tokio::test]
    async fn test_join_wait_times_out() {
        let directory = Arc::new(InMemoryDirectory::new());
        let config = DhtConfig::test_config()
            .with_join_wait(Duration::from_millis(5), Some(Duration::from_millis(30)));
        let a = LocalDhtNode::new(Token::wrapping(1), directory.clone(), Arc::new(MemoryStore::new()), config);

        let err = a.read_record(STORAGE, Token::wrapping(2)).await.unwrap_err();
        assert!(matches!(err, DhtError::JoinWaitTimeout { .. }));
    }

    #[tokio::test]
    async fn test_store_errors_surface() {
        let directory = Arc::new(InMemoryDirectory::new());
        let config = DhtConfig::test_config()
            .with_replication_credential(Credential::new("intruder", "guess"));
        let store = Arc::new(MemoryStore::with_credential(Credential::new("replicator", "s3cret")));
        let a = LocalDhtNode::new(Token::wrapping(1), directory.clone(), store, config);
        a.create();

        let err = a.read_record(STORAGE, Token::wrapping(2)).await.unwrap_err();
        assert!(matches!(
            err,
            DhtError::Store(StoreError::Unauthorized(ref principal)) if principal == "intruder"
        ));
        assert!(a.locks.is_empty());
    }

    #[tokio::test]
    async fn test_lock_released_after_version_conflict() {
        let directory = Arc::new(InMemoryDirectory::new());
        let a = node(&directory, 1);
        a.create();
        let key = Token::wrapping(42);
        a.create_record(STORAGE, key, Bytes::from_static(b"v0"), 0).await.unwrap();

        let err = a
            .update_record(STORAGE, key, Bytes::from_static(b"stale"), 7)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            DhtError::Store(StoreError::VersionConflict { expected: 7, actual: 0, .. })
        ));
        assert!(a.locks.is_empty());

        let err = a.delete_record(STORAGE, key, 7).await.unwrap_err();
        assert!(matches!(err, DhtError::Store(StoreError::VersionConflict { .. })));
        assert!(a.locks.is_empty());

        // The record stays usable.
        assert_eq!(a.update_record(STORAGE, key, Bytes::from_static(b"v1"), 0).await.unwrap(), 1);
    }
}
