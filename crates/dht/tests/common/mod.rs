//! Shared fixtures for ring integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use corelib::{NodeId, NodeState, RecordKey, Token};
use dht::{
    Credential, DhtConfig, DhtNode, InMemoryDirectory, LocalDhtNode, MemoryStore, Record,
    RecordStore, Result, StoreError,
};

pub const STORAGE: &str = "docs";

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing_subscriber::filter::LevelFilter::DEBUG)
        .with_test_writer()
        .try_init();
}

/// A node plus the store behind it.
pub struct Member {
    pub node: Arc<LocalDhtNode>,
    pub store: Arc<MemoryStore>,
}

/// Nodes sharing one in-memory directory.
pub struct Cluster {
    pub directory: Arc<InMemoryDirectory>,
    pub members: Vec<Member>,
}

impl Cluster {
    pub fn new() -> Self {
        init_tracing();
        Self {
            directory: Arc::new(InMemoryDirectory::new()),
            members: Vec::new(),
        }
    }

    /// Adds an unjoined node and registers it in the directory.
    pub fn add(&mut self, id: u64) -> Arc<LocalDhtNode> {
        let node = self.spawn(id);
        self.directory.register(node.clone());
        node
    }

    /// Adds an unjoined node without registering it; the caller registers a
    /// wrapper instead.
    pub fn spawn(&mut self, id: u64) -> Arc<LocalDhtNode> {
        let store = Arc::new(MemoryStore::new());
        self.spawn_on(id, store.clone(), store)
    }

    /// Adds a registered, unjoined node whose store stalls every update.
    pub fn add_with_slow_updates(
        &mut self,
        id: u64,
        delay: Duration,
    ) -> (Arc<LocalDhtNode>, Arc<SlowUpdateStore>) {
        let store = Arc::new(MemoryStore::new());
        let slow = Arc::new(SlowUpdateStore {
            inner: store.clone(),
            delay,
            updates: AtomicUsize::new(0),
        });
        let node = self.spawn_on(id, slow.clone(), store);
        self.directory.register(node.clone());
        (node, slow)
    }

    fn spawn_on(
        &mut self,
        id: u64,
        backend: Arc<dyn RecordStore>,
        store: Arc<MemoryStore>,
    ) -> Arc<LocalDhtNode> {
        let node = LocalDhtNode::new(
            Token::wrapping(id),
            self.directory.clone(),
            backend,
            DhtConfig::test_config(),
        );
        self.members.push(Member {
            node: node.clone(),
            store,
        });
        node
    }

    pub fn nodes(&self) -> Vec<Arc<LocalDhtNode>> {
        self.members.iter().map(|m| m.node.clone()).collect()
    }

    pub fn member(&self, id: NodeId) -> &Member {
        self.members
            .iter()
            .find(|m| m.node.id() == id)
            .expect("unknown member")
    }

    /// Sorted ids of every member.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.members.iter().map(|m| m.node.id()).collect();
        ids.sort();
        ids
    }

    /// One stabilize + fix_predecessor per node, `rounds` times.
    pub async fn stabilize(&self, rounds: usize) {
        for _ in 0..rounds {
            for member in &self.members {
                member.node.stabilize().await.unwrap();
                member.node.fix_predecessor();
            }
        }
    }

    pub async fn refresh_fingers(&self) {
        for member in &self.members {
            member.node.refresh_fingers().await.unwrap();
        }
    }

    /// Waits until every node has finished merging.
    pub async fn wait_stable(&self) {
        let nodes = self.nodes();
        wait_until(|| nodes.iter().all(|n| n.state() == NodeState::Stable)).await;
    }
}

/// Polls `condition` every few milliseconds, failing after five seconds.
pub async fn wait_until(mut condition: impl FnMut() -> bool) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}

/// The node whose `(predecessor, self]` contains `key`.
pub fn expected_owner(sorted_ids: &[NodeId], key: RecordKey) -> NodeId {
    sorted_ids
        .iter()
        .copied()
        .find(|id| *id >= key)
        .unwrap_or(sorted_ids[0])
}

/// Wraps a node to slow down lookups or incoming creates, and to count
/// migration requests and creates.
pub struct InstrumentedNode {
    inner: Arc<LocalDhtNode>,
    lookup_delay: Duration,
    create_delay: Duration,
    migration_requests: AtomicUsize,
    creates: AtomicUsize,
}

impl InstrumentedNode {
    pub fn new(inner: Arc<LocalDhtNode>, lookup_delay: Duration) -> Arc<Self> {
        Self::with_delays(inner, lookup_delay, Duration::ZERO)
    }

    pub fn with_delays(inner: Arc<LocalDhtNode>, lookup_delay: Duration, create_delay: Duration) -> Arc<Self> {
        Arc::new(Self {
            inner,
            lookup_delay,
            create_delay,
            migration_requests: AtomicUsize::new(0),
            creates: AtomicUsize::new(0),
        })
    }

    pub fn migration_requests(&self) -> usize {
        self.migration_requests.load(Ordering::SeqCst)
    }

    /// Creates received so far, counted before the delay.
    pub fn creates(&self) -> usize {
        self.creates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl DhtNode for InstrumentedNode {
    fn node_id(&self) -> NodeId {
        self.inner.id()
    }

    async fn find_successor(&self, key: RecordKey) -> Result<NodeId> {
        tokio::time::sleep(self.lookup_delay).await;
        DhtNode::find_successor(self.inner.as_ref(), key).await
    }

    async fn closest_preceding_finger(&self, key: RecordKey) -> Result<NodeId> {
        DhtNode::closest_preceding_finger(self.inner.as_ref(), key).await
    }

    async fn successor(&self) -> Result<Option<NodeId>> {
        Ok(self.inner.successor())
    }

    async fn predecessor(&self) -> Result<Option<NodeId>> {
        Ok(self.inner.predecessor())
    }

    async fn notify(&self, candidate: NodeId) -> Result<()> {
        self.inner.notify(candidate);
        Ok(())
    }

    async fn notify_migration_end(&self, source: NodeId) -> Result<()> {
        self.inner.notify_migration_end(source);
        Ok(())
    }

    async fn request_migration(&self, requester: NodeId) -> Result<()> {
        self.migration_requests.fetch_add(1, Ordering::SeqCst);
        self.inner.request_migration(requester)
    }

    async fn create_record(&self, storage: &str, key: RecordKey, content: Bytes, version: u64) -> Result<u64> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.create_delay).await;
        self.inner.create_record(storage, key, content, version).await
    }

    async fn read_record(&self, storage: &str, key: RecordKey) -> Result<Option<Record>> {
        self.inner.read_record(storage, key).await
    }

    async fn update_record(&self, storage: &str, key: RecordKey, content: Bytes, version: u64) -> Result<u64> {
        self.inner.update_record(storage, key, content, version).await
    }

    async fn delete_record(&self, storage: &str, key: RecordKey, version: u64) -> Result<bool> {
        self.inner.delete_record(storage, key, version).await
    }
}

/// A store whose updates sleep before applying, holding the caller's record
/// lock for the duration.
pub struct SlowUpdateStore {
    inner: Arc<MemoryStore>,
    delay: Duration,
    updates: AtomicUsize,
}

impl SlowUpdateStore {
    /// Updates started so far, counted before the delay.
    pub fn updates(&self) -> usize {
        self.updates.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl RecordStore for SlowUpdateStore {
    async fn create(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        content: Bytes,
        version: u64,
    ) -> std::result::Result<u64, StoreError> {
        self.inner.create(credential, storage, key, content, version).await
    }

    async fn read(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
    ) -> std::result::Result<Option<Record>, StoreError> {
        self.inner.read(credential, storage, key).await
    }

    async fn update(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        content: Bytes,
        version: u64,
    ) -> std::result::Result<u64, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.delay).await;
        self.inner.update(credential, storage, key, content, version).await
    }

    async fn delete(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        version: u64,
    ) -> std::result::Result<bool, StoreError> {
        self.inner.delete(credential, storage, key, version).await
    }

    async fn keys(&self, credential: &Credential, storage: &str) -> std::result::Result<Vec<RecordKey>, StoreError> {
        self.inner.keys(credential, storage).await
    }

    async fn storages(&self, credential: &Credential) -> std::result::Result<Vec<String>, StoreError> {
        self.inner.storages(credential).await
    }
}
