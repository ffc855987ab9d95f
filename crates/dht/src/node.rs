//! A ring participant living in this process.
//!
//! The node owns the keys in `(predecessor, self]`. Its pointers are updated
//! lock-free by compare-and-set; the lifecycle moves JOINING -> MERGING ->
//! STABLE as described on [`NodeState`]. Routing, stabilization, migration
//! and the record façade live in sibling modules as further `impl` blocks.

use std::collections::HashSet;
use std::sync::atomic::AtomicUsize;
use std::sync::{Arc, Weak};

use async_trait::async_trait;
use bytes::Bytes;
use corelib::ring::inside_open;
use corelib::{AtomicNodeId, FingerTable, NodeId, NodeState, RecordKey, RingState};
use crossbeam::queue::SegQueue;
use tokio::sync::mpsc;
use tracing::{debug, info, instrument, warn, Level};

use crate::config::DhtConfig;
use crate::directory::NodeLookup;
use crate::error::{DhtError, Result};
use crate::handle::DhtNode;
use crate::lock::KeyLockManager;
use crate::migration;
use crate::store::{Record, RecordStore};

pub struct LocalDhtNode {
    pub(crate) id: NodeId,
    pub(crate) me: Weak<LocalDhtNode>,
    pub(crate) fingers: FingerTable,
    pub(crate) predecessor: AtomicNodeId,
    pub(crate) state: RingState,
    /// Successor at the moment MERGING began; records not yet moved live there.
    pub(crate) migration_source: AtomicNodeId,
    /// Next finger slot for `fix_fingers`, in `1..FINGER_COUNT`.
    pub(crate) next_finger: AtomicUsize,
    pub(crate) directory: Arc<dyn NodeLookup>,
    pub(crate) store: Arc<dyn RecordStore>,
    pub(crate) locks: KeyLockManager,
    /// Requesters whose migration finished while this node was not STABLE.
    pub(crate) pending_notifications: SegQueue<NodeId>,
    /// Outbound migration-end notifications, sent by a dedicated task.
    pub(crate) outbound: mpsc::UnboundedSender<NodeId>,
    pub(crate) config: DhtConfig,
}

impl LocalDhtNode {
    /// Creates a node in JOINING state. Call [`create`](Self::create) or
    /// [`join`](Self::join) next.
    ///
    /// # Panics
    ///
    /// Must be called from within a tokio runtime: it spawns the task that
    /// delivers migration-end notifications.
    pub fn new(
        id: NodeId,
        directory: Arc<dyn NodeLookup>,
        store: Arc<dyn RecordStore>,
        config: DhtConfig,
    ) -> Arc<Self> {
        let (outbound, outbound_rx) = mpsc::unbounded_channel();
        tokio::spawn(migration::forward_migration_ends(
            id,
            Arc::clone(&directory),
            outbound_rx,
        ));

        Arc::new_cyclic(|me| Self {
            id,
            me: me.clone(),
            fingers: FingerTable::new(),
            predecessor: AtomicNodeId::unknown(),
            state: RingState::new(NodeState::Joining),
            migration_source: AtomicNodeId::unknown(),
            next_finger: AtomicUsize::new(1),
            directory,
            store,
            locks: KeyLockManager::new(),
            pending_notifications: SegQueue::new(),
            outbound,
            config,
        })
    }

    pub fn id(&self) -> NodeId {
        self.id
    }

    pub fn state(&self) -> NodeState {
        self.state.load()
    }

    pub fn successor(&self) -> Option<NodeId> {
        self.fingers.successor()
    }

    pub fn predecessor(&self) -> Option<NodeId> {
        self.predecessor.load()
    }

    /// Node this one pulls records from while MERGING.
    pub fn migration_source(&self) -> Option<NodeId> {
        self.migration_source.load()
    }

    pub fn fingers(&self) -> Vec<Option<NodeId>> {
        self.fingers.snapshot()
    }

    pub fn config(&self) -> &DhtConfig {
        &self.config
    }

    /// Founds a new ring with this node as its only member.
    pub fn create(&self) {
        info!(node = %self.id, "new ring creation started");

        self.predecessor.store(None);
        self.fingers.set(0, Some(self.id));
        self.migration_source.store(None);
        self.state.reset(NodeState::Stable);

        info!(node = %self.id, "new ring created");
    }

    /// Joins the ring `known` belongs to.
    ///
    /// Always restarts from a clean JOINING state, so a failed attempt may
    /// simply be retried. The node stays JOINING until some peer notifies it
    /// as successor during stabilization.
    #[instrument(skip(self), fields(node = %self.id))]
    pub async fn join(&self, known: NodeId) -> Result<()> {
        info!(%known, "join started");

        let peer = self.resolve(known)?;

        self.state.reset(NodeState::Joining);
        self.predecessor.store(None);
        self.migration_source.store(None);

        let successor_id = peer.find_successor(self.id).await?;
        self.fingers.set(0, Some(successor_id));
        info!(successor = %successor_id, "successor found");

        let successor = self.resolve(successor_id)?;
        successor.notify(self.id).await?;

        info!("join finished");
        Ok(())
    }

    /// Accepts `candidate` as predecessor if it is closer than the current one.
    ///
    /// The first acceptance while JOINING starts the merge: the current
    /// successor becomes the migration source and is asked for our records.
    pub fn notify(&self, candidate: NodeId) {
        if candidate == self.id {
            return;
        }

        loop {
            let current = self.predecessor.load();
            let closer = match current {
                None => true,
                Some(predecessor) => inside_open(predecessor, self.id, candidate),
            };
            if !closer {
                return;
            }

            if self.predecessor.compare_and_set(current, Some(candidate)) {
                info!(node = %self.id, predecessor = %candidate, "new predecessor accepted");
                self.begin_merge();
                self.spawn_ring_log();
                return;
            }
            debug!(node = %self.id, "predecessor update lost a race, retrying");
        }
    }

    /// Completes the merge if `source` is the node we are migrating from.
    /// Repeated or foreign notifications are ignored.
    pub fn notify_migration_end(&self, source: NodeId) {
        info!(node = %self.id, %source, "migration completion received");

        if self.migration_source.load() != Some(source) {
            debug!(node = %self.id, %source, "not our migration source, ignoring");
            return;
        }

        if self.state.transition(NodeState::Merging, NodeState::Stable) {
            info!(node = %self.id, state = %NodeState::Stable, "state changed");
            self.drain_pending_notifications();
        }
    }

    fn begin_merge(&self) {
        if self.state.load() != NodeState::Joining {
            return;
        }
        let Some(source) = self.fingers.successor() else {
            warn!(node = %self.id, "predecessor accepted before a successor is known");
            return;
        };

        self.migration_source.store(Some(source));
        if !self.state.transition(NodeState::Joining, NodeState::Merging) {
            return;
        }
        info!(node = %self.id, state = %NodeState::Merging, %source, "state changed");

        if source == self.id {
            // Nobody to pull from.
            if self.state.transition(NodeState::Merging, NodeState::Stable) {
                self.drain_pending_notifications();
            }
            return;
        }
        self.spawn_migration_request(source);
    }

    /// Handle for `id`, short-circuiting to ourselves.
    pub(crate) fn resolve(&self, id: NodeId) -> Result<Arc<dyn DhtNode>> {
        if id == self.id {
            if let Some(me) = self.me.upgrade() {
                return Ok(me);
            }
        }
        self.directory
            .find_by_id(id)
            .ok_or(DhtError::NodeUnreachable(id))
    }

    pub(crate) fn upgrade(&self) -> Result<Arc<LocalDhtNode>> {
        self.me.upgrade().ok_or(DhtError::ShutDown(self.id))
    }

    /// The ring as seen from here: this node followed by every successor
    /// until the walk comes back to a node already visited.
    pub async fn ring_members(&self) -> Result<Vec<NodeId>> {
        let mut members = vec![self.id];
        let mut seen = HashSet::from([self.id]);
        let mut next = self.fingers.successor().ok_or(DhtError::NoSuccessor(self.id))?;

        while seen.insert(next) {
            members.push(next);
            let peer = self.resolve(next)?;
            next = peer.successor().await?.ok_or(DhtError::NoSuccessor(next))?;
        }
        Ok(members)
    }

    /// Logs the ring in the background when debug logging is on.
    pub(crate) fn spawn_ring_log(&self) {
        if !tracing::enabled!(Level::DEBUG) {
            return;
        }
        let Some(me) = self.me.upgrade() else {
            return;
        };
        tokio::spawn(async move {
            match me.ring_members().await {
                Ok(members) => {
                    let ring: Vec<String> = members.iter().map(ToString::to_string).collect();
                    debug!(node = %me.id, ring = %ring.join("-"), "ring");
                }
                Err(err) => debug!(node = %me.id, error = %err, "ring walk interrupted"),
            }
        });
    }
}

impl std::fmt::Debug for LocalDhtNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LocalDhtNode")
            .field("id", &self.id)
            .field("state", &self.state.load())
            .field("predecessor", &self.predecessor.load())
            .field("successor", &self.fingers.successor())
            .finish()
    }
}

#[async_trait]
impl DhtNode for LocalDhtNode {
    fn node_id(&self) -> NodeId {
        self.id
    }

    async fn find_successor(&self, key: RecordKey) -> Result<NodeId> {
        LocalDhtNode::find_successor(self, key).await
    }

    async fn closest_preceding_finger(&self, key: RecordKey) -> Result<NodeId> {
        Ok(LocalDhtNode::closest_preceding_finger(self, key))
    }

    async fn successor(&self) -> Result<Option<NodeId>> {
        Ok(LocalDhtNode::successor(self))
    }

    async fn predecessor(&self) -> Result<Option<NodeId>> {
        Ok(LocalDhtNode::predecessor(self))
    }

    async fn notify(&self, candidate: NodeId) -> Result<()> {
        LocalDhtNode::notify(self, candidate);
        Ok(())
    }

    async fn notify_migration_end(&self, source: NodeId) -> Result<()> {
        LocalDhtNode::notify_migration_end(self, source);
        Ok(())
    }

    async fn request_migration(&self, requester: NodeId) -> Result<()> {
        LocalDhtNode::request_migration(self, requester)
    }

    async fn create_record(&self, storage: &str, key: RecordKey, content: Bytes, version: u64) -> Result<u64> {
        LocalDhtNode::create_record(self, storage, key, content, version).await
    }

    async fn read_record(&self, storage: &str, key: RecordKey) -> Result<Option<Record>> {
        LocalDhtNode::read_record(self, storage, key).await
    }

    async fn update_record(&self, storage: &str, key: RecordKey, content: Bytes, version: u64) -> Result<u64> {
        LocalDhtNode::update_record(self, storage, key, content, version).await
    }

    async fn delete_record(&self, storage: &str, key: RecordKey, version: u64) -> Result<bool> {
        LocalDhtNode::delete_record(self, storage, key, version).await
    }
}
