//! Node-lookup directory: resolves a node id to a reachable handle.
//!
//! A miss is an expected outcome (the peer left or is not known yet), never
//! an error by itself.

use std::sync::Arc;

use corelib::NodeId;
use dashmap::DashMap;
use tracing::debug;

use crate::handle::DhtNode;

pub trait NodeLookup: Send + Sync + 'static {
    fn find_by_id(&self, id: NodeId) -> Option<Arc<dyn DhtNode>>;
}

/// Directory for peers living in one process.
#[derive(Default)]
pub struct InMemoryDirectory {
    nodes: DashMap<NodeId, Arc<dyn DhtNode>>,
}

impl InMemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes `node` resolvable under its own id, replacing any previous handle.
    pub fn register(&self, node: Arc<dyn DhtNode>) {
        let id = node.node_id();
        debug!(node = %id, "registered in directory");
        self.nodes.insert(id, node);
    }

    /// Makes `id` unresolvable, as if the peer left the cluster.
    pub fn remove(&self, id: NodeId) -> bool {
        let removed = self.nodes.remove(&id).is_some();
        if removed {
            debug!(node = %id, "removed from directory");
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Registered ids in ring order.
    pub fn ids(&self) -> Vec<NodeId> {
        let mut ids: Vec<NodeId> = self.nodes.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }
}

impl NodeLookup for InMemoryDirectory {
    fn find_by_id(&self, id: NodeId) -> Option<Arc<dyn DhtNode>> {
        self.nodes.get(&id).map(|entry| Arc::clone(entry.value()))
    }
}
