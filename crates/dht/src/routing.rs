//! Key-to-owner resolution over finger tables.
//!
//! Lookups are iterative: the origin asks one peer at a time for its
//! successor and its closest preceding finger, counting hops. With accurate
//! fingers a lookup takes O(log N) hops; stale fingers degrade it toward a
//! linear walk, and [`DhtConfig::max_hops`](crate::DhtConfig) bounds it.

use corelib::ring::{inside_half_open, inside_open};
use corelib::{NodeId, RecordKey};
use tracing::{debug, warn};

use crate::error::{DhtError, Result};
use crate::node::LocalDhtNode;

impl LocalDhtNode {
    /// Resolves the node owning `key`: the first node at or clockwise after it.
    pub async fn find_successor(&self, key: RecordKey) -> Result<NodeId> {
        let successor = self.fingers.successor().ok_or(DhtError::NoSuccessor(self.id))?;
        if inside_half_open(self.id, successor, key) {
            return Ok(successor);
        }

        let mut current = self.closest_preceding_finger(key);
        if current == self.id {
            return Ok(successor);
        }

        let mut hops = 0;
        loop {
            hops += 1;
            if hops > self.config.max_hops {
                metrics::counter!("dht_routing_hop_limit_exceeded_total").increment(1);
                warn!(node = %self.id, %key, hops = self.config.max_hops, "lookup exceeded hop limit");
                return Err(DhtError::HopLimitExceeded {
                    key,
                    hops: self.config.max_hops,
                });
            }

            let peer = self.resolve(current)?;
            let peer_successor = peer
                .successor()
                .await?
                .ok_or(DhtError::NoSuccessor(current))?;
            if inside_half_open(current, peer_successor, key) {
                debug!(node = %self.id, %key, owner = %peer_successor, hops, "lookup resolved");
                return Ok(peer_successor);
            }

            let next = peer.closest_preceding_finger(key).await?;
            // A peer with nothing better to offer hands us its successor.
            current = if next == current { peer_successor } else { next };
        }
    }

    /// Highest finger strictly inside `(self, key)`, or `self` if none.
    ///
    /// Fingers the directory cannot resolve are skipped but left in place;
    /// `fix_fingers` owns their repair.
    pub fn closest_preceding_finger(&self, key: RecordKey) -> NodeId {
        for (slot, finger) in self.fingers.iter_descending() {
            if !inside_open(self.id, key, finger) {
                continue;
            }
            if self.directory.find_by_id(finger).is_none() {
                debug!(node = %self.id, slot, %finger, "finger unreachable, skipping");
                continue;
            }
            return finger;
        }
        self.id
    }
}
