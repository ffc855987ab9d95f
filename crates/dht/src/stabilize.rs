//! Periodic ring repair.
//!
//! Three independent actions, each invoked on its own period by an external
//! scheduler (or [`crate::Maintenance`]): `stabilize` fixes the successor and
//! tells it about us, `fix_fingers` refreshes one routing slot per call, and
//! `fix_predecessor` forgets a predecessor that left.

use std::sync::atomic::Ordering;

use corelib::ring::inside_open;
use corelib::{NodeId, FINGER_COUNT};
use tracing::{debug, info, warn};

use crate::error::{DhtError, Result};
use crate::node::LocalDhtNode;

impl LocalDhtNode {
    /// Adopts the successor's predecessor as our successor when it sits
    /// between us, then notifies the (possibly new) successor.
    pub async fn stabilize(&self) -> Result<()> {
        let mut successor_id = self.fingers.successor().ok_or(DhtError::NoSuccessor(self.id))?;

        let successor = loop {
            let successor = match self.resolve(successor_id) {
                Ok(peer) => peer,
                Err(_) => {
                    successor_id = self.replace_unreachable_successor(successor_id);
                    continue;
                }
            };

            match successor.predecessor().await? {
                Some(candidate) if inside_open(self.id, successor_id, candidate) => {
                    if self.fingers.compare_and_set(0, Some(successor_id), Some(candidate)) {
                        info!(node = %self.id, old = %successor_id, new = %candidate, "successor changed");
                        metrics::counter!("dht_successor_changes_total").increment(1);
                        self.spawn_ring_log();
                        successor_id = candidate;
                        break self.resolve(candidate)?;
                    }
                    debug!(node = %self.id, "successor change lost a race, retrying");
                    successor_id = self.fingers.successor().ok_or(DhtError::NoSuccessor(self.id))?;
                }
                _ => break successor,
            }
        };

        if successor_id != self.id {
            successor.notify(self.id).await?;
        }
        Ok(())
    }

    /// Recomputes the finger slot under the rotating cursor and advances it.
    /// Slot 0 belongs to `stabilize`, so the cursor wraps from 62 back to 1.
    pub async fn fix_fingers(&self) -> Result<()> {
        let slot = self.next_finger.load(Ordering::Acquire);
        let next = if slot + 1 >= FINGER_COUNT { 1 } else { slot + 1 };
        let _ = self
            .next_finger
            .compare_exchange(slot, next, Ordering::AcqRel, Ordering::Acquire);

        let owner = self.find_successor(self.id.finger_start(slot)).await?;
        let current = self.fingers.get(slot);
        if current != Some(owner) && self.fingers.compare_and_set(slot, current, Some(owner)) {
            debug!(node = %self.id, slot, finger = %owner, "finger updated");
        }
        Ok(())
    }

    /// Runs `fix_fingers` once per routing slot.
    pub async fn refresh_fingers(&self) -> Result<()> {
        for _ in 1..FINGER_COUNT {
            self.fix_fingers().await?;
        }
        Ok(())
    }

    /// Clears the predecessor if the directory can no longer resolve it.
    /// Never searches for a replacement; the next `notify` supplies one.
    pub fn fix_predecessor(&self) {
        loop {
            let Some(predecessor) = self.predecessor.load() else {
                return;
            };
            if self.directory.find_by_id(predecessor).is_some() {
                return;
            }
            if self.predecessor.compare_and_set(Some(predecessor), None) {
                info!(node = %self.id, %predecessor, "predecessor left the ring");
                return;
            }
        }
    }

    /// Swaps an unreachable successor for the nearest reachable finger, or
    /// ourselves when none is left. Returns the successor now in slot 0.
    fn replace_unreachable_successor(&self, dead: NodeId) -> NodeId {
        self.fingers.forget(dead);

        let replacement = (1..FINGER_COUNT)
            .filter_map(|slot| self.fingers.get(slot))
            .filter(|&finger| finger != self.id && self.directory.find_by_id(finger).is_some())
            .min_by_key(|&finger| self.id.distance_to(finger))
            .unwrap_or(self.id);

        if self.fingers.compare_and_set(0, Some(dead), Some(replacement)) {
            warn!(node = %self.id, %dead, %replacement, "successor unreachable, replaced");
        }
        self.fingers.successor().unwrap_or(replacement)
    }
}
