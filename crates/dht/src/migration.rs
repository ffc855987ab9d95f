//! Moving records to a node that joined in front of us.
//!
//! A joining node asks its successor for migration once it accepts its first
//! predecessor. The successor scans every local record in the background,
//! hands each one it no longer owns to the new owner under the record's lock,
//! and finally reports completion. If the successor is itself still merging,
//! the report waits in a queue until it becomes STABLE; reports leave through
//! an outbound channel so no state transition ever blocks on a remote call.

use std::sync::Arc;

use corelib::{NodeId, NodeState, RecordKey};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::directory::NodeLookup;
use crate::error::Result;
use crate::node::LocalDhtNode;

impl LocalDhtNode {
    /// Starts a background scan moving records owned by `requester` to it.
    pub fn request_migration(&self, requester: NodeId) -> Result<()> {
        let node = self.upgrade()?;
        info!(node = %self.id, %requester, "data migration started");

        tokio::spawn(async move {
            match node.migrate_records().await {
                Ok(moved) => {
                    info!(node = %node.id, %requester, moved, "data migration finished");
                    node.signal_migration_end(requester);
                }
                Err(err) => {
                    error!(node = %node.id, %requester, error = %err, "data migration failed");
                }
            }
        });
        Ok(())
    }

    /// Asks `source` for our records without blocking the caller.
    pub(crate) fn spawn_migration_request(&self, source: NodeId) {
        let directory = Arc::clone(&self.directory);
        let requester = self.id;

        tokio::spawn(async move {
            let Some(peer) = directory.find_by_id(source) else {
                error!(node = %requester, %source, "migration source unreachable");
                return;
            };
            match peer.request_migration(requester).await {
                Ok(()) => debug!(node = %requester, %source, "migration requested"),
                Err(err) => {
                    error!(node = %requester, %source, error = %err, "migration request failed")
                }
            }
        });
    }

    /// One full pass over every migratable storage. Returns how many records
    /// moved. The first failed transfer ends the pass.
    async fn migrate_records(&self) -> Result<usize> {
        let credential = &self.config.replication_credential;
        let mut moved = 0;

        for storage in self.store.storages(credential).await? {
            if self.config.is_excluded(&storage) {
                debug!(node = %self.id, storage, "storage excluded from migration");
                continue;
            }

            for key in self.store.keys(credential, &storage).await? {
                let owner = self.find_successor(key).await?;
                if owner == self.id {
                    continue;
                }
                if self.transfer_record(&storage, key, owner).await? {
                    moved += 1;
                }
            }
        }
        Ok(moved)
    }

    /// Copies one record to `owner` and deletes the local copy, holding the
    /// record lock throughout. `Ok(false)` if the record vanished meanwhile.
    async fn transfer_record(&self, storage: &str, key: RecordKey, owner: NodeId) -> Result<bool> {
        let credential = &self.config.replication_credential;
        let _guard = self.locks.acquire(storage, key, self.config.lock_timeout).await?;

        let Some(record) = self.store.read(credential, storage, key).await? else {
            return Ok(false);
        };

        let target = self.resolve(owner)?;
        target
            .create_record(storage, key, record.content.clone(), record.version)
            .await?;
        self.store.delete(credential, storage, key, record.version).await?;

        metrics::counter!("dht_migration_records_moved_total").increment(1);
        debug!(node = %self.id, %key, storage, %owner, version = record.version, "record moved");
        Ok(true)
    }

    /// Reports a finished migration, deferring it while we are not STABLE.
    fn signal_migration_end(&self, requester: NodeId) {
        if self.state.load() == NodeState::Stable {
            self.send_migration_end(requester);
            return;
        }

        debug!(node = %self.id, %requester, "deferring migration completion until stable");
        self.pending_notifications.push(requester);
        // The transition may have drained the queue just before our push.
        if self.state.load() == NodeState::Stable {
            self.drain_pending_notifications();
        }
    }

    pub(crate) fn drain_pending_notifications(&self) {
        while let Some(requester) = self.pending_notifications.pop() {
            self.send_migration_end(requester);
        }
    }

    fn send_migration_end(&self, requester: NodeId) {
        if self.outbound.send(requester).is_err() {
            warn!(node = %self.id, %requester, "notification sender stopped, completion dropped");
        }
    }
}

/// Delivers migration-end notifications for `source` until every sender is gone.
pub(crate) async fn forward_migration_ends(
    source: NodeId,
    directory: Arc<dyn NodeLookup>,
    mut outbound: mpsc::UnboundedReceiver<NodeId>,
) {
    while let Some(requester) = outbound.recv().await {
        let Some(peer) = directory.find_by_id(requester) else {
            warn!(node = %source, %requester, "requester unreachable, completion not delivered");
            continue;
        };
        match peer.notify_migration_end(source).await {
            Ok(()) => debug!(node = %source, %requester, "migration completion delivered"),
            Err(err) => {
                warn!(node = %source, %requester, error = %err, "migration completion failed")
            }
        }
    }
}
