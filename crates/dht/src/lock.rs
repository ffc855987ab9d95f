//! Exclusive per-record locks.
//!
//! Every read-modify-write of a record, whether a client operation or a
//! migration transfer, holds the record's lock for its whole duration. The
//! guard releases on drop, so error paths cannot leak a lock.

use std::sync::Arc;
use std::time::Duration;

use corelib::RecordKey;
use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::trace;

use crate::error::{DhtError, Result};

type LockId = (String, RecordKey);

/// Lock table keyed by `(storage, key)`. Entries exist only while someone
/// holds or waits for the lock.
#[derive(Default)]
pub struct KeyLockManager {
    locks: DashMap<LockId, Arc<Mutex<()>>>,
}

impl KeyLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits up to `timeout` for exclusive access to one record.
    pub async fn acquire(&self, storage: &str, key: RecordKey, timeout: Duration) -> Result<KeyGuard<'_>> {
        let id = (storage.to_string(), key);
        let lock = self.locks.entry(id.clone()).or_default().clone();

        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => {
                trace!(%key, storage, "record lock acquired");
                Ok(KeyGuard {
                    manager: self,
                    id,
                    guard: Some(guard),
                })
            }
            Err(_) => {
                self.release_entry(&id);
                Err(DhtError::LockTimeout { key, timeout })
            }
        }
    }

    /// Number of records with a held or awaited lock.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }

    fn release_entry(&self, id: &LockId) {
        self.locks.remove_if(id, |_, lock| Arc::strong_count(lock) == 1);
    }
}

/// Held record lock. Dropping it releases the lock.
pub struct KeyGuard<'a> {
    manager: &'a KeyLockManager,
    id: LockId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        self.manager.release_entry(&self.id);
        trace!(key = %self.id.1, storage = %self.id.0, "record lock released");
    }
}
