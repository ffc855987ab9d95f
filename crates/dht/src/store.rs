//! Local record storage consumed by a node.
//!
//! The ring never looks inside a record: it routes on the key and carries
//! the payload and version across when ownership changes.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use bytes::Bytes;
use corelib::RecordKey;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::Credential;
use crate::error::StoreError;

/// A stored record: opaque payload plus optimistic version.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub key: RecordKey,
    pub content: Bytes,
    pub version: u64,
}

/// Keyed CRUD with optimistic versions, partitioned into named storages.
///
/// Every call carries the credential of the party opening the store.
#[async_trait]
pub trait RecordStore: Send + Sync + 'static {
    /// Stores a new record with the given version.
    async fn create(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        content: Bytes,
        version: u64,
    ) -> Result<u64, StoreError>;

    async fn read(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
    ) -> Result<Option<Record>, StoreError>;

    /// Replaces the payload if `version` matches; returns the new version.
    async fn update(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        content: Bytes,
        version: u64,
    ) -> Result<u64, StoreError>;

    /// Removes the record if `version` matches. `Ok(false)` when absent.
    async fn delete(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        version: u64,
    ) -> Result<bool, StoreError>;

    /// Keys currently held in `storage`.
    async fn keys(&self, credential: &Credential, storage: &str) -> Result<Vec<RecordKey>, StoreError>;

    /// Names of every storage holding data.
    async fn storages(&self, credential: &Credential) -> Result<Vec<String>, StoreError>;
}

type Storage = BTreeMap<RecordKey, Record>;

/// In-memory store backed by a `RwLock<HashMap>` of ordered storages.
///
/// Useful for tests and simulations. With [`MemoryStore::with_credential`]
/// only the given identity may open it.
#[derive(Default)]
pub struct MemoryStore {
    storages: RwLock<HashMap<String, Storage>>,
    required: Option<Credential>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that rejects every credential except `credential`.
    pub fn with_credential(credential: Credential) -> Self {
        Self {
            storages: RwLock::new(HashMap::new()),
            required: Some(credential),
        }
    }

    /// Number of records in `storage`.
    pub fn len(&self, storage: &str) -> usize {
        self.storages.read().get(storage).map_or(0, BTreeMap::len)
    }

    pub fn is_empty(&self) -> bool {
        self.storages.read().values().all(BTreeMap::is_empty)
    }

    fn authorize(&self, credential: &Credential) -> Result<(), StoreError> {
        match &self.required {
            Some(required) if required != credential => {
                Err(StoreError::Unauthorized(credential.principal.clone()))
            }
            _ => Ok(()),
        }
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn create(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        content: Bytes,
        version: u64,
    ) -> Result<u64, StoreError> {
        self.authorize(credential)?;
        let mut storages = self.storages.write();
        let records = storages.entry(storage.to_string()).or_default();
        if records.contains_key(&key) {
            return Err(StoreError::AlreadyExists {
                storage: storage.to_string(),
                key,
            });
        }
        debug!(%key, storage, version, size = content.len(), "creating record");
        records.insert(key, Record { key, content, version });
        Ok(version)
    }

    async fn read(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
    ) -> Result<Option<Record>, StoreError> {
        self.authorize(credential)?;
        let storages = self.storages.read();
        Ok(storages.get(storage).and_then(|records| records.get(&key)).cloned())
    }

    async fn update(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        content: Bytes,
        version: u64,
    ) -> Result<u64, StoreError> {
        self.authorize(credential)?;
        let mut storages = self.storages.write();
        let record = storages
            .get_mut(storage)
            .and_then(|records| records.get_mut(&key))
            .ok_or_else(|| StoreError::NotFound {
                storage: storage.to_string(),
                key,
            })?;
        if record.version != version {
            return Err(StoreError::VersionConflict {
                key,
                expected: version,
                actual: record.version,
            });
        }
        record.content = content;
        record.version += 1;
        debug!(%key, storage, version = record.version, "updated record");
        Ok(record.version)
    }

    async fn delete(
        &self,
        credential: &Credential,
        storage: &str,
        key: RecordKey,
        version: u64,
    ) -> Result<bool, StoreError> {
        self.authorize(credential)?;
        let mut storages = self.storages.write();
        let Some(records) = storages.get_mut(storage) else {
            return Ok(false);
        };
        match records.get(&key) {
            None => Ok(false),
            Some(record) if record.version != version => Err(StoreError::VersionConflict {
                key,
                expected: version,
                actual: record.version,
            }),
            Some(_) => {
                records.remove(&key);
                debug!(%key, storage, "deleted record");
                Ok(true)
            }
        }
    }

    async fn keys(&self, credential: &Credential, storage: &str) -> Result<Vec<RecordKey>, StoreError> {
        self.authorize(credential)?;
        let storages = self.storages.read();
        Ok(storages
            .get(storage)
            .map(|records| records.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn storages(&self, credential: &Credential) -> Result<Vec<String>, StoreError> {
        self.authorize(credential)?;
        let mut names: Vec<String> = self.storages.read().keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}
