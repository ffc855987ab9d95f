//! Node configuration.

use std::fmt;
use std::time::Duration;

use corelib::FINGER_COUNT;

/// Identity a node presents to its local store when acting for a peer.
///
/// Distinct from end-client credentials; the store decides what to accept.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub principal: String,
    secret: String,
}

impl Credential {
    pub fn new(principal: impl Into<String>, secret: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            secret: secret.into(),
        }
    }

    pub fn secret(&self) -> &str {
        &self.secret
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("principal", &self.principal)
            .field("secret", &"<redacted>")
            .finish()
    }
}

/// Tunables for a [`crate::LocalDhtNode`].
#[derive(Debug, Clone)]
pub struct DhtConfig {
    /// Sleep between checks while client operations wait out JOINING.
    pub join_poll_interval: Duration,
    /// Give up waiting for JOINING to end after this long. `None` waits forever.
    pub join_wait_timeout: Option<Duration>,
    /// Maximum wait for an exclusive per-record lock.
    pub lock_timeout: Duration,
    /// Hop limit for iterative routing.
    pub max_hops: usize,
    pub stabilize_interval: Duration,
    pub fix_fingers_interval: Duration,
    pub fix_predecessor_interval: Duration,
    /// Identity used for every store access made on a peer's behalf.
    pub replication_credential: Credential,
    /// Storages whose records never move between nodes.
    pub excluded_storages: Vec<String>,
}

impl Default for DhtConfig {
    fn default() -> Self {
        Self {
            join_poll_interval: Duration::from_millis(100),
            join_wait_timeout: Some(Duration::from_secs(60)),
            lock_timeout: Duration::from_millis(500),
            max_hops: 2 * FINGER_COUNT,
            stabilize_interval: Duration::from_secs(1),
            fix_fingers_interval: Duration::from_millis(200),
            fix_predecessor_interval: Duration::from_secs(1),
            replication_credential: Credential::new("replicator", ""),
            excluded_storages: Vec::new(),
        }
    }
}

impl DhtConfig {
    /// Short periods for fast test execution.
    pub fn test_config() -> Self {
        Self {
            join_poll_interval: Duration::from_millis(10),
            join_wait_timeout: Some(Duration::from_secs(10)),
            lock_timeout: Duration::from_secs(2),
            stabilize_interval: Duration::from_millis(20),
            fix_fingers_interval: Duration::from_millis(5),
            fix_predecessor_interval: Duration::from_millis(20),
            ..Self::default()
        }
    }

    pub fn with_replication_credential(mut self, credential: Credential) -> Self {
        self.replication_credential = credential;
        self
    }

    pub fn with_excluded_storage(mut self, storage: impl Into<String>) -> Self {
        self.excluded_storages.push(storage.into());
        self
    }

    pub fn with_join_wait(mut self, poll_interval: Duration, timeout: Option<Duration>) -> Self {
        self.join_poll_interval = poll_interval;
        self.join_wait_timeout = timeout;
        self
    }

    pub fn with_lock_timeout(mut self, timeout: Duration) -> Self {
        self.lock_timeout = timeout;
        self
    }

    pub fn is_excluded(&self, storage: &str) -> bool {
        self.excluded_storages
            .iter()
            .any(|s| s.eq_ignore_ascii_case(storage))
    }
}
