//! Periodic driver for the three stabilization actions.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::node::LocalDhtNode;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Action {
    Stabilize,
    FixFingers,
    FixPredecessor,
}

/// Runs `stabilize`, `fix_fingers` and `fix_predecessor` on their configured
/// periods until shut down. A failed tick is logged; the next tick retries.
pub struct Maintenance {
    shutdown: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl Maintenance {
    pub fn spawn(node: Arc<LocalDhtNode>) -> Self {
        let (shutdown, shutdown_rx) = watch::channel(false);
        let config = node.config();
        let schedule = [
            (Action::Stabilize, config.stabilize_interval),
            (Action::FixFingers, config.fix_fingers_interval),
            (Action::FixPredecessor, config.fix_predecessor_interval),
        ];

        let tasks = schedule
            .into_iter()
            .map(|(action, period)| {
                tokio::spawn(run(Arc::clone(&node), action, period, shutdown_rx.clone()))
            })
            .collect();

        info!(node = %node.id(), "maintenance started");
        Self { shutdown, tasks }
    }

    /// Stops every loop and waits for in-flight ticks to finish.
    pub async fn shutdown(mut self) {
        let _ = self.shutdown.send(true);
        for task in std::mem::take(&mut self.tasks) {
            let _ = task.await;
        }
    }
}

impl Drop for Maintenance {
    fn drop(&mut self) {
        let _ = self.shutdown.send(true);
    }
}

async fn run(node: Arc<LocalDhtNode>, action: Action, period: Duration, mut shutdown: watch::Receiver<bool>) {
    let mut ticker = interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let result = match action {
                    Action::Stabilize => node.stabilize().await,
                    Action::FixFingers => node.fix_fingers().await,
                    Action::FixPredecessor => {
                        node.fix_predecessor();
                        Ok(())
                    }
                };
                if let Err(err) = result {
                    warn!(node = %node.id(), ?action, error = %err, "maintenance tick failed");
                }
            }
            _ = shutdown.changed() => break,
        }
    }
    debug!(node = %node.id(), ?action, "maintenance loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use corelib::{NodeState, Token};

    use crate::config::DhtConfig;
    use crate::directory::InMemoryDirectory;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn test_maintenance_converges_two_nodes() {
        let directory = Arc::new(InMemoryDirectory::new());
        let make = |id: u64| {
            let node = LocalDhtNode::new(
                Token::wrapping(id),
                directory.clone(),
                Arc::new(MemoryStore::new()),
                DhtConfig::test_config(),
            );
            directory.register(node.clone());
            node
        };
        let a = make(10);
        let b = make(20);
        a.create();
        b.join(a.id()).await.unwrap();

        let ma = Maintenance::spawn(a.clone());
        let mb = Maintenance::spawn(b.clone());

        tokio::time::timeout(Duration::from_secs(5), async {
            while a.successor() != Some(b.id()) || b.state() != NodeState::Stable {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap();

        ma.shutdown().await;
        mb.shutdown().await;
        assert_eq!(b.successor(), Some(a.id()));
        assert_eq!(a.predecessor(), Some(b.id()));
        assert_eq!(b.predecessor(), Some(a.id()));
    }
}
