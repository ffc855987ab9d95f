//! Subcommands and their results.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use bytes::Bytes;
use clap::Subcommand;
use corelib::{NodeId, NodeState, Token};
use dht::{
    DhtConfig, DhtNode, InMemoryDirectory, LocalDhtNode, Maintenance, MemoryStore, NodeLookup,
    RecordStore,
};
use serde::Serialize;
use tracing::info;

const STORAGE: &str = "records";

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build a ring, store records, add a late joiner and report placement.
    Simulate {
        /// Nodes in the initial ring.
        #[arg(long, default_value_t = 5)]
        nodes: usize,
        /// Records written before the late join.
        #[arg(long, default_value_t = 100)]
        records: usize,
        /// Period of every maintenance loop, in milliseconds.
        #[arg(long, default_value_t = 20)]
        period_ms: u64,
        /// Give up if the ring has not converged after this many seconds.
        #[arg(long, default_value_t = 10)]
        settle_secs: u64,
    },
    /// Show which node of a freshly stabilized ring owns a key.
    Lookup {
        key: String,
        #[arg(long, default_value_t = 5)]
        nodes: usize,
    },
}

/// Output of a command, printable as text or JSON.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
pub enum CommandResult {
    Simulate(SimulationReport),
    Lookup(LookupReport),
}

#[derive(Debug, Clone, Serialize)]
pub struct NodeReport {
    pub id: NodeId,
    pub state: String,
    pub records: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct SimulationReport {
    /// Node ids in successor order, starting from the founder.
    pub ring: Vec<NodeId>,
    pub nodes: Vec<NodeReport>,
    pub joiner: NodeId,
    /// Records the late joiner took over.
    pub moved: usize,
    /// Records stored somewhere other than at their owner.
    pub misplaced: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct LookupReport {
    pub key: String,
    pub token: Token,
    pub owner: NodeId,
    pub ring: Vec<NodeId>,
}

impl Command {
    pub async fn execute(self) -> anyhow::Result<CommandResult> {
        match self {
            Command::Simulate {
                nodes,
                records,
                period_ms,
                settle_secs,
            } => {
                let period = Duration::from_millis(period_ms.max(1));
                let settle = Duration::from_secs(settle_secs);
                simulate(nodes, records, period, settle)
                    .await
                    .map(CommandResult::Simulate)
            }
            Command::Lookup { key, nodes } => lookup(&key, nodes).await.map(CommandResult::Lookup),
        }
    }
}

/// Nodes sharing one in-memory directory.
struct Cluster {
    directory: Arc<InMemoryDirectory>,
    members: Vec<(Arc<LocalDhtNode>, Arc<MemoryStore>)>,
    maintenance: Vec<Maintenance>,
    config: DhtConfig,
}

impl Cluster {
    fn new(config: DhtConfig) -> Self {
        Self {
            directory: Arc::new(InMemoryDirectory::new()),
            members: Vec::new(),
            maintenance: Vec::new(),
            config,
        }
    }

    fn spawn(&mut self, name: &str) -> anyhow::Result<Arc<LocalDhtNode>> {
        let id = Token::from_key(name);
        if self.directory.find_by_id(id).is_some() {
            bail!("node name {name} collides with an existing id {id}");
        }

        let store = Arc::new(MemoryStore::new());
        let node = LocalDhtNode::new(id, self.directory.clone(), store.clone(), self.config.clone());
        self.directory.register(node.clone());
        self.members.push((node.clone(), store));
        Ok(node)
    }

    /// Creates a ring from the first node and joins the rest through it.
    async fn build(&mut self, count: usize) -> anyhow::Result<Arc<LocalDhtNode>> {
        if count == 0 {
            bail!("a ring needs at least one node");
        }
        let founder = self.spawn("node-0")?;
        founder.create();

        for i in 1..count {
            let node = self.spawn(&format!("node-{i}"))?;
            node.join(founder.id())
                .await
                .with_context(|| format!("node {} failed to join", node.id()))?;
        }
        Ok(founder)
    }

    fn start_maintenance(&mut self) {
        let running = self.maintenance.len();
        for (node, _) in &self.members[running..] {
            self.maintenance.push(Maintenance::spawn(Arc::clone(node)));
        }
    }

    async fn stabilize_rounds(&self, rounds: usize) -> anyhow::Result<()> {
        for _ in 0..rounds {
            for (node, _) in &self.members {
                node.stabilize().await?;
                node.fix_predecessor();
            }
        }
        for (node, _) in &self.members {
            node.refresh_fingers().await?;
        }
        Ok(())
    }

    /// Every node STABLE with successor and predecessor in id order.
    fn is_settled(&self) -> bool {
        let mut ids: Vec<NodeId> = self.members.iter().map(|(node, _)| node.id()).collect();
        ids.sort();

        self.members.iter().all(|(node, _)| {
            let Ok(at) = ids.binary_search(&node.id()) else {
                return false;
            };
            let next = ids[(at + 1) % ids.len()];
            let prev = ids[(at + ids.len() - 1) % ids.len()];
            let prev = (ids.len() > 1).then_some(prev);

            node.state() == NodeState::Stable
                && node.successor() == Some(next)
                && node.predecessor() == prev
        })
    }

    async fn wait_settled(&self, timeout: Duration) -> anyhow::Result<()> {
        let poll = async {
            while !self.is_settled() {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        };
        tokio::time::timeout(timeout, poll)
            .await
            .with_context(|| format!("ring did not converge within {timeout:?}"))
    }

    async fn shutdown(&mut self) {
        for maintenance in self.maintenance.drain(..) {
            maintenance.shutdown().await;
        }
    }
}

async fn simulate(
    nodes: usize,
    records: usize,
    period: Duration,
    settle: Duration,
) -> anyhow::Result<SimulationReport> {
    let config = DhtConfig {
        stabilize_interval: period,
        fix_fingers_interval: period,
        fix_predecessor_interval: period,
        ..DhtConfig::default()
    };
    let mut cluster = Cluster::new(config.clone());
    let founder = cluster.build(nodes).await?;
    cluster.start_maintenance();
    cluster.wait_settled(settle).await?;
    info!(nodes, "ring converged");

    for i in 0..records {
        let key = Token::from_key(&format!("record-{i}"));
        let owner = founder.find_successor(key).await?;
        let handle = cluster
            .directory
            .find_by_id(owner)
            .with_context(|| format!("owner {owner} not in directory"))?;
        handle
            .create_record(STORAGE, key, Bytes::from(format!("value-{i}")), 0)
            .await?;
    }
    info!(records, "records written");

    let joiner = cluster.spawn(&format!("node-{nodes}"))?;
    joiner.join(founder.id()).await?;
    cluster.start_maintenance();
    cluster.wait_settled(settle).await?;
    info!(joiner = %joiner.id(), "late joiner merged");

    let mut report = SimulationReport {
        ring: founder.ring_members().await?,
        nodes: Vec::new(),
        joiner: joiner.id(),
        moved: 0,
        misplaced: 0,
    };
    for (node, store) in &cluster.members {
        let keys = store.keys(&config.replication_credential, STORAGE).await?;
        for key in &keys {
            if founder.find_successor(*key).await? != node.id() {
                report.misplaced += 1;
            }
        }
        if node.id() == joiner.id() {
            report.moved = keys.len();
        }
        report.nodes.push(NodeReport {
            id: node.id(),
            state: node.state().to_string(),
            records: keys.len(),
        });
    }
    report.nodes.sort_by_key(|n| n.id);

    cluster.shutdown().await;
    Ok(report)
}

async fn lookup(key: &str, nodes: usize) -> anyhow::Result<LookupReport> {
    let mut cluster = Cluster::new(DhtConfig::default());
    let founder = cluster.build(nodes).await?;
    cluster.stabilize_rounds(nodes + 1).await?;

    let token = Token::from_key(key);
    let owner = founder.find_successor(token).await?;
    for (node, _) in &cluster.members {
        let seen = node.find_successor(token).await?;
        if seen != owner {
            bail!("node {} resolves {key} to {seen}, founder to {owner}", node.id());
        }
    }

    Ok(LookupReport {
        key: key.to_string(),
        token,
        owner,
        ring: founder.ring_members().await?,
    })
}

impl fmt::Display for CommandResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CommandResult::Simulate(report) => {
                writeln!(f, "ring: {}", join_ids(&report.ring))?;
                for node in &report.nodes {
                    let marker = if node.id == report.joiner { " (joined late)" } else { "" };
                    writeln!(f, "  {:>20} {:<8} {:>6} records{marker}", node.id, node.state, node.records)?;
                }
                writeln!(f, "moved to joiner: {}", report.moved)?;
                writeln!(f, "misplaced: {}", report.misplaced)
            }
            CommandResult::Lookup(report) => {
                writeln!(f, "key {:?} -> token {}", report.key, report.token)?;
                writeln!(f, "owner: {}", report.owner)?;
                writeln!(f, "ring: {}", join_ids(&report.ring))
            }
        }
    }
}

fn join_ids(ids: &[NodeId]) -> String {
    ids.iter().map(ToString::to_string).collect::<Vec<_>>().join(" -> ")
}
