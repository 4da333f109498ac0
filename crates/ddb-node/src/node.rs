use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{ensure, Context, Result};
use ddb_cluster::{
    BullyElection, ClusterEvent, ElectionConfig, HealthTracker, HeartbeatConfig, HeartbeatMonitor,
    LoadBalancer, MonitorTasks, Strategy,
};
use ddb_config::ClusterConfig;
use ddb_exec::{QueryExecutor, ReplicationManager};
use ddb_net::{Bound, Inbound, NetClient, Peer, Server};
use ddb_proto::{
    generate_transaction_id, Message, NodeId, NodeStatusReport, Payload,
};
use ddb_txn::{CommitCoordinator, CommitParticipant, LockManager, TransactionRegistry};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

// ---------------------------------------------------------------------------
// NodeSettings
// ---------------------------------------------------------------------------

/// Tunable timings and strategy for one node. Defaults match the
/// production protocol; tests shrink them.
#[derive(Debug, Clone)]
pub struct NodeSettings {
    pub heartbeat: HeartbeatConfig,
    pub election: ElectionConfig,
    /// Transport client timeout (connect / write / read, each).
    pub net_timeout: Duration,
    /// How long a participant waits for the write lock before voting NO.
    pub lock_wait: Duration,
    pub strategy: Strategy,
}

impl Default for NodeSettings {
    fn default() -> Self {
        Self {
            heartbeat: HeartbeatConfig::default(),
            election: ElectionConfig::default(),
            net_timeout: Duration::from_secs(5),
            lock_wait: ddb_txn::DEFAULT_LOCK_TIMEOUT,
            strategy: Strategy::RoundRobin,
        }
    }
}

impl NodeSettings {
    pub fn from_cluster(cfg: &ClusterConfig) -> Self {
        Self {
            heartbeat: HeartbeatConfig {
                interval: Duration::from_secs(cfg.heartbeat_interval),
                timeout: Duration::from_secs(cfg.heartbeat_timeout),
            },
            ..Default::default()
        }
    }
}

/// Transport peers for every configured node.
pub fn cluster_peers(cfg: &ClusterConfig) -> Vec<Peer> {
    cfg.nodes
        .iter()
        .map(|n| Peer::new(n.id, n.ip.clone(), n.port))
        .collect()
}

// ---------------------------------------------------------------------------
// Node
// ---------------------------------------------------------------------------

/// One middleware process. Owns every subsystem and is the transport
/// server's dispatcher.
pub struct Node {
    pub(crate) node_id: NodeId,
    /// Every configured node, the local one included.
    pub(crate) all_nodes: Vec<Peer>,
    pub(crate) client: NetClient,
    pub(crate) executor: Arc<dyn QueryExecutor>,
    pub(crate) registry: Arc<TransactionRegistry>,
    pub(crate) participant: CommitParticipant,
    pub(crate) two_pc: CommitCoordinator,
    pub(crate) replication: ReplicationManager,
    pub(crate) monitor: Arc<HeartbeatMonitor>,
    pub(crate) health: HealthTracker,
    pub(crate) election: Arc<BullyElection>,
    pub(crate) balancer: LoadBalancer,
    events_rx: Mutex<Option<mpsc::Receiver<ClusterEvent>>>,
}

impl Node {
    /// Build a node over a static cluster membership. The boot-time
    /// coordinator is the maximum configured id; no election runs yet.
    pub fn new(
        node_id: NodeId,
        all_nodes: Vec<Peer>,
        executor: Arc<dyn QueryExecutor>,
        settings: NodeSettings,
    ) -> Result<Arc<Self>> {
        ensure!(
            all_nodes.iter().any(|p| p.id == node_id),
            "configuration not found for node {node_id}"
        );
        let peers: Vec<Peer> = all_nodes.iter().filter(|p| p.id != node_id).cloned().collect();

        info!("initializing node {node_id}");

        let client = NetClient::new(settings.net_timeout);
        let (events_tx, events_rx) = mpsc::channel(64);

        let monitor =
            HeartbeatMonitor::new(node_id, peers.clone(), settings.heartbeat, events_tx)
                .context("heartbeat configuration")?;
        let election = BullyElection::new(node_id, peers, settings.election);

        let locks = Arc::new(LockManager::new());
        let registry = Arc::new(TransactionRegistry::new(node_id, locks));
        let participant = CommitParticipant::new(
            node_id,
            Arc::clone(&registry),
            Arc::clone(&executor),
            settings.lock_wait,
        );
        let two_pc = CommitCoordinator::new(node_id, client.clone());
        let replication = ReplicationManager::new(node_id, client.clone());

        let initial_coordinator = all_nodes.iter().map(|p| p.id).max().unwrap_or(node_id);
        election.set_coordinator(initial_coordinator);
        if initial_coordinator == node_id {
            info!("node {node_id} activated as coordinator");
        }

        Ok(Arc::new(Self {
            node_id,
            all_nodes,
            client,
            executor,
            registry,
            participant,
            two_pc,
            replication,
            monitor,
            health: HealthTracker::new(node_id),
            election,
            balancer: LoadBalancer::new(settings.strategy),
            events_rx: Mutex::new(Some(events_rx)),
        }))
    }

    /// Start serving: transport accept loop, failure detector tasks, the
    /// cluster-event loop, and the role watcher.
    pub fn start(self: &Arc<Self>, bound: Bound) -> Result<NodeRuntime> {
        let server = bound.spawn(self.node_id, Arc::clone(self))?;
        let monitor_tasks = self.monitor.start(self.client.clone());

        let mut events = self
            .events_rx
            .lock()
            .expect("event receiver poisoned")
            .take()
            .context("node already started")?;
        let event_task = {
            let node = Arc::clone(self);
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    node.on_cluster_event(event);
                }
            })
        };

        let role_task = {
            let node = Arc::clone(self);
            let mut coordinator = self.election.subscribe();
            tokio::spawn(async move {
                let mut was_coordinator = node.election.is_coordinator();
                while coordinator.changed().await.is_ok() {
                    let now_coordinator = *coordinator.borrow() == Some(node.node_id);
                    if now_coordinator && !was_coordinator {
                        info!("node {} activated as coordinator", node.node_id);
                    } else if !now_coordinator && was_coordinator {
                        info!("node {} deactivated as coordinator", node.node_id);
                    }
                    was_coordinator = now_coordinator;
                }
            })
        };

        info!(
            "node {} started, listening on {}",
            self.node_id,
            server.local_addr()
        );
        Ok(NodeRuntime {
            server,
            monitor_tasks,
            event_task,
            role_task,
        })
    }

    fn on_cluster_event(self: &Arc<Self>, event: ClusterEvent) {
        match event {
            ClusterEvent::PeerDown(id) => {
                self.health.record_failure(id);
                if self.election.coordinator_id() == Some(id) {
                    error!("coordinator (node {id}) has failed, triggering election");
                    let election = Arc::clone(&self.election);
                    tokio::spawn(async move { election.start_election().await });
                }
            }
            ClusterEvent::PeerUp(id) => {
                self.health.record_recovery(id);
            }
        }
    }

    pub fn node_id(&self) -> NodeId {
        self.node_id
    }

    pub fn is_coordinator(&self) -> bool {
        self.election.is_coordinator()
    }

    pub fn coordinator_id(&self) -> Option<NodeId> {
        self.election.coordinator_id()
    }

    pub fn alive_peers(&self) -> Vec<NodeId> {
        self.monitor.alive_peers()
    }

    /// Transactions this node has voted YES for without a decision yet.
    pub fn prepared_count(&self) -> usize {
        self.participant.prepared_count()
    }

    pub(crate) fn status_report(&self) -> NodeStatusReport {
        NodeStatusReport {
            node_id: self.node_id,
            is_coordinator: self.election.is_coordinator(),
            coordinator_id: self.election.coordinator_id(),
            alive_peers: self.monitor.alive_peers(),
            dead_peers: self.monitor.dead_peers(),
            heartbeat: self.monitor.snapshot(),
            health: self.health.stats(),
            load_balancer: self.balancer.stats(),
            locks: self.registry.lock_manager().snapshot(),
            transactions: self.registry.summary(),
        }
    }

    async fn dispatch(&self, msg: Message) -> Option<Message> {
        let sender = msg.sender_id;
        debug!("handling {} message from node {sender}", msg.type_name());

        match msg.payload {
            Payload::Heartbeat {} => {
                // Never answered; a response here is broken-pipe noise.
                self.monitor.record_heartbeat(sender);
                None
            }
            Payload::Query {
                query,
                transaction_id,
                from_coordinator,
            } => {
                let outcome = if from_coordinator {
                    let txn = transaction_id.unwrap_or_else(generate_transaction_id);
                    self.executor.execute(&query, &txn)
                } else {
                    self.execute_query(&query).await
                };
                Some(Message::query_response(self.node_id, outcome))
            }
            Payload::Replication {
                query,
                transaction_id,
            } => Some(self.replication.handle_request(
                &query,
                &transaction_id,
                sender,
                self.executor.as_ref(),
            )),
            Payload::Election {} => Some(self.election.handle_election(sender)),
            Payload::CoordinatorAnnouncement {} => {
                self.election.handle_announcement(sender);
                None
            }
            Payload::TransactionPrepare {
                transaction_id,
                query,
            } => Some(self.participant.handle_prepare(&transaction_id, &query).await),
            Payload::TransactionCommit { transaction_id } => {
                Some(self.participant.handle_commit(&transaction_id))
            }
            Payload::TransactionAbort { transaction_id } => {
                self.participant.handle_abort(&transaction_id);
                None
            }
            Payload::HealthCheck {} => {
                let cluster = self
                    .health
                    .cluster_health(&self.monitor, self.election.coordinator_id());
                Some(Message::new(self.node_id, Payload::HealthResponse { cluster }).seal())
            }
            Payload::NodeStatus { .. } => Some(
                Message::new(
                    self.node_id,
                    Payload::NodeStatus {
                        report: Some(self.status_report()),
                    },
                )
                .seal(),
            ),
            other => {
                warn!("no handler for message type {}", other.type_name());
                None
            }
        }
    }
}

impl Inbound for Node {
    async fn handle(&self, msg: Message) -> Option<Message> {
        self.dispatch(msg).await
    }
}

// ---------------------------------------------------------------------------
// NodeRuntime
// ---------------------------------------------------------------------------

/// Handles to everything [`Node::start`] spawned.
pub struct NodeRuntime {
    server: Server,
    monitor_tasks: MonitorTasks,
    event_task: JoinHandle<()>,
    role_task: JoinHandle<()>,
}

impl NodeRuntime {
    pub fn local_addr(&self) -> std::net::SocketAddr {
        self.server.local_addr()
    }

    /// Orderly shutdown: detector tasks first (so no election fires while
    /// the server drains), then the accept loop, then the event loops.
    pub async fn shutdown(self) {
        self.monitor_tasks.shutdown().await;
        self.server.shutdown().await;
        self.event_task.abort();
        self.role_task.abort();
        info!("node stopped");
    }
}
