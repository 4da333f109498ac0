use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ddb_cluster::{ElectionConfig, HeartbeatConfig, Strategy};
use ddb_exec::{MemoryExecutor, QueryExecutor};
use ddb_net::{Bound, NetClient, Peer};
use ddb_node::{Node, NodeRuntime, NodeSettings};
use ddb_proto::{Message, NodeId, Payload, QueryOutcome};

/// The client id used when issuing queries from tests.
pub const TEST_CLIENT_ID: NodeId = 0;

/// Timings shrunk far enough that failure detection and elections settle
/// within a couple of seconds, while still honoring
/// `timeout >= 3 * interval`.
pub fn fast_settings() -> NodeSettings {
    NodeSettings {
        heartbeat: HeartbeatConfig {
            interval: Duration::from_millis(100),
            timeout: Duration::from_millis(400),
        },
        election: ElectionConfig {
            response_timeout: Duration::from_millis(300),
            election_timeout: Duration::from_millis(1000),
        },
        net_timeout: Duration::from_millis(800),
        lock_wait: Duration::from_millis(500),
        strategy: Strategy::RoundRobin,
    }
}

pub struct TestNode {
    pub id: NodeId,
    pub node: Arc<Node>,
    pub executor: Arc<MemoryExecutor>,
    pub peer: Peer,
    runtime: Option<NodeRuntime>,
}

pub struct TestCluster {
    pub nodes: Vec<TestNode>,
    pub client: NetClient,
}

/// Bind every listener first so all addresses are known, then start the
/// nodes over the full membership. Ids are `1..=size`; the boot-time
/// coordinator is node `size`.
pub async fn start_cluster(size: u64) -> Result<TestCluster> {
    let mut bounds = Vec::new();
    let mut peers = Vec::new();
    for id in 1..=size {
        let bound = Bound::bind("127.0.0.1:0").await?;
        let port = bound.local_addr()?.port();
        peers.push(Peer::new(id, "127.0.0.1", port));
        bounds.push(bound);
    }

    let mut nodes = Vec::new();
    for (bound, peer) in bounds.into_iter().zip(&peers) {
        let executor = Arc::new(MemoryExecutor::new(peer.id));
        let node = Node::new(
            peer.id,
            peers.clone(),
            Arc::clone(&executor) as Arc<dyn QueryExecutor>,
            fast_settings(),
        )?;
        let runtime = node.start(bound)?;
        nodes.push(TestNode {
            id: peer.id,
            node,
            executor,
            peer: peer.clone(),
            runtime: Some(runtime),
        });
    }

    Ok(TestCluster {
        nodes,
        client: NetClient::new(Duration::from_secs(2)),
    })
}

impl TestCluster {
    pub fn node(&self, id: NodeId) -> &TestNode {
        self.nodes
            .iter()
            .find(|n| n.id == id)
            .unwrap_or_else(|| panic!("no node {id} in test cluster"))
    }

    /// Send a client SQL query to the given node and unwrap the outcome.
    pub async fn query(&self, via: NodeId, sql: &str) -> Result<QueryOutcome> {
        let msg = Message::new(
            TEST_CLIENT_ID,
            Payload::Query {
                query: sql.to_string(),
                transaction_id: None,
                from_coordinator: false,
            },
        )
        .seal();

        let resp = self.client.request(&self.node(via).peer, &msg).await?;
        unwrap_outcome(resp)
    }

    /// Send an arbitrary payload to a node and return its reply.
    pub async fn send(&self, via: NodeId, payload: Payload) -> Result<Message> {
        let msg = Message::new(TEST_CLIENT_ID, payload).seal();
        self.client.request(&self.node(via).peer, &msg).await
    }

    /// Stop one node's server and background tasks, simulating a crash as
    /// the rest of the cluster sees it (connections refused, heartbeats
    /// gone silent).
    pub async fn stop(&mut self, id: NodeId) {
        let node = self
            .nodes
            .iter_mut()
            .find(|n| n.id == id)
            .unwrap_or_else(|| panic!("no node {id} in test cluster"));
        if let Some(runtime) = node.runtime.take() {
            runtime.shutdown().await;
        }
    }

    pub async fn shutdown(mut self) {
        let ids: Vec<NodeId> = self.nodes.iter().map(|n| n.id).collect();
        for id in ids {
            self.stop(id).await;
        }
    }
}

/// Pull the planner outcome out of a `QUERY_RESPONSE` reply.
pub fn unwrap_outcome(resp: Message) -> Result<QueryOutcome> {
    match resp.payload {
        Payload::QueryResponse {
            success,
            result,
            error,
        } => Ok::<QueryOutcome, anyhow::Error>(result.unwrap_or(QueryOutcome {
            success,
            error,
            ..Default::default()
        })),
        Payload::Error { error, .. } => Ok(QueryOutcome::failure(error)),
        other => anyhow::bail!("unexpected response type {}", other.type_name()),
    }
    .context("unwrap query response")
}
