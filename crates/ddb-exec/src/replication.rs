use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use ddb_net::{NetClient, Peer};
use ddb_proto::{Message, NodeId, Payload};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::executor::QueryExecutor;

/// The replication log keeps at most this many entries.
pub const REPLICATION_LOG_CAP: usize = 1000;

#[derive(Debug, Clone, Serialize)]
struct ReplicationEntry {
    transaction_id: String,
    query: String,
    successful_nodes: Vec<NodeId>,
    failed_nodes: Vec<NodeId>,
    timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct ReplicationReport {
    pub success: bool,
    pub transaction_id: String,
    pub total_nodes: usize,
    pub successful_nodes: Vec<NodeId>,
    pub failed_nodes: Vec<NodeId>,
    pub success_rate: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConsistencyReport {
    pub consistent: bool,
    pub needs_repair: bool,
    pub successful_nodes: Vec<NodeId>,
    pub failed_nodes: Vec<NodeId>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplicationStats {
    pub total_replications: usize,
    pub successful: usize,
    pub failed: usize,
    pub success_rate: f64,
}

// ---------------------------------------------------------------------------
// ReplicationManager
// ---------------------------------------------------------------------------

/// Pushes write statements to target nodes as `REPLICATION` messages and
/// answers incoming ones by executing locally. Outcomes are tracked in a
/// bounded in-memory ring for consistency checks and repair.
pub struct ReplicationManager {
    node_id: NodeId,
    client: NetClient,
    log: Mutex<VecDeque<ReplicationEntry>>,
}

impl ReplicationManager {
    pub fn new(node_id: NodeId, client: NetClient) -> Self {
        Self {
            node_id,
            client,
            log: Mutex::new(VecDeque::new()),
        }
    }

    /// Replicate one statement to every target (self is skipped).
    /// Per-target failures are collected, never propagated.
    pub async fn replicate(
        &self,
        query: &str,
        transaction_id: &str,
        targets: &[Peer],
        wait_for_ack: bool,
    ) -> ReplicationReport {
        info!(
            "replicating transaction {transaction_id} to {} nodes",
            targets.len()
        );

        let msg = Message::new(
            self.node_id,
            Payload::Replication {
                query: query.to_string(),
                transaction_id: transaction_id.to_string(),
            },
        )
        .seal();

        let mut successful = Vec::new();
        let mut failed = Vec::new();

        for peer in targets.iter().filter(|p| p.id != self.node_id) {
            if !wait_for_ack {
                match self.client.notify(peer, &msg).await {
                    Ok(()) => successful.push(peer.id),
                    Err(e) => {
                        error!("replication to {peer} failed: {e:#}");
                        failed.push(peer.id);
                    }
                }
                continue;
            }

            match self.client.request(peer, &msg).await {
                Ok(resp) => match resp.payload {
                    Payload::ReplicationAck { .. } => successful.push(peer.id),
                    Payload::ReplicationNack { error, .. } => {
                        warn!(
                            "{peer} rejected replication of {transaction_id}: {}",
                            error.as_deref().unwrap_or("unknown error")
                        );
                        failed.push(peer.id);
                    }
                    other => {
                        warn!(
                            "{peer} answered replication with unexpected {}",
                            other.type_name()
                        );
                        failed.push(peer.id);
                    }
                },
                Err(e) => {
                    error!("replication to {peer} failed: {e:#}");
                    failed.push(peer.id);
                }
            }
        }

        self.record(transaction_id, query, &successful, &failed);

        let total = targets.iter().filter(|p| p.id != self.node_id).count();
        let success_rate = if total > 0 {
            successful.len() as f64 / total as f64
        } else {
            1.0
        };

        ReplicationReport {
            success: failed.is_empty(),
            transaction_id: transaction_id.to_string(),
            total_nodes: total,
            successful_nodes: successful,
            failed_nodes: failed,
            success_rate,
        }
    }

    /// Apply an incoming replication request locally and build the
    /// ack/nack reply.
    pub fn handle_request(
        &self,
        query: &str,
        transaction_id: &str,
        sender_id: NodeId,
        executor: &dyn QueryExecutor,
    ) -> Message {
        info!("replication request from node {sender_id} for {transaction_id}");

        let result = executor.execute(query, transaction_id);
        let payload = if result.success {
            Payload::ReplicationAck {
                transaction_id: transaction_id.to_string(),
                status: "success".to_string(),
            }
        } else {
            let error = result.error.unwrap_or_else(|| "unknown error".to_string());
            error!("replication of {transaction_id} failed locally: {error}");
            Payload::ReplicationNack {
                transaction_id: transaction_id.to_string(),
                status: "failed".to_string(),
                error: Some(error),
            }
        };

        Message::new(self.node_id, payload).seal()
    }

    /// Check the most recent replication of a transaction.
    pub fn check_consistency(&self, transaction_id: &str) -> Option<ConsistencyReport> {
        let log = self.log.lock().expect("replication log poisoned");
        log.iter()
            .rev()
            .find(|e| e.transaction_id == transaction_id)
            .map(|e| ConsistencyReport {
                consistent: e.failed_nodes.is_empty(),
                needs_repair: !e.failed_nodes.is_empty(),
                successful_nodes: e.successful_nodes.clone(),
                failed_nodes: e.failed_nodes.clone(),
            })
    }

    /// Re-send a statement to nodes that previously failed it.
    pub async fn repair(
        &self,
        query: &str,
        transaction_id: &str,
        failed_targets: &[Peer],
    ) -> ReplicationReport {
        info!("repairing replication of {transaction_id}");
        self.replicate(query, transaction_id, failed_targets, true)
            .await
    }

    pub fn stats(&self) -> ReplicationStats {
        let log = self.log.lock().expect("replication log poisoned");
        let total = log.len();
        let successful = log.iter().filter(|e| e.failed_nodes.is_empty()).count();
        ReplicationStats {
            total_replications: total,
            successful,
            failed: total - successful,
            success_rate: if total > 0 {
                successful as f64 / total as f64
            } else {
                0.0
            },
        }
    }

    fn record(
        &self,
        transaction_id: &str,
        query: &str,
        successful: &[NodeId],
        failed: &[NodeId],
    ) {
        let mut log = self.log.lock().expect("replication log poisoned");
        log.push_back(ReplicationEntry {
            transaction_id: transaction_id.to_string(),
            query: query.chars().take(100).collect(),
            successful_nodes: successful.to_vec(),
            failed_nodes: failed.to_vec(),
            timestamp: Utc::now(),
        });
        while log.len() > REPLICATION_LOG_CAP {
            log.pop_front();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryExecutor;
    use std::time::Duration;

    fn manager(node_id: NodeId) -> ReplicationManager {
        ReplicationManager::new(node_id, NetClient::new(Duration::from_millis(200)))
    }

    #[test]
    fn handle_request_acks_on_success_and_nacks_on_failure() {
        let mgr = manager(1);
        let exec = MemoryExecutor::new(1);

        let ack = mgr.handle_request("INSERT INTO t VALUES (1)", "TXN-a", 3, &exec);
        assert!(matches!(ack.payload, Payload::ReplicationAck { .. }));
        assert_eq!(exec.applied_count(), 1);

        exec.fail_execute_containing("orders");
        let nack = mgr.handle_request("DELETE FROM orders", "TXN-b", 3, &exec);
        match nack.payload {
            Payload::ReplicationNack { error, .. } => assert!(error.is_some()),
            other => panic!("unexpected payload: {}", other.type_name()),
        }
    }

    #[tokio::test]
    async fn unreachable_target_is_collected_not_fatal() {
        let mgr = manager(1);
        // Port 9 on localhost: nothing listens there.
        let peers = [Peer::new(2, "127.0.0.1", 9)];
        let report = mgr.replicate("INSERT INTO t VALUES (1)", "TXN-a", &peers, true).await;
        assert!(!report.success);
        assert_eq!(report.failed_nodes, vec![2]);

        let check = mgr.check_consistency("TXN-a").unwrap();
        assert!(check.needs_repair);
        assert_eq!(check.failed_nodes, vec![2]);

        // Repair retries the failed targets and records another attempt.
        let repair = mgr.repair("INSERT INTO t VALUES (1)", "TXN-a", &peers).await;
        assert!(!repair.success, "target is still down");

        let stats = mgr.stats();
        assert_eq!(stats.total_replications, 2);
        assert_eq!(stats.failed, 2);
        assert_eq!(stats.success_rate, 0.0);
    }

    #[test]
    fn ring_is_bounded() {
        let mgr = manager(1);
        for i in 0..(REPLICATION_LOG_CAP + 10) {
            mgr.record(&format!("TXN-{i}"), "INSERT INTO t VALUES (1)", &[2], &[]);
        }
        let log = mgr.log.lock().unwrap();
        assert_eq!(log.len(), REPLICATION_LOG_CAP);
        assert_eq!(log.front().unwrap().transaction_id, "TXN-10");
    }
}
