use std::collections::HashMap;
use std::sync::Mutex;

use ddb_proto::{ClusterHealth, NodeId};
use serde_json::{json, Value};
use tracing::warn;

use crate::heartbeat::HeartbeatMonitor;

/// Failure/recovery bookkeeping and cluster-health summaries derived from
/// the liveness map.
pub struct HealthTracker {
    node_id: NodeId,
    failures: Mutex<HashMap<NodeId, u64>>,
    recoveries: Mutex<HashMap<NodeId, u64>>,
}

impl HealthTracker {
    pub fn new(node_id: NodeId) -> Self {
        Self {
            node_id,
            failures: Mutex::new(HashMap::new()),
            recoveries: Mutex::new(HashMap::new()),
        }
    }

    pub fn record_failure(&self, id: NodeId) {
        warn!("handling failure of node {id}");
        *self
            .failures
            .lock()
            .expect("health counters poisoned")
            .entry(id)
            .or_insert(0) += 1;
    }

    pub fn record_recovery(&self, id: NodeId) {
        *self
            .recoveries
            .lock()
            .expect("health counters poisoned")
            .entry(id)
            .or_insert(0) += 1;
    }

    /// Health summary over the remote peer set. The local node itself is
    /// alive by definition and excluded from the counts, matching how the
    /// liveness map tracks only remote peers.
    pub fn cluster_health(
        &self,
        monitor: &HeartbeatMonitor,
        coordinator_id: Option<NodeId>,
    ) -> ClusterHealth {
        let alive = monitor.alive_peers();
        let dead = monitor.dead_peers();
        let total = alive.len() + dead.len();

        let coordinator_alive = match coordinator_id {
            Some(id) if id == self.node_id => true,
            Some(id) => monitor.is_alive(id),
            None => false,
        };

        ClusterHealth {
            total_nodes: total,
            alive_nodes: alive.len(),
            dead_nodes: dead.len(),
            health_percentage: if total > 0 {
                alive.len() as f64 / total as f64 * 100.0
            } else {
                0.0
            },
            alive_node_ids: alive,
            dead_node_ids: dead,
            coordinator_alive,
        }
    }

    /// True when at least `required` of the remote peers are alive.
    pub fn quorum_available(&self, monitor: &HeartbeatMonitor, required: f64) -> bool {
        let health = self.cluster_health(monitor, None);
        health.health_percentage / 100.0 >= required
    }

    pub fn stats(&self) -> Value {
        let failures = self.failures.lock().expect("health counters poisoned");
        let recoveries = self.recoveries.lock().expect("health counters poisoned");
        json!({
            "total_failures": failures.values().sum::<u64>(),
            "total_recoveries": recoveries.values().sum::<u64>(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heartbeat::{ClusterEvent, HeartbeatConfig};
    use ddb_net::Peer;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn cluster_health_tracks_liveness_and_coordinator() {
        let (tx, _rx) = mpsc::channel::<ClusterEvent>(4);
        let monitor = HeartbeatMonitor::new(
            1,
            vec![Peer::new(2, "127.0.0.1", 9), Peer::new(3, "127.0.0.1", 9)],
            HeartbeatConfig {
                interval: Duration::from_millis(20),
                timeout: Duration::from_millis(60),
            },
            tx,
        )
        .unwrap();
        let tracker = HealthTracker::new(1);

        let health = tracker.cluster_health(&monitor, Some(3));
        assert_eq!(health.alive_nodes, 2);
        assert_eq!(health.health_percentage, 100.0);
        assert!(health.coordinator_alive);
        assert!(tracker.quorum_available(&monitor, 0.5));

        // The local node as coordinator counts alive even though the map
        // only tracks remote peers.
        assert!(tracker.cluster_health(&monitor, Some(1)).coordinator_alive);
        assert!(!tracker.cluster_health(&monitor, None).coordinator_alive);
    }
}
