use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use anyhow::{ensure, Result};
use ddb_net::{NetClient, Peer};
use ddb_proto::{Message, NodeId, Payload};
use serde_json::{json, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Membership change observed by the failure detector.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClusterEvent {
    PeerDown(NodeId),
    PeerUp(NodeId),
}

#[derive(Debug, Clone, Copy)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(15),
        }
    }
}

impl HeartbeatConfig {
    /// A timeout under three intervals flaps on a single dropped packet.
    pub fn validate(&self) -> Result<()> {
        ensure!(
            self.timeout >= 3 * self.interval,
            "heartbeat timeout ({:?}) must be at least 3x the interval ({:?})",
            self.timeout,
            self.interval
        );
        Ok(())
    }
}

struct PeerHealth {
    last_heartbeat: Instant,
    alive: bool,
}

// ---------------------------------------------------------------------------
// HeartbeatMonitor
// ---------------------------------------------------------------------------

/// Liveness map over the static peer set, fed by two periodic tasks: a
/// sender that pushes `HEARTBEAT` to every peer currently believed alive
/// (no response is ever expected), and a checker that expires peers whose
/// last heartbeat is older than the timeout. Membership changes are
/// published as [`ClusterEvent`]s.
pub struct HeartbeatMonitor {
    node_id: NodeId,
    peers: Vec<Peer>,
    cfg: HeartbeatConfig,
    state: Mutex<HashMap<NodeId, PeerHealth>>,
    events: mpsc::Sender<ClusterEvent>,
}

impl HeartbeatMonitor {
    /// `peers` must not contain the local node.
    pub fn new(
        node_id: NodeId,
        peers: Vec<Peer>,
        cfg: HeartbeatConfig,
        events: mpsc::Sender<ClusterEvent>,
    ) -> Result<Arc<Self>> {
        cfg.validate()?;
        let now = Instant::now();
        let state = peers
            .iter()
            .map(|p| {
                (
                    p.id,
                    PeerHealth {
                        last_heartbeat: now,
                        alive: true,
                    },
                )
            })
            .collect();
        Ok(Arc::new(Self {
            node_id,
            peers,
            cfg,
            state: Mutex::new(state),
            events,
        }))
    }

    /// Spawn the sender and checker tasks.
    pub fn start(self: &Arc<Self>, client: NetClient) -> MonitorTasks {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let sender = {
            let monitor = Arc::clone(self);
            let mut shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(monitor.cfg.interval);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => monitor.send_heartbeats(&client).await,
                    }
                }
            })
        };

        let checker = {
            let monitor = Arc::clone(self);
            let mut shutdown = shutdown_rx;
            // Shortened intervals (tests) still need detection within one
            // timeout, so the sweep never runs slower than the interval.
            let period = monitor.cfg.interval.min(Duration::from_secs(1));
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(period);
                loop {
                    tokio::select! {
                        _ = shutdown.changed() => break,
                        _ = ticker.tick() => monitor.expire_silent_peers().await,
                    }
                }
            })
        };

        info!("heartbeat monitor started on node {}", self.node_id);
        MonitorTasks {
            shutdown: shutdown_tx,
            sender,
            checker,
        }
    }

    async fn send_heartbeats(&self, client: &NetClient) {
        let msg = Message::new(self.node_id, Payload::Heartbeat {}).seal();
        for peer in &self.peers {
            // Dead peers are not probed; recovery is observed when the
            // recovered node's own heartbeats arrive.
            if !self.is_alive(peer.id) {
                continue;
            }
            if let Err(e) = client.notify(peer, &msg).await {
                debug!("failed to send heartbeat to {peer}: {e:#}");
            }
        }
    }

    async fn expire_silent_peers(&self) {
        let expired: Vec<(NodeId, Duration)> = {
            let mut state = self.state.lock().expect("liveness map poisoned");
            state
                .iter_mut()
                .filter_map(|(id, health)| {
                    let silence = health.last_heartbeat.elapsed();
                    if health.alive && silence > self.cfg.timeout {
                        health.alive = false;
                        Some((*id, silence))
                    } else {
                        None
                    }
                })
                .collect()
        };

        for (id, silence) in expired {
            warn!("node {id} failed (no heartbeat for {:.1}s)", silence.as_secs_f64());
            if self.events.send(ClusterEvent::PeerDown(id)).await.is_err() {
                debug!("cluster event channel closed");
            }
        }
    }

    /// Record an incoming heartbeat. A heartbeat from a dead peer marks it
    /// alive again and publishes `PeerUp`.
    pub fn record_heartbeat(&self, from: NodeId) {
        let recovered = {
            let mut state = self.state.lock().expect("liveness map poisoned");
            match state.get_mut(&from) {
                Some(health) => {
                    health.last_heartbeat = Instant::now();
                    let recovered = !health.alive;
                    health.alive = true;
                    recovered
                }
                None => {
                    debug!("heartbeat from unknown node {from} ignored");
                    false
                }
            }
        };
        if recovered {
            info!("node {from} recovered");
            let _ = self.events.try_send(ClusterEvent::PeerUp(from));
        }
    }

    pub fn is_alive(&self, id: NodeId) -> bool {
        let state = self.state.lock().expect("liveness map poisoned");
        state.get(&id).map_or(false, |h| h.alive)
    }

    pub fn alive_peers(&self) -> Vec<NodeId> {
        let state = self.state.lock().expect("liveness map poisoned");
        let mut ids: Vec<NodeId> = state
            .iter()
            .filter(|(_, h)| h.alive)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    pub fn dead_peers(&self) -> Vec<NodeId> {
        let state = self.state.lock().expect("liveness map poisoned");
        let mut ids: Vec<NodeId> = state
            .iter()
            .filter(|(_, h)| !h.alive)
            .map(|(id, _)| *id)
            .collect();
        ids.sort_unstable();
        ids
    }

    /// Per-peer liveness as JSON, for status reporting.
    pub fn snapshot(&self) -> Value {
        let state = self.state.lock().expect("liveness map poisoned");
        let nodes: serde_json::Map<String, Value> = state
            .iter()
            .map(|(id, h)| {
                (
                    id.to_string(),
                    json!({
                        "alive": h.alive,
                        "seconds_since_heartbeat": h.last_heartbeat.elapsed().as_secs_f64(),
                    }),
                )
            })
            .collect();
        json!({
            "heartbeat_interval_secs": self.cfg.interval.as_secs_f64(),
            "heartbeat_timeout_secs": self.cfg.timeout.as_secs_f64(),
            "nodes": nodes,
        })
    }
}

/// Handles to the two running detector tasks.
pub struct MonitorTasks {
    shutdown: watch::Sender<bool>,
    sender: JoinHandle<()>,
    checker: JoinHandle<()>,
}

impl MonitorTasks {
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        let _ = self.sender.await;
        let _ = self.checker.await;
        info!("heartbeat monitor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_monitor(
        timeout: Duration,
        interval: Duration,
    ) -> (Arc<HeartbeatMonitor>, mpsc::Receiver<ClusterEvent>) {
        let (tx, rx) = mpsc::channel(16);
        let peers = vec![Peer::new(2, "127.0.0.1", 9), Peer::new(3, "127.0.0.1", 9)];
        let monitor = HeartbeatMonitor::new(1, peers, HeartbeatConfig { interval, timeout }, tx)
            .expect("valid config");
        (monitor, rx)
    }

    #[test]
    fn config_requires_three_intervals_of_timeout() {
        let bad = HeartbeatConfig {
            interval: Duration::from_secs(5),
            timeout: Duration::from_secs(10),
        };
        assert!(bad.validate().is_err());
        assert!(HeartbeatConfig::default().validate().is_ok());
    }

    #[tokio::test]
    async fn peers_start_alive_and_expire_after_timeout() {
        let (monitor, mut rx) =
            test_monitor(Duration::from_millis(150), Duration::from_millis(50));
        assert_eq!(monitor.alive_peers(), vec![2, 3]);

        tokio::time::sleep(Duration::from_millis(300)).await;
        monitor.expire_silent_peers().await;

        assert_eq!(monitor.alive_peers(), Vec::<NodeId>::new());
        assert_eq!(monitor.dead_peers(), vec![2, 3]);
        let mut down = vec![rx.recv().await.unwrap(), rx.recv().await.unwrap()];
        down.sort_by_key(|e| match e {
            ClusterEvent::PeerDown(id) | ClusterEvent::PeerUp(id) => *id,
        });
        assert_eq!(
            down,
            vec![ClusterEvent::PeerDown(2), ClusterEvent::PeerDown(3)]
        );
    }

    #[tokio::test]
    async fn heartbeat_revives_dead_peer_and_emits_peer_up() {
        let (monitor, mut rx) =
            test_monitor(Duration::from_millis(150), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(300)).await;
        monitor.expire_silent_peers().await;
        assert!(!monitor.is_alive(2));
        rx.recv().await;
        rx.recv().await;

        monitor.record_heartbeat(2);
        assert!(monitor.is_alive(2));
        assert_eq!(rx.recv().await.unwrap(), ClusterEvent::PeerUp(2));
    }

    #[tokio::test]
    async fn fresh_heartbeat_keeps_peer_alive() {
        let (monitor, _rx) =
            test_monitor(Duration::from_millis(150), Duration::from_millis(50));
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.record_heartbeat(2);
        tokio::time::sleep(Duration::from_millis(100)).await;
        monitor.expire_silent_peers().await;
        assert!(monitor.is_alive(2), "recently refreshed peer stays alive");
        assert!(!monitor.is_alive(3));
    }

    #[test]
    fn unknown_sender_is_ignored() {
        let (monitor, _rx) =
            test_monitor(Duration::from_millis(150), Duration::from_millis(50));
        monitor.record_heartbeat(99);
        assert!(!monitor.is_alive(99));
    }
}
