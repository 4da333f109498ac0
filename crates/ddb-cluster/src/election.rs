use std::sync::{Arc, Mutex};
use std::time::Duration;

use ddb_net::{NetClient, Peer};
use ddb_proto::{Message, NodeId, Payload};
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct ElectionConfig {
    /// How long to wait for each higher node's `ELECTION_OK`.
    pub response_timeout: Duration,
    /// How long to wait for a `COORDINATOR_ANNOUNCEMENT` after a higher
    /// node answered.
    pub election_timeout: Duration,
}

impl Default for ElectionConfig {
    fn default() -> Self {
        Self {
            response_timeout: Duration::from_secs(3),
            election_timeout: Duration::from_secs(10),
        }
    }
}

// ---------------------------------------------------------------------------
// BullyElection
// ---------------------------------------------------------------------------

/// Bully leader election: the highest-id live node wins. The coordinator
/// view is published through a watch channel, so role-change reactions
/// run in subscriber tasks, never under election locks.
pub struct BullyElection {
    node_id: NodeId,
    peers: Vec<Peer>,
    cfg: ElectionConfig,
    in_progress: Mutex<bool>,
    coordinator: watch::Sender<Option<NodeId>>,
}

impl BullyElection {
    /// `peers` must not contain the local node.
    pub fn new(node_id: NodeId, peers: Vec<Peer>, cfg: ElectionConfig) -> Arc<Self> {
        let (coordinator, _) = watch::channel(None);
        Arc::new(Self {
            node_id,
            peers,
            cfg,
            in_progress: Mutex::new(false),
            coordinator,
        })
    }

    pub fn subscribe(&self) -> watch::Receiver<Option<NodeId>> {
        self.coordinator.subscribe()
    }

    pub fn coordinator_id(&self) -> Option<NodeId> {
        *self.coordinator.borrow()
    }

    pub fn is_coordinator(&self) -> bool {
        self.coordinator_id() == Some(self.node_id)
    }

    /// Adopt a coordinator without an election (boot-time rule: every node
    /// starts with the maximum configured id).
    pub fn set_coordinator(&self, id: NodeId) {
        info!("coordinator set to node {id}");
        // send_replace: the view must update even before anyone subscribes.
        self.coordinator.send_replace(Some(id));
    }

    /// Run the Bully rounds until a coordinator is known. Concurrent calls
    /// collapse into the already-running election.
    pub async fn start_election(self: Arc<Self>) {
        {
            let mut guard = self.in_progress.lock().expect("election state poisoned");
            if *guard {
                info!("election already in progress");
                return;
            }
            *guard = true;
        }
        info!("node {} starting election", self.node_id);

        let client = NetClient::new(self.cfg.response_timeout);
        loop {
            let higher: Vec<&Peer> = self.peers.iter().filter(|p| p.id > self.node_id).collect();
            if higher.is_empty() {
                info!("node {} has highest id, becoming coordinator", self.node_id);
                self.become_coordinator().await;
                break;
            }

            // Subscribe before contacting anyone so an announcement racing
            // our requests is not lost.
            let mut announcements = self.coordinator.subscribe();

            let mut any_responsive = false;
            for peer in &higher {
                let msg = Message::new(self.node_id, Payload::Election {}).to(peer.id).seal();
                match client.request(peer, &msg).await {
                    Ok(resp) if matches!(resp.payload, Payload::ElectionOk {}) => {
                        debug!("{peer} responded OK to election");
                        any_responsive = true;
                    }
                    Ok(resp) => {
                        warn!("unexpected election response from {peer}: {}", resp.type_name());
                    }
                    Err(e) => {
                        debug!("{peer} did not respond to election: {e:#}");
                    }
                }
            }

            if !any_responsive {
                info!("no response from higher nodes, becoming coordinator");
                self.become_coordinator().await;
                break;
            }

            info!("waiting for coordinator announcement");
            match tokio::time::timeout(self.cfg.election_timeout, announcements.changed()).await {
                Ok(Ok(())) => {
                    let elected = *announcements.borrow();
                    info!("coordinator announcement received: {elected:?}");
                    break;
                }
                _ => {
                    warn!("no coordinator announcement received, restarting election");
                }
            }
        }

        *self.in_progress.lock().expect("election state poisoned") = false;
    }

    async fn become_coordinator(&self) {
        self.coordinator.send_replace(Some(self.node_id));

        let announcement =
            Message::new(self.node_id, Payload::CoordinatorAnnouncement {}).seal();
        let client = NetClient::new(self.cfg.response_timeout);
        client.broadcast(&self.peers, &announcement, false).await;
    }

    /// Unconditionally answer `ELECTION_OK`; kick off our own election in
    /// the background unless one is already running.
    pub fn handle_election(self: &Arc<Self>, from: NodeId) -> Message {
        info!("received ELECTION message from node {from}");

        let running = *self.in_progress.lock().expect("election state poisoned");
        if !running {
            let this = Arc::clone(self);
            tokio::spawn(async move { this.start_election().await });
        }

        Message::new(self.node_id, Payload::ElectionOk {}).to(from).seal()
    }

    /// Adopt an announced coordinator.
    pub fn handle_announcement(&self, from: NodeId) {
        info!("node {from} announced as coordinator");
        self.coordinator.send_replace(Some(from));
    }
}
