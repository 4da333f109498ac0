use std::collections::HashMap;
use std::time::Duration;

use anyhow::{Context, Result};
use ddb_proto::{Message, NodeId};
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::{debug, error};

use crate::wire::{read_frame, write_frame};

/// A cluster member as the transport sees it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Peer {
    pub id: NodeId,
    pub host: String,
    pub port: u16,
}

impl Peer {
    pub fn new(id: NodeId, host: impl Into<String>, port: u16) -> Self {
        Self {
            id,
            host: host.into(),
            port,
        }
    }
}

impl std::fmt::Display for Peer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node {} ({}:{})", self.id, self.host, self.port)
    }
}

// ---------------------------------------------------------------------------
// NetClient
// ---------------------------------------------------------------------------

/// One-shot TCP client. Every call opens a fresh connection and closes it
/// before returning; the configured timeout bounds connect, write, and
/// read individually.
#[derive(Debug, Clone)]
pub struct NetClient {
    timeout: Duration,
}

impl NetClient {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    /// Send a message and wait for the single framed response.
    pub async fn request(&self, peer: &Peer, msg: &Message) -> Result<Message> {
        let mut stream = self.connect(peer).await?;
        timeout(self.timeout, write_frame(&mut stream, msg))
            .await
            .with_context(|| format!("write to {peer} timed out"))??;
        debug!("sent {} to {peer}", msg.type_name());

        let response = timeout(self.timeout, read_frame(&mut stream))
            .await
            .with_context(|| format!("read from {peer} timed out"))??;
        debug!("received {} from {peer}", response.type_name());
        Ok(response)
    }

    /// Send a message without waiting for any response.
    pub async fn notify(&self, peer: &Peer, msg: &Message) -> Result<()> {
        let mut stream = self.connect(peer).await?;
        timeout(self.timeout, write_frame(&mut stream, msg))
            .await
            .with_context(|| format!("write to {peer} timed out"))??;
        debug!("sent {} to {peer} (no response expected)", msg.type_name());
        Ok(())
    }

    /// Sequential unicast to every peer. A per-peer failure is logged and
    /// recorded as `None`; it never aborts the sweep. When
    /// `wait_for_response` is false the map values are `None` for every
    /// peer the write reached.
    pub async fn broadcast(
        &self,
        peers: &[Peer],
        msg: &Message,
        wait_for_response: bool,
    ) -> HashMap<NodeId, Option<Message>> {
        let mut responses = HashMap::new();
        for peer in peers {
            let entry = if wait_for_response {
                match self.request(peer, msg).await {
                    Ok(resp) => Some(resp),
                    Err(e) => {
                        error!("failed to send {} to {peer}: {e:#}", msg.type_name());
                        None
                    }
                }
            } else {
                if let Err(e) = self.notify(peer, msg).await {
                    error!("failed to send {} to {peer}: {e:#}", msg.type_name());
                }
                None
            };
            responses.insert(peer.id, entry);
        }
        responses
    }

    async fn connect(&self, peer: &Peer) -> Result<TcpStream> {
        timeout(
            self.timeout,
            TcpStream::connect((peer.host.as_str(), peer.port)),
        )
        .await
        .with_context(|| format!("connect to {peer} timed out"))?
        .with_context(|| format!("connect to {peer}"))
    }
}
