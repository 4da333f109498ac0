use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use ddb_proto::{Message, NodeId, WireError};
use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

use crate::wire::{read_frame, write_frame};

const READ_TIMEOUT: Duration = Duration::from_secs(5);
const WRITE_TIMEOUT: Duration = Duration::from_secs(5);

/// Message sink the server dispatches into. Returning `Some` writes that
/// message back as the connection's single response; `None` closes the
/// connection silently (heartbeats MUST take this path).
pub trait Inbound: Send + Sync + 'static {
    fn handle(&self, msg: Message) -> impl Future<Output = Option<Message>> + Send;
}

// ---------------------------------------------------------------------------
// Bound / Server
// ---------------------------------------------------------------------------

/// A bound-but-not-yet-serving listener. Binding first lets callers learn
/// the OS-assigned port (`addr: 0`) before the accept loop starts.
pub struct Bound {
    listener: TcpListener,
}

impl Bound {
    pub async fn bind(addr: impl ToSocketAddrs) -> Result<Self> {
        let listener = TcpListener::bind(addr).await.context("bind listener")?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        self.listener.local_addr().context("listener local_addr")
    }

    /// Start the accept loop. `node_id` stamps protocol-error responses.
    pub fn spawn<H: Inbound>(self, node_id: NodeId, handler: Arc<H>) -> Result<Server> {
        let local_addr = self.local_addr()?;
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
        let listener = self.listener;

        let task = tokio::spawn(async move {
            info!("listening for connections on {local_addr}");
            loop {
                tokio::select! {
                    _ = shutdown_rx.changed() => break,
                    accepted = listener.accept() => match accepted {
                        Ok((stream, peer_addr)) => {
                            debug!("accepted connection from {peer_addr}");
                            let handler = Arc::clone(&handler);
                            tokio::spawn(handle_client(stream, peer_addr, node_id, handler));
                        }
                        Err(e) => {
                            // Transient accept failures (fd pressure etc.)
                            // must not kill the node.
                            error!("error accepting connection: {e}");
                            tokio::time::sleep(Duration::from_millis(100)).await;
                        }
                    },
                }
            }
            info!("socket server on {local_addr} stopped");
        });

        Ok(Server {
            local_addr,
            shutdown: shutdown_tx,
            task,
        })
    }
}

/// Handle to a running accept loop.
pub struct Server {
    local_addr: SocketAddr,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl Server {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("server task join failed: {e}");
        }
    }
}

// ---------------------------------------------------------------------------
// Per-connection worker
// ---------------------------------------------------------------------------

async fn handle_client<H: Inbound>(
    mut stream: TcpStream,
    peer_addr: SocketAddr,
    node_id: NodeId,
    handler: Arc<H>,
) {
    let msg = match timeout(READ_TIMEOUT, read_frame(&mut stream)).await {
        Ok(Ok(msg)) => msg,
        Ok(Err(e)) => {
            // Protocol violations get a best-effort error reply; anything
            // else (peer hung up mid-frame) is just logged.
            if let Some(wire) = e.downcast_ref::<WireError>() {
                warn!("invalid message from {peer_addr}: {wire}");
                let reply = Message::error_response(node_id, None, wire.to_string());
                let _ = timeout(WRITE_TIMEOUT, write_frame(&mut stream, &reply)).await;
            } else {
                debug!("connection from {peer_addr} dropped: {e:#}");
            }
            return;
        }
        Err(_) => {
            debug!("read from {peer_addr} timed out");
            return;
        }
    };

    debug!(
        "received {} from node {} ({peer_addr})",
        msg.type_name(),
        msg.sender_id
    );

    if let Some(reply) = handler.handle(msg).await {
        match timeout(WRITE_TIMEOUT, write_frame(&mut stream, &reply)).await {
            Ok(Ok(())) => debug!("sent {} to {peer_addr}", reply.type_name()),
            Ok(Err(e)) => debug!("failed to respond to {peer_addr}: {e:#}"),
            Err(_) => debug!("response write to {peer_addr} timed out"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::{NetClient, Peer};
    use ddb_proto::{Payload, QueryOutcome};
    use tokio::io::AsyncWriteExt;

    struct Echo;

    impl Inbound for Echo {
        async fn handle(&self, msg: Message) -> Option<Message> {
            match msg.payload {
                Payload::Heartbeat {} => None,
                _ => {
                    let outcome = QueryOutcome {
                        success: true,
                        node_id: Some(9),
                        ..Default::default()
                    };
                    Some(Message::query_response(9, outcome))
                }
            }
        }
    }

    #[tokio::test]
    async fn request_gets_single_response() {
        let bound = Bound::bind("127.0.0.1:0").await.unwrap();
        let addr = bound.local_addr().unwrap();
        let server = bound.spawn(9, Arc::new(Echo)).unwrap();

        let client = NetClient::new(Duration::from_secs(1));
        let peer = Peer::new(9, "127.0.0.1", addr.port());
        let msg = Message::new(
            1,
            Payload::Query {
                query: "SELECT 1".into(),
                transaction_id: None,
                from_coordinator: false,
            },
        )
        .seal();

        let resp = client.request(&peer, &msg).await.unwrap();
        assert_eq!(resp.type_name(), "QUERY_RESPONSE");
        assert!(resp.verify());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn heartbeat_gets_no_response() {
        let bound = Bound::bind("127.0.0.1:0").await.unwrap();
        let addr = bound.local_addr().unwrap();
        let server = bound.spawn(9, Arc::new(Echo)).unwrap();

        let client = NetClient::new(Duration::from_millis(500));
        let peer = Peer::new(9, "127.0.0.1", addr.port());
        let hb = Message::new(1, Payload::Heartbeat {}).seal();

        client.notify(&peer, &hb).await.unwrap();
        // A request for a heartbeat would block until the server closes
        // the socket without writing; expect a read failure, not a frame.
        assert!(client.request(&peer, &hb).await.is_err());

        server.shutdown().await;
    }

    #[tokio::test]
    async fn oversize_frame_is_answered_with_protocol_error() {
        let bound = Bound::bind("127.0.0.1:0").await.unwrap();
        let addr = bound.local_addr().unwrap();
        let server = bound.spawn(9, Arc::new(Echo)).unwrap();

        let mut raw = TcpStream::connect(addr).await.unwrap();
        let bogus = ((ddb_proto::MAX_FRAME_BYTES + 1) as u32).to_be_bytes();
        raw.write_all(&bogus).await.unwrap();

        let reply = read_frame(&mut raw).await.unwrap();
        match reply.payload {
            Payload::Error { error, .. } => {
                assert!(error.contains("invalid message length"), "got: {error}")
            }
            other => panic!("unexpected payload: {}", other.type_name()),
        }

        server.shutdown().await;
    }
}
