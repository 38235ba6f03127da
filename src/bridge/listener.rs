//! Accept side of the bridge
//!
//! Peers dial in over WebSocket, say `Hello`, and are answered with
//! `Welcome` or `Reject`. Accepted peers then run the same session loop as
//! outbound bridges.

use std::net::SocketAddr;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::timeout;
use tracing::{debug, info, warn};

use super::connection::{run_session, SessionEnd};
use super::protocol::{BridgeFrame, PROTOCOL_VERSION};
use super::transport::{PeerLink, WsLink};
use crate::config::{is_agent_id, BridgeConfig};
use crate::error::BridgeError;
use crate::field::FieldAggregator;

/// Running WebSocket listener for inbound bridges.
pub struct PeerListener {
    local_addr: SocketAddr,
    peers: Arc<DashMap<String, String>>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl PeerListener {
    /// Bind `addr` and start accepting.
    pub async fn bind(
        addr: &str,
        field: Arc<FieldAggregator>,
        config: BridgeConfig,
    ) -> std::io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let local_addr = listener.local_addr()?;
        let peers = Arc::new(DashMap::new());
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        info!(addr = %local_addr, "Peer listener started");
        let task = tokio::spawn(accept_loop(
            listener,
            field,
            config,
            peers.clone(),
            shutdown_rx,
        ));

        Ok(Self {
            local_addr,
            peers,
            shutdown: shutdown_tx,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Node ids of peers with a live session, sorted.
    pub fn connected_peers(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.peers.iter().map(|p| p.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Stop accepting, say goodbye to every peer and wait for their tasks.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Listener task ended abnormally");
        }
        info!(addr = %self.local_addr, "Peer listener stopped");
    }
}

async fn accept_loop(
    listener: TcpListener,
    field: Arc<FieldAggregator>,
    config: BridgeConfig,
    peers: Arc<DashMap<String, String>>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut sessions = JoinSet::new();

    loop {
        tokio::select! {
            accepted = listener.accept() => match accepted {
                Ok((stream, addr)) => {
                    debug!(addr = %addr, "Inbound connection");
                    sessions.spawn(serve_tcp(
                        stream,
                        addr,
                        field.clone(),
                        config.clone(),
                        peers.clone(),
                        shutdown.clone(),
                    ));
                }
                Err(e) => warn!(error = %e, "Accept failed"),
            },
            // reap finished sessions so the set does not grow
            Some(_) = sessions.join_next(), if !sessions.is_empty() => {}
            _ = shutdown.changed() => break,
        }
    }

    while sessions.join_next().await.is_some() {}
}

async fn serve_tcp(
    stream: TcpStream,
    addr: SocketAddr,
    field: Arc<FieldAggregator>,
    config: BridgeConfig,
    peers: Arc<DashMap<String, String>>,
    mut shutdown: watch::Receiver<bool>,
) {
    // an idle client must not hold up close()
    let upgrade = timeout(config.connect_timeout(), tokio_tungstenite::accept_async(stream));
    let ws = tokio::select! {
        upgraded = upgrade => match upgraded {
            Ok(Ok(ws)) => ws,
            Ok(Err(e)) => {
                debug!(addr = %addr, error = %e, "WebSocket upgrade failed");
                return;
            }
            Err(_) => {
                debug!(addr = %addr, "WebSocket upgrade timed out");
                return;
            }
        },
        _ = shutdown.changed() => {
            debug!(addr = %addr, "Listener closing, dropping pending upgrade");
            return;
        }
    };
    let mut link = WsLink::new(ws);

    let hello = tokio::select! {
        hello = accept_hello(&mut link, &field, &config) => hello,
        _ = shutdown.changed() => {
            link.close().await;
            return;
        }
    };
    let remote = match hello {
        Ok(remote) => remote,
        Err(e) => {
            info!(addr = %addr, error = %e, "Inbound peer refused");
            return;
        }
    };

    peers.insert(remote.clone(), addr.to_string());
    let end = run_session(&mut link, &field, &config, &remote, &mut shutdown).await;
    peers.remove(&remote);
    log_end(&remote, &end);
}

/// Run the accept-side handshake and session over an already-open link.
///
/// Used by the WebSocket listener, and directly with in-memory links.
pub async fn serve_link(
    link: &mut dyn PeerLink,
    field: Arc<FieldAggregator>,
    config: BridgeConfig,
    mut shutdown: watch::Receiver<bool>,
) -> Result<SessionEnd, BridgeError> {
    let remote = tokio::select! {
        hello = accept_hello(link, &field, &config) => hello?,
        _ = shutdown.changed() => {
            link.close().await;
            return Ok(SessionEnd::Shutdown);
        }
    };
    let end = run_session(link, &field, &config, &remote, &mut shutdown).await;
    log_end(&remote, &end);
    Ok(end)
}

/// Wait for `Hello` and answer it. Returns the peer's node id.
async fn accept_hello(
    link: &mut dyn PeerLink,
    field: &FieldAggregator,
    config: &BridgeConfig,
) -> Result<String, BridgeError> {
    let first = timeout(config.connect_timeout(), link.recv())
        .await
        .map_err(|_| BridgeError::Timeout("waiting for hello".into()))??;

    let (node_id, protocol_version) = match first {
        Some(BridgeFrame::Hello {
            node_id,
            protocol_version,
            ..
        }) => (node_id, protocol_version),
        Some(other) => {
            return reject(link, format!("expected hello, got {}", other.name())).await;
        }
        None => return Err(BridgeError::Closed),
    };

    if protocol_version != PROTOCOL_VERSION {
        return reject(
            link,
            format!("protocol version {protocol_version} unsupported, expected {PROTOCOL_VERSION}"),
        )
        .await;
    }
    if !is_agent_id(&node_id) || node_id == field.local_node() {
        return reject(link, format!("invalid node id {node_id:?}")).await;
    }

    link.send(&BridgeFrame::Welcome {
        node_id: field.local_node().to_string(),
        protocol_version: PROTOCOL_VERSION,
    })
    .await?;
    field.observe_node(&node_id);
    info!(remote = %node_id, "Inbound peer connected");
    Ok(node_id)
}

async fn reject(link: &mut dyn PeerLink, reason: String) -> Result<String, BridgeError> {
    if let Err(e) = link.send(&BridgeFrame::Reject { reason: reason.clone() }).await {
        debug!(error = %e, "Reject not delivered");
    }
    link.close().await;
    Err(BridgeError::PeerRejected(reason))
}

fn log_end(remote: &str, end: &SessionEnd) {
    match end {
        SessionEnd::Shutdown => debug!(remote, "Inbound session closed"),
        SessionEnd::Failed(e) => info!(remote, error = %e, "Inbound session ended"),
    }
}
