//! Peer sync bridge
//!
//! One bridge task per remote peer keeps a link open, pushes the
//! local field snapshot and reconciles what the peer sends back. Failures
//! never reach the caller; they show up as state transitions on the
//! [`LinkStatus`] watch channel.
//!
//! ```text
//! Disconnected -> Connecting -> Connected -> (drop) Backoff -> Connecting -> ...
//! ```
//!
//! Once `max_reconnect_attempts` consecutive attempts have failed the
//! bridge stops in `Disconnected` and the node carries on local-only.

pub mod backoff;
pub mod connection;
pub mod listener;
pub mod protocol;
pub mod transport;

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

pub use crate::config::BridgeConfig;
pub use backoff::backoff_delay;
pub use connection::{ConnectionState, LinkStatus, SessionEnd};
pub use listener::PeerListener;
pub use protocol::{BridgeFrame, PROTOCOL_VERSION};
pub use transport::{Connector, MemoryConnector, MemoryLink, PeerLink, Reachability, WsConnector};

use crate::error::BridgeError;
use crate::field::FieldAggregator;

/// Handle to a running bridge task.
pub struct BridgeHandle {
    status: watch::Receiver<LinkStatus>,
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl BridgeHandle {
    pub fn status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// Receiver that observes every status transition.
    pub fn subscribe(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Stop reconnecting, say goodbye if connected, and wait for the task.
    pub async fn close(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!(error = %e, "Bridge task ended abnormally");
        }
    }

    /// Whether the bridge task has stopped on its own.
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

/// Start a bridge to `peer_url` on the current runtime.
pub fn start_bridge(
    peer_url: &str,
    config: BridgeConfig,
    field: Arc<FieldAggregator>,
    connector: Arc<dyn Connector>,
) -> BridgeHandle {
    let (status_tx, status_rx) = watch::channel(LinkStatus::new(peer_url));
    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let bridge = SyncBridge {
        peer_url: peer_url.to_string(),
        config,
        field,
        connector,
        status: status_tx,
        shutdown: shutdown_rx,
    };
    let task = tokio::spawn(bridge.run());

    BridgeHandle {
        status: status_rx,
        shutdown: shutdown_tx,
        task,
    }
}

struct SyncBridge {
    peer_url: String,
    config: BridgeConfig,
    field: Arc<FieldAggregator>,
    connector: Arc<dyn Connector>,
    status: watch::Sender<LinkStatus>,
    shutdown: watch::Receiver<bool>,
}

enum Attempt {
    Ended(SessionEnd),
    Failed(BridgeError),
    Cancelled,
}

impl SyncBridge {
    async fn run(mut self) {
        info!(peer = %self.peer_url, "Bridge started");
        let mut attempt: u32 = 0;

        loop {
            if self.shutdown_requested() {
                break;
            }

            self.update(|s| {
                s.state = ConnectionState::Connecting;
                s.connected_url = None;
                s.remote_node = None;
            });

            let error = match self.attempt().await {
                Attempt::Ended(SessionEnd::Shutdown) | Attempt::Cancelled => break,
                Attempt::Ended(SessionEnd::Failed(e)) => {
                    // the session reached Connected, so counting restarts
                    attempt = 0;
                    e
                }
                Attempt::Failed(e) => e,
            };

            attempt = attempt.saturating_add(1);
            let max = self.config.max_reconnect_attempts;
            if max > 0 && attempt >= max {
                warn!(
                    peer = %self.peer_url,
                    attempts = attempt,
                    error = %error,
                    "Giving up on peer, continuing local-only"
                );
                self.update(|s| {
                    s.state = ConnectionState::Disconnected;
                    s.connected_url = None;
                    s.reconnect_attempt = attempt;
                    s.last_error = Some(error);
                });
                return;
            }

            let delay = backoff_delay(
                attempt - 1,
                self.config.base_delay(),
                self.config.max_delay(),
            );
            warn!(
                peer = %self.peer_url,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "Bridge link down, backing off"
            );
            self.update(|s| {
                s.state = ConnectionState::Backoff;
                s.connected_url = None;
                s.reconnect_attempt = attempt;
                s.last_error = Some(error);
            });

            tokio::select! {
                _ = sleep(delay) => {}
                _ = self.shutdown.changed() => {}
            }
        }

        self.update(|s| {
            s.state = ConnectionState::Disconnected;
            s.connected_url = None;
        });
        info!(peer = %self.peer_url, "Bridge stopped");
    }

    /// One connect, handshake and session cycle.
    async fn attempt(&self) -> Attempt {
        let mut shutdown = self.shutdown.clone();
        let connected = tokio::select! {
            result = self.connect_any() => result,
            _ = shutdown.changed() => return Attempt::Cancelled,
        };
        let (mut link, url) = match connected {
            Ok(pair) => pair,
            Err(e) => return Attempt::Failed(e),
        };

        let remote_node = tokio::select! {
            result = self.handshake(link.as_mut()) => match result {
                Ok(node) => node,
                Err(e) => {
                    link.close().await;
                    return Attempt::Failed(e);
                }
            },
            _ = shutdown.changed() => {
                link.close().await;
                return Attempt::Cancelled;
            }
        };

        info!(peer = %self.peer_url, url = %url, remote = %remote_node, "Bridge connected");
        self.update(|s| {
            s.state = ConnectionState::Connected;
            s.connected_url = Some(url.clone());
            s.remote_node = Some(remote_node.clone());
            s.reconnect_attempt = 0;
        });
        self.field.observe_node(&remote_node);

        let end = connection::run_session(
            link.as_mut(),
            &self.field,
            &self.config,
            &remote_node,
            &mut shutdown,
        )
        .await;
        debug!(peer = %self.peer_url, ?end, "Bridge session ended");
        Attempt::Ended(end)
    }

    /// Try the primary URL, then each fallback, each under the connect timeout.
    async fn connect_any(&self) -> Result<(Box<dyn PeerLink>, String), BridgeError> {
        let mut last_error = BridgeError::ConnectFailed(format!("{}: no attempt made", self.peer_url));
        let urls = std::iter::once(&self.peer_url).chain(self.config.fallback_urls.iter());

        for url in urls {
            match timeout(self.config.connect_timeout(), self.connector.connect(url)).await {
                Ok(Ok(link)) => return Ok((link, url.clone())),
                Ok(Err(e)) => {
                    debug!(url = %url, error = %e, "Connect failed");
                    last_error = e;
                }
                Err(_) => {
                    debug!(url = %url, "Connect timed out");
                    last_error = BridgeError::Timeout(format!("connect to {url}"));
                }
            }
        }
        Err(last_error)
    }

    /// Send `Hello` and wait for `Welcome` or `Reject`.
    async fn handshake(&self, link: &mut dyn PeerLink) -> Result<String, BridgeError> {
        let hello = BridgeFrame::Hello {
            node_id: self.field.local_node().to_string(),
            protocol_version: PROTOCOL_VERSION,
            subscribe: true,
        };

        timeout(self.config.connect_timeout(), exchange_hello(link, &hello))
            .await
            .map_err(|_| BridgeError::Timeout(format!("handshake with {}", self.peer_url)))?
    }

    fn shutdown_requested(&self) -> bool {
        *self.shutdown.borrow()
    }

    fn update(&self, f: impl FnOnce(&mut LinkStatus)) {
        self.status.send_modify(f);
    }
}

async fn exchange_hello(link: &mut dyn PeerLink, hello: &BridgeFrame) -> Result<String, BridgeError> {
    link.send(hello).await?;
    match link.recv().await? {
        Some(BridgeFrame::Welcome { node_id, .. }) => Ok(node_id),
        Some(BridgeFrame::Reject { reason }) => Err(BridgeError::PeerRejected(reason)),
        Some(other) => Err(BridgeError::Protocol(format!(
            "expected welcome, got {}",
            other.name()
        ))),
        None => Err(BridgeError::Closed),
    }
}
