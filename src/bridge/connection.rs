//! Connection state and the post-handshake session loop
//!
//! Both the dialling bridge and the listener run [`run_session`] once a
//! handshake has completed: push snapshots on the sync interval, send
//! heartbeats, merge whatever the peer sends, and give up after a period
//! of silence.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{interval_at, sleep, Instant, MissedTickBehavior};
use tracing::{debug, warn};

use super::protocol::BridgeFrame;
use super::transport::PeerLink;
use crate::config::BridgeConfig;
use crate::error::BridgeError;
use crate::field::FieldAggregator;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Backoff,
}

/// Observable status of one bridge.
#[derive(Debug, Clone, PartialEq)]
pub struct LinkStatus {
    pub state: ConnectionState,
    pub peer_url: String,
    /// Which of the primary or fallback URLs is live
    pub connected_url: Option<String>,
    /// Node id announced by the peer
    pub remote_node: Option<String>,
    /// Consecutive failed attempts; reset only on reaching `Connected`
    pub reconnect_attempt: u32,
    pub last_error: Option<BridgeError>,
}

impl LinkStatus {
    pub fn new(peer_url: impl Into<String>) -> Self {
        Self {
            state: ConnectionState::Disconnected,
            peer_url: peer_url.into(),
            connected_url: None,
            remote_node: None,
            reconnect_attempt: 0,
            last_error: None,
        }
    }
}

/// Why a session ended.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEnd {
    /// Local shutdown was requested; a goodbye was sent.
    Shutdown,
    Failed(BridgeError),
}

/// Drive an established link until it fails or `shutdown` fires.
pub async fn run_session(
    link: &mut dyn PeerLink,
    field: &Arc<FieldAggregator>,
    config: &BridgeConfig,
    remote_node: &str,
    shutdown: &mut watch::Receiver<bool>,
) -> SessionEnd {
    let local_node = field.local_node().to_string();
    let window = config.reconcile_window();
    let peer_timeout = config.peer_timeout();

    if let Err(e) = link.send(&snapshot_frame(field)).await {
        return SessionEnd::Failed(e);
    }

    let mut sync = interval_at(Instant::now() + config.sync_interval(), config.sync_interval());
    sync.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let mut heartbeat = interval_at(
        Instant::now() + config.heartbeat_interval(),
        config.heartbeat_interval(),
    );
    heartbeat.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let silence = sleep(peer_timeout);
    tokio::pin!(silence);

    loop {
        if *shutdown.borrow() {
            return depart(link, &local_node).await;
        }

        tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    return depart(link, &local_node).await;
                }
            }
            _ = sync.tick() => {
                if let Err(e) = link.send(&snapshot_frame(field)).await {
                    return SessionEnd::Failed(e);
                }
            }
            _ = heartbeat.tick() => {
                let frame = BridgeFrame::Heartbeat {
                    node_id: local_node.clone(),
                    active_node_count: field.snapshot().active_node_count,
                    sent_at: field.now(),
                };
                if let Err(e) = link.send(&frame).await {
                    return SessionEnd::Failed(e);
                }
            }
            _ = &mut silence => {
                warn!(peer = remote_node, "Peer silent, dropping link");
                link.close().await;
                return SessionEnd::Failed(BridgeError::Timeout(format!(
                    "no traffic from {remote_node} for {}ms",
                    peer_timeout.as_millis()
                )));
            }
            received = link.recv() => match received {
                Ok(Some(frame)) => {
                    silence.as_mut().reset(Instant::now() + peer_timeout);
                    if let Some(end) = handle_frame(field, frame, remote_node, window) {
                        return end;
                    }
                }
                Ok(None) => return SessionEnd::Failed(BridgeError::Closed),
                Err(e) => return SessionEnd::Failed(e),
            },
        }
    }
}

fn handle_frame(
    field: &FieldAggregator,
    frame: BridgeFrame,
    remote_node: &str,
    window: chrono::Duration,
) -> Option<SessionEnd> {
    match frame {
        BridgeFrame::Snapshot { node_id, state } => {
            field.merge_remote(&state, &node_id, window);
            None
        }
        BridgeFrame::Heartbeat { node_id, .. } => {
            field.observe_node(&node_id);
            None
        }
        BridgeFrame::Goodbye { node_id } => {
            debug!(peer = %node_id, "Peer said goodbye");
            Some(SessionEnd::Failed(BridgeError::Closed))
        }
        other => {
            debug!(peer = remote_node, frame = other.name(), "Ignoring frame mid-session");
            None
        }
    }
}

fn snapshot_frame(field: &FieldAggregator) -> BridgeFrame {
    BridgeFrame::Snapshot {
        node_id: field.local_node().to_string(),
        state: field.snapshot(),
    }
}

async fn depart(link: &mut dyn PeerLink, local_node: &str) -> SessionEnd {
    let goodbye = BridgeFrame::Goodbye {
        node_id: local_node.to_string(),
    };
    if let Err(e) = link.send(&goodbye).await {
        debug!(error = %e, "Goodbye not delivered");
    }
    link.close().await;
    SessionEnd::Shutdown
}
