//! Bridge transport
//!
//! [`Connector`] opens links, [`PeerLink`] moves frames. The bridge and the
//! listener only speak in [`BridgeFrame`]s, so WebSocket details stay here.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::protocol::Message as WsMessage;
use tokio_tungstenite::{connect_async, WebSocketStream};
use tracing::debug;

use super::protocol::BridgeFrame;
use crate::error::BridgeError;

/// One open connection to a peer.
#[async_trait]
pub trait PeerLink: Send {
    async fn send(&mut self, frame: &BridgeFrame) -> Result<(), BridgeError>;

    /// Next frame, or `None` once the peer has closed. Cancel-safe.
    async fn recv(&mut self) -> Result<Option<BridgeFrame>, BridgeError>;

    async fn close(&mut self);
}

#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, url: &str) -> Result<Box<dyn PeerLink>, BridgeError>;
}

/// WebSocket link over any byte stream.
pub struct WsLink<S> {
    ws: WebSocketStream<S>,
}

impl<S> WsLink<S> {
    pub fn new(ws: WebSocketStream<S>) -> Self {
        Self { ws }
    }
}

#[async_trait]
impl<S> PeerLink for WsLink<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    async fn send(&mut self, frame: &BridgeFrame) -> Result<(), BridgeError> {
        let text = frame.encode()?;
        self.ws
            .send(WsMessage::Text(text))
            .await
            .map_err(|e| BridgeError::ConnectFailed(format!("send failed: {e}")))
    }

    async fn recv(&mut self) -> Result<Option<BridgeFrame>, BridgeError> {
        loop {
            match self.ws.next().await {
                Some(Ok(WsMessage::Text(text))) => return BridgeFrame::decode(&text).map(Some),
                Some(Ok(WsMessage::Binary(data))) => {
                    let text = String::from_utf8(data)
                        .map_err(|e| BridgeError::Protocol(format!("binary frame: {e}")))?;
                    return BridgeFrame::decode(&text).map(Some);
                }
                Some(Ok(WsMessage::Close(_))) => return Ok(None),
                // ping/pong handled by tungstenite
                Some(Ok(_)) => continue,
                Some(Err(e)) => {
                    return Err(BridgeError::ConnectFailed(format!("websocket error: {e}")))
                }
                None => return Ok(None),
            }
        }
    }

    async fn close(&mut self) {
        if let Err(e) = self.ws.close(None).await {
            debug!(error = %e, "WebSocket close failed");
        }
    }
}

/// Dials `ws://` and `wss://` URLs.
#[derive(Debug, Default, Clone, Copy)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PeerLink>, BridgeError> {
        debug!(url = %url, "Connecting to peer");
        let (ws, _) = connect_async(url)
            .await
            .map_err(|e| BridgeError::ConnectFailed(format!("{url}: {e}")))?;
        Ok(Box::new(WsLink::new(ws)))
    }
}

/// In-process link built on unbounded channels.
pub struct MemoryLink {
    tx: Option<mpsc::UnboundedSender<BridgeFrame>>,
    rx: mpsc::UnboundedReceiver<BridgeFrame>,
}

impl MemoryLink {
    /// Two connected ends.
    pub fn pair() -> (MemoryLink, MemoryLink) {
        let (a_tx, a_rx) = mpsc::unbounded_channel();
        let (b_tx, b_rx) = mpsc::unbounded_channel();
        (
            MemoryLink { tx: Some(a_tx), rx: b_rx },
            MemoryLink { tx: Some(b_tx), rx: a_rx },
        )
    }
}

#[async_trait]
impl PeerLink for MemoryLink {
    async fn send(&mut self, frame: &BridgeFrame) -> Result<(), BridgeError> {
        match &self.tx {
            Some(tx) => tx.send(frame.clone()).map_err(|_| BridgeError::Closed),
            None => Err(BridgeError::Closed),
        }
    }

    async fn recv(&mut self) -> Result<Option<BridgeFrame>, BridgeError> {
        Ok(self.rx.recv().await)
    }

    async fn close(&mut self) {
        self.tx = None;
    }
}

/// How a [`MemoryConnector`] answers a dial.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reachability {
    Accept,
    Refuse,
    /// Never completes; exercises the connect timeout.
    Hang,
}

/// Connector for in-process peers.
///
/// Every accepted dial hands the far end of a [`MemoryLink`] pair to the
/// receiver returned by [`MemoryConnector::new`].
pub struct MemoryConnector {
    incoming: mpsc::UnboundedSender<(String, MemoryLink)>,
    reachability: Mutex<HashMap<String, Reachability>>,
    dials: AtomicUsize,
}

impl MemoryConnector {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, MemoryLink)>) {
        let (incoming, rx) = mpsc::unbounded_channel();
        let connector = Self {
            incoming,
            reachability: Mutex::new(HashMap::new()),
            dials: AtomicUsize::new(0),
        };
        (connector, rx)
    }

    /// Unlisted URLs accept.
    pub fn set_reachability(&self, url: &str, reachability: Reachability) {
        self.reachability
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert(url.to_string(), reachability);
    }

    /// Total dial attempts so far.
    pub fn dials(&self) -> usize {
        self.dials.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Box<dyn PeerLink>, BridgeError> {
        self.dials.fetch_add(1, Ordering::SeqCst);
        let reachability = self
            .reachability
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(url)
            .copied()
            .unwrap_or(Reachability::Accept);

        match reachability {
            Reachability::Accept => {
                let (local, remote) = MemoryLink::pair();
                self.incoming
                    .send((url.to_string(), remote))
                    .map_err(|_| BridgeError::ConnectFailed(format!("{url}: nobody listening")))?;
                Ok(Box::new(local))
            }
            Reachability::Refuse => Err(BridgeError::ConnectFailed(format!("{url}: refused"))),
            Reachability::Hang => std::future::pending().await,
        }
    }
}
