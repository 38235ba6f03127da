//! Bridge wire protocol
//!
//! JSON text frames, internally tagged by `type`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::BridgeError;
use crate::field::FieldState;

pub const PROTOCOL_VERSION: u32 = 1;

/// Frames exchanged between bridged nodes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BridgeFrame {
    /// Opening frame from the dialling side
    Hello {
        node_id: String,
        protocol_version: u32,
        /// Whether the sender wants the peer's snapshots pushed to it
        subscribe: bool,
    },

    /// Handshake accepted
    Welcome {
        node_id: String,
        protocol_version: u32,
    },

    /// Handshake refused
    Reject { reason: String },

    /// Full field state of the sender
    Snapshot { node_id: String, state: FieldState },

    Heartbeat {
        node_id: String,
        active_node_count: u32,
        sent_at: DateTime<Utc>,
    },

    /// Sender is leaving
    Goodbye { node_id: String },
}

impl BridgeFrame {
    pub fn encode(&self) -> Result<String, BridgeError> {
        serde_json::to_string(self).map_err(|e| BridgeError::Protocol(e.to_string()))
    }

    pub fn decode(text: &str) -> Result<Self, BridgeError> {
        serde_json::from_str(text).map_err(|e| BridgeError::Protocol(e.to_string()))
    }

    pub fn name(&self) -> &'static str {
        match self {
            Self::Hello { .. } => "hello",
            Self::Welcome { .. } => "welcome",
            Self::Reject { .. } => "reject",
            Self::Snapshot { .. } => "snapshot",
            Self::Heartbeat { .. } => "heartbeat",
            Self::Goodbye { .. } => "goodbye",
        }
    }
}
