//! Field messages
//!
//! Callers hand in a [`RawMessage`]; the [`MessageValidator`] is the only way
//! to turn one into a [`Message`], and only a `Message` can be applied to the
//! field aggregator.

pub mod catalog;
pub mod validator;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use catalog::{
    AccessTier, HarmonyCategory, KindSpec, MessageCatalog, MessageKind, ResonanceClass,
    BROADCAST_NODE,
};
pub use validator::MessageValidator;

/// An unvalidated message as received from a caller.
///
/// Every field is optional so that absence can be reported as
/// `MissingField`. Unknown JSON keys, including any caller-supplied impact,
/// are ignored.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawMessage {
    #[serde(default)]
    pub from_node: Option<String>,
    #[serde(default)]
    pub to_node: Option<String>,
    #[serde(default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub harmony_category: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub created_at: Option<DateTime<Utc>>,
}

impl RawMessage {
    pub fn new(
        from_node: impl Into<String>,
        to_node: impl Into<String>,
        kind: impl Into<String>,
        harmony_category: impl Into<String>,
        content: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            from_node: Some(from_node.into()),
            to_node: Some(to_node.into()),
            kind: Some(kind.into()),
            harmony_category: Some(harmony_category.into()),
            content: Some(content.into()),
            created_at: Some(created_at),
        }
    }
}

/// A validated, immutable field message.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: Uuid,
    from_node: String,
    to_node: String,
    kind: MessageKind,
    harmony_category: HarmonyCategory,
    impact_weight: u8,
    resonance: ResonanceClass,
    content: String,
    created_at: DateTime<Utc>,
}

impl Message {
    pub(crate) fn from_parts(
        spec: &KindSpec,
        from_node: String,
        to_node: String,
        harmony_category: HarmonyCategory,
        content: String,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            from_node,
            to_node,
            kind: spec.kind,
            harmony_category,
            impact_weight: spec.impact_weight,
            resonance: spec.resonance,
            content,
            created_at,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn from_node(&self) -> &str {
        &self.from_node
    }

    pub fn to_node(&self) -> &str {
        &self.to_node
    }

    pub fn is_broadcast(&self) -> bool {
        self.to_node == BROADCAST_NODE
    }

    pub fn kind(&self) -> MessageKind {
        self.kind
    }

    pub fn harmony_category(&self) -> HarmonyCategory {
        self.harmony_category
    }

    /// Catalog impact, 0-100.
    pub fn impact_weight(&self) -> u8 {
        self.impact_weight
    }

    pub fn resonance(&self) -> ResonanceClass {
        self.resonance
    }

    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}
