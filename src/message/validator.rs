//! Message validation
//!
//! Checks run fail-fast in a fixed order:
//!
//! 1. required fields
//! 2. harmony category
//! 3. kind and caller tier
//! 4. content (empty, length, harmful-content scan)
//! 5. node ids
//! 6. timestamp bounds
//!
//! The harmful-content scan rejects deny-list matches unless the content
//! also matches the transformative-context allow-list. Validation never
//! touches field state.

use chrono::{DateTime, Duration, Utc};
use regex::{Regex, RegexSet, RegexSetBuilder};

use super::catalog::{AccessTier, HarmonyCategory, MessageCatalog, BROADCAST_NODE};
use super::{Message, RawMessage};
use crate::config::{ValidationConfig, MAX_TIMESTAMP_TOLERANCE_DAYS};
use crate::error::{ConfigError, ValidationError};

pub const MAX_CONTENT_CHARS: usize = 5000;

const AGENT_ID_PATTERN: &str = r"^[A-Za-z0-9_-]+$";

const DENY_PATTERNS: &[&str] = &[
    r"\b(kill|kills|killing|killed|murder\w*)\b",
    r"\b(destroy|destroys|destroying|destroyed|attack|attacks|attacking|attacked)\b",
    r"\b(harm|harms|harming|harmed|hurt|hurts|hurting|abuse\w*|violen\w*)\b",
    r"\b(hate|hates|hateful|hatred)\b",
    r"\b(curse|cursed|hex)\b",
    r"\b(manipulat\w*|deceiv\w*|coerc\w*)\b",
];

const ALLOW_PATTERNS: &[&str] = &[
    r"\b(heal\w*|transform\w*|transmut\w*|releas\w*|forgiv\w*|repair\w*|restor\w*)\b",
    r"\b(boundar\w*|compassion\w*|grie\w*|integrat\w*|shadow work)\b",
];

pub struct MessageValidator {
    catalog: MessageCatalog,
    deny: RegexSet,
    allow: RegexSet,
    agent_id: Regex,
    max_content_chars: usize,
    timestamp_tolerance: Duration,
}

impl MessageValidator {
    /// Build a validator from the built-in pattern lists plus any extra
    /// patterns in `config`.
    pub fn new(config: &ValidationConfig) -> Result<Self, ConfigError> {
        let deny = build_set(DENY_PATTERNS, &config.extra_deny_patterns)?;
        let allow = build_set(ALLOW_PATTERNS, &config.extra_allow_patterns)?;
        let agent_id = Regex::new(AGENT_ID_PATTERN)
            .map_err(|e| ConfigError::Invalid(format!("agent id pattern: {e}")))?;
        let timestamp_tolerance = timestamp_tolerance(config.timestamp_tolerance_days)?;

        Ok(Self {
            catalog: MessageCatalog,
            deny,
            allow,
            agent_id,
            max_content_chars: config.max_content_chars.min(MAX_CONTENT_CHARS),
            timestamp_tolerance,
        })
    }

    pub fn catalog(&self) -> &MessageCatalog {
        &self.catalog
    }

    /// Validate `raw` for a caller at `tier`, as of `now`.
    pub fn validate(
        &self,
        raw: &RawMessage,
        tier: AccessTier,
        now: DateTime<Utc>,
    ) -> Result<Message, ValidationError> {
        // 1. required fields
        let from_node = required(&raw.from_node, "fromNode")?;
        let to_node = required(&raw.to_node, "toNode")?;
        let kind = required(&raw.kind, "kind")?;
        let category = required(&raw.harmony_category, "harmonyCategory")?;
        let content = required(&raw.content, "content")?;
        let created_at = raw.created_at.ok_or(ValidationError::MissingField("createdAt"))?;

        // 2. category
        let category: HarmonyCategory = category
            .parse()
            .map_err(|_| ValidationError::InvalidCategory(category.to_string()))?;

        // 3. kind and tier
        let spec = self
            .catalog
            .lookup(kind)
            .ok_or_else(|| ValidationError::UnknownKind(kind.to_string()))?;
        if tier < spec.min_tier {
            return Err(ValidationError::InsufficientTier {
                kind: spec.kind.to_string(),
                required: spec.min_tier.to_string(),
                actual: tier.to_string(),
            });
        }

        // 4. content
        self.check_content(content)?;

        // 5. node ids
        if !self.agent_id.is_match(from_node) {
            return Err(ValidationError::InvalidAgentId {
                field: "fromNode",
                value: from_node.to_string(),
            });
        }
        if to_node != BROADCAST_NODE && !self.agent_id.is_match(to_node) {
            return Err(ValidationError::InvalidAgentId {
                field: "toNode",
                value: to_node.to_string(),
            });
        }

        // 6. timestamp
        if (created_at - now).abs() > self.timestamp_tolerance {
            return Err(ValidationError::TimestampOutOfRange(created_at.to_rfc3339()));
        }

        Ok(Message::from_parts(
            spec,
            from_node.to_string(),
            to_node.to_string(),
            category,
            content.to_string(),
            created_at,
        ))
    }

    fn check_content(&self, content: &str) -> Result<(), ValidationError> {
        if content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }

        let length = content.chars().count();
        if length > self.max_content_chars {
            return Err(ValidationError::ContentTooLong {
                length,
                limit: self.max_content_chars,
            });
        }

        if self.is_harmful(content) {
            return Err(ValidationError::HarmfulContent);
        }

        Ok(())
    }

    /// Deny-list match not excused by a transformative context.
    pub fn is_harmful(&self, content: &str) -> bool {
        self.deny.is_match(content) && !self.allow.is_match(content)
    }
}

fn required<'a>(
    field: &'a Option<String>,
    name: &'static str,
) -> Result<&'a str, ValidationError> {
    field.as_deref().ok_or(ValidationError::MissingField(name))
}

fn timestamp_tolerance(days: i64) -> Result<Duration, ConfigError> {
    if !(1..=MAX_TIMESTAMP_TOLERANCE_DAYS).contains(&days) {
        return Err(ConfigError::Invalid(format!(
            "timestamp tolerance of {days} days is out of range"
        )));
    }
    Duration::try_days(days)
        .ok_or_else(|| ConfigError::Invalid(format!("timestamp tolerance of {days} days overflows")))
}

fn build_set(builtin: &[&str], extra: &[String]) -> Result<RegexSet, ConfigError> {
    let patterns = builtin
        .iter()
        .map(|p| p.to_string())
        .chain(extra.iter().cloned());

    RegexSetBuilder::new(patterns)
        .case_insensitive(true)
        .build()
        .map_err(|e| ConfigError::Invalid(format!("content pattern: {e}")))
}
