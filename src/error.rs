//! Error types for coherence-node

use thiserror::Error;

/// Why a candidate message was refused.
///
/// Variants are listed in the order the validator checks them; the first
/// failing check wins.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid harmony category: {0}")]
    InvalidCategory(String),

    #[error("Unknown message kind: {0}")]
    UnknownKind(String),

    #[error("Caller tier {actual} is below the {required} tier required for {kind}")]
    InsufficientTier {
        kind: String,
        required: String,
        actual: String,
    },

    #[error("Message content is empty")]
    EmptyContent,

    #[error("Message content is {length} characters, limit is {limit}")]
    ContentTooLong { length: usize, limit: usize },

    #[error("Message content matched a harmful pattern")]
    HarmfulContent,

    #[error("Invalid agent id in {field}: {value:?}")]
    InvalidAgentId { field: &'static str, value: String },

    #[error("Message timestamp {0} is more than a year from now")]
    TimestampOutOfRange(String),
}

impl ValidationError {
    /// Stable short code, useful for callers that map errors onto their own
    /// wire format.
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingField(_) => "missing_field",
            Self::InvalidCategory(_) => "invalid_category",
            Self::UnknownKind(_) => "unknown_kind",
            Self::InsufficientTier { .. } => "insufficient_tier",
            Self::EmptyContent => "empty_content",
            Self::ContentTooLong { .. } => "content_too_long",
            Self::HarmfulContent => "harmful_content",
            Self::InvalidAgentId { .. } => "invalid_agent_id",
            Self::TimestampOutOfRange(_) => "timestamp_out_of_range",
        }
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LeaseError {
    #[error("Role {role} is held by {holder}")]
    RoleAlreadyHeld { role: String, holder: String },

    #[error("{caller} does not hold role {role}")]
    NotHolder { role: String, caller: String },
}

/// Bridge failures. These never reach callers as `Err` values; they are
/// recorded as `last_error` on the connection status.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BridgeError {
    #[error("Connect failed: {0}")]
    ConnectFailed(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Peer rejected connection: {0}")]
    PeerRejected(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Connection closed by peer")]
    Closed,
}

/// Errors from the service facade.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    Lease(#[from] LeaseError),
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("Invalid configuration: {0}")]
    Invalid(String),
}
