//! Node configuration

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::info;

use crate::error::ConfigError;

/// Upper bound for `validation.timestamp_tolerance_days` (about 1000 years).
pub const MAX_TIMESTAMP_TOLERANCE_DAYS: i64 = 365_000;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub node: NodeConfig,
    #[serde(default)]
    pub field: FieldConfig,
    #[serde(default)]
    pub scoring: ScoringConfig,
    #[serde(default)]
    pub lease: LeaseConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub listener: ListenerConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
}

impl Config {
    /// Load from a TOML file. A missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            info!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml_str(&content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !is_agent_id(&self.node.id) {
            return Err(ConfigError::Invalid(format!("node.id {:?} is not a valid agent id", self.node.id)));
        }
        if !(self.field.scale_factor.is_finite() && self.field.scale_factor > 0.0) {
            return Err(ConfigError::Invalid("field.scale_factor must be positive".into()));
        }
        if self.field.half_life_ms == 0 {
            return Err(ConfigError::Invalid("field.half_life_ms must be positive".into()));
        }
        if self.lease.lease_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("lease.lease_timeout_seconds must be positive".into()));
        }
        if self.bridge.heartbeat_interval_ms == 0 || self.bridge.sync_interval_ms == 0 {
            return Err(ConfigError::Invalid("bridge intervals must be positive".into()));
        }
        if self.validation.timestamp_tolerance_days <= 0
            || self.validation.timestamp_tolerance_days > MAX_TIMESTAMP_TOLERANCE_DAYS
        {
            return Err(ConfigError::Invalid(format!(
                "validation.timestamp_tolerance_days must be in 1..={MAX_TIMESTAMP_TOLERANCE_DAYS}"
            )));
        }
        if self.bridge.bridge_base_delay_ms > self.bridge.bridge_max_delay_ms {
            return Err(ConfigError::Invalid(
                "bridge.bridge_base_delay_ms exceeds bridge.bridge_max_delay_ms".into(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Unique node identifier, also used as `fromNode` on the wire
    #[serde(default = "default_node_id")]
    pub id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            id: default_node_id(),
        }
    }
}

/// Aggregator tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldConfig {
    /// Coherence a fresh node starts at
    #[serde(default = "default_initial_coherence", alias = "initialCoherence")]
    pub initial_coherence: f64,

    /// Multiplier from catalog impact (0-100) to coherence points
    #[serde(default = "default_scale_factor", alias = "scaleFactor")]
    pub scale_factor: f64,

    /// Decay half-life
    #[serde(
        default = "default_half_life_ms",
        alias = "halfLifeMs",
        alias = "haflLifeMs"
    )]
    pub half_life_ms: u64,

    /// Level coherence decays toward
    #[serde(default, alias = "decayBaseline")]
    pub decay_baseline: f64,

    /// Decay/fluctuation ticker period in the daemon
    #[serde(default = "default_tick_interval_ms", alias = "tickIntervalMs")]
    pub tick_interval_ms: u64,

    #[serde(default = "default_fluctuation_amplitude", alias = "fluctuationAmplitude")]
    pub fluctuation_amplitude: f64,

    #[serde(default = "default_fluctuation_period_ms", alias = "fluctuationPeriodMs")]
    pub fluctuation_period_ms: u64,

    /// Uniform noise bound added to each fluctuation
    #[serde(default = "default_noise_amplitude", alias = "noiseAmplitude")]
    pub noise_amplitude: f64,

    /// How long a node counts as active after it was last heard from
    #[serde(default = "default_node_ttl_secs", alias = "nodeTtlSecs")]
    pub node_ttl_secs: u64,
}

impl FieldConfig {
    pub fn half_life(&self) -> Duration {
        Duration::from_millis(self.half_life_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms.max(1))
    }
}

impl Default for FieldConfig {
    fn default() -> Self {
        Self {
            initial_coherence: default_initial_coherence(),
            scale_factor: default_scale_factor(),
            half_life_ms: default_half_life_ms(),
            decay_baseline: 0.0,
            tick_interval_ms: default_tick_interval_ms(),
            fluctuation_amplitude: default_fluctuation_amplitude(),
            fluctuation_period_ms: default_fluctuation_period_ms(),
            noise_amplitude: default_noise_amplitude(),
            node_ttl_secs: default_node_ttl_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoringConfig {
    #[serde(default = "default_contribution_scale", alias = "contributionScale")]
    pub contribution_scale: f64,

    /// Logistic steepness `k` of the emergence curve
    #[serde(default = "default_emergence_steepness", alias = "emergenceSteepness")]
    pub emergence_steepness: f64,

    #[serde(default = "default_emergence_midpoint", alias = "emergenceMidpoint")]
    pub emergence_midpoint: f64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            contribution_scale: default_contribution_scale(),
            emergence_steepness: default_emergence_steepness(),
            emergence_midpoint: default_emergence_midpoint(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LeaseConfig {
    /// A lease with no heartbeat for longer than this is stale
    #[serde(default = "default_lease_timeout", alias = "leaseTimeoutSeconds")]
    pub lease_timeout_seconds: u64,

    /// Stale-lease sweep period in the daemon, 0 disables
    #[serde(default = "default_sweep_interval", alias = "sweepIntervalSecs")]
    pub sweep_interval_secs: u64,

    /// Role a sender must hold to submit privileged kinds
    #[serde(default, alias = "privilegedRole")]
    pub privileged_role: Option<String>,
}

impl LeaseConfig {
    pub fn lease_timeout(&self) -> Duration {
        Duration::from_secs(self.lease_timeout_seconds)
    }
}

impl Default for LeaseConfig {
    fn default() -> Self {
        Self {
            lease_timeout_seconds: default_lease_timeout(),
            sweep_interval_secs: default_sweep_interval(),
            privileged_role: None,
        }
    }
}

/// Peer bridge settings, shared by outbound bridges and the listener.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Peers dialled at startup
    #[serde(default)]
    pub peers: Vec<String>,

    /// Tried in order after the primary URL on every attempt
    #[serde(default, alias = "fallbackUrls")]
    pub fallback_urls: Vec<String>,

    #[serde(default = "default_base_delay_ms", alias = "bridgeBaseDelayMs")]
    pub bridge_base_delay_ms: u64,

    #[serde(default = "default_max_delay_ms", alias = "bridgeMaxDelayMs")]
    pub bridge_max_delay_ms: u64,

    #[serde(default = "default_heartbeat_interval_ms", alias = "heartbeatIntervalMs")]
    pub heartbeat_interval_ms: u64,

    /// Silence after which a peer is dropped; defaults to 3 heartbeats
    #[serde(default, alias = "peerTimeoutMs")]
    pub peer_timeout_ms: Option<u64>,

    #[serde(default = "default_connect_timeout_ms", alias = "connectTimeoutMs")]
    pub connect_timeout_ms: u64,

    /// Consecutive failed attempts before giving up, 0 = never
    #[serde(default = "default_max_reconnect_attempts", alias = "maxReconnectAttempts")]
    pub max_reconnect_attempts: u32,

    /// Snapshot push period while connected
    #[serde(default = "default_sync_interval", alias = "syncIntervalMs")]
    pub sync_interval_ms: u64,

    /// Snapshots closer together than this merge harmonics instead of replacing
    #[serde(default = "default_reconcile_window_ms", alias = "reconcileWindowMs")]
    pub reconcile_window_ms: u64,
}

impl BridgeConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.bridge_base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.bridge_max_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_millis(self.heartbeat_interval_ms.max(1))
    }

    pub fn peer_timeout(&self) -> Duration {
        Duration::from_millis(
            self.peer_timeout_ms
                .unwrap_or(self.heartbeat_interval_ms.saturating_mul(3)),
        )
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms.max(1))
    }

    pub fn reconcile_window(&self) -> chrono::Duration {
        chrono::Duration::milliseconds(self.reconcile_window_ms as i64)
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            peers: vec![],
            fallback_urls: vec![],
            bridge_base_delay_ms: default_base_delay_ms(),
            bridge_max_delay_ms: default_max_delay_ms(),
            heartbeat_interval_ms: default_heartbeat_interval_ms(),
            peer_timeout_ms: None,
            connect_timeout_ms: default_connect_timeout_ms(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            sync_interval_ms: default_sync_interval(),
            reconcile_window_ms: default_reconcile_window_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListenerConfig {
    /// Accept inbound bridges
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_bind_addr", alias = "bindAddr")]
    pub bind_addr: String,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            bind_addr: default_bind_addr(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationConfig {
    /// Added to the built-in harmful-content patterns
    #[serde(default, alias = "extraDenyPatterns")]
    pub extra_deny_patterns: Vec<String>,

    /// Added to the built-in transformative-context patterns
    #[serde(default, alias = "extraAllowPatterns")]
    pub extra_allow_patterns: Vec<String>,

    /// Capped at 5000 regardless of this setting
    #[serde(default = "default_max_content_chars", alias = "maxContentChars")]
    pub max_content_chars: usize,

    #[serde(default = "default_timestamp_tolerance_days", alias = "timestampToleranceDays")]
    pub timestamp_tolerance_days: i64,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            extra_deny_patterns: vec![],
            extra_allow_patterns: vec![],
            max_content_chars: default_max_content_chars(),
            timestamp_tolerance_days: default_timestamp_tolerance_days(),
        }
    }
}

/// Host name reduced to the agent-id alphabet.
pub fn default_node_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_default();
    let id = sanitize_node_id(&host);
    if id.is_empty() {
        "node-1".to_string()
    } else {
        id
    }
}

pub fn sanitize_node_id(raw: &str) -> String {
    raw.trim()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '-' })
        .collect()
}

pub(crate) fn is_agent_id(id: &str) -> bool {
    !id.is_empty() && id.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

// Defaults
fn default_initial_coherence() -> f64 { 75.0 }
fn default_scale_factor() -> f64 { 0.05 }
fn default_half_life_ms() -> u64 { 60 * 60 * 1000 } // 1h
fn default_tick_interval_ms() -> u64 { 1000 }
fn default_fluctuation_amplitude() -> f64 { 0.5 }
fn default_fluctuation_period_ms() -> u64 { 60_000 }
fn default_noise_amplitude() -> f64 { 0.1 }
fn default_node_ttl_secs() -> u64 { 300 }
fn default_contribution_scale() -> f64 { 1.0 }
fn default_emergence_steepness() -> f64 { 0.1 }
fn default_emergence_midpoint() -> f64 { 50.0 }
fn default_lease_timeout() -> u64 { 120 }
fn default_sweep_interval() -> u64 { 30 }
fn default_base_delay_ms() -> u64 { 5000 }
fn default_max_delay_ms() -> u64 { 60_000 }
fn default_heartbeat_interval_ms() -> u64 { 30_000 }
fn default_connect_timeout_ms() -> u64 { 5000 }
fn default_max_reconnect_attempts() -> u32 { 10 }
fn default_sync_interval() -> u64 { 1000 }
fn default_reconcile_window_ms() -> u64 { 5000 }
fn default_bind_addr() -> String { "0.0.0.0:7070".to_string() }
fn default_max_content_chars() -> usize { 5000 }
fn default_timestamp_tolerance_days() -> i64 { 365 }
