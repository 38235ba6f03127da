//! Field service
//!
//! The public face of a node: validation, field updates, role leases and
//! peer bridges behind one shared handle.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::bridge::{self, BridgeConfig, BridgeHandle, Connector, WsConnector};
use crate::clock::{Clock, SystemClock};
use crate::config::Config;
use crate::error::{ConfigError, LeaseError, ServiceError, ValidationError};
use crate::field::{FieldAggregator, FieldEvent, FieldState, NoiseSource, RandomNoise};
use crate::lease::{LeaseManager, LeaseStatus};
use crate::message::{AccessTier, Message, MessageValidator, RawMessage};

pub struct FieldService {
    clock: Arc<dyn Clock>,
    validator: MessageValidator,
    field: Arc<FieldAggregator>,
    leases: LeaseManager,
    privileged_role: Option<String>,
    connector: Arc<dyn Connector>,
    /// Serializes validate-then-apply so each sender's messages land in
    /// the order they were validated.
    submit_lock: Mutex<()>,
}

impl FieldService {
    /// Service on the system clock, random fluctuation noise and WebSocket
    /// bridges.
    pub fn new(config: &Config) -> Result<Self, ConfigError> {
        Self::with_parts(
            config,
            Arc::new(SystemClock),
            Arc::new(RandomNoise),
            Arc::new(WsConnector),
        )
    }

    pub fn with_parts(
        config: &Config,
        clock: Arc<dyn Clock>,
        noise: Arc<dyn NoiseSource>,
        connector: Arc<dyn Connector>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        let validator = MessageValidator::new(&config.validation)?;
        let field = Arc::new(FieldAggregator::new(
            config.node.id.clone(),
            config.field.clone(),
            config.scoring.clone(),
            clock.clone(),
            noise,
        ));
        let leases = LeaseManager::new(config.lease.lease_timeout(), clock.clone());

        info!(
            node = %config.node.id,
            coherence = config.field.initial_coherence,
            privileged_role = ?config.lease.privileged_role,
            "Field service initialized"
        );

        Ok(Self {
            clock,
            validator,
            field,
            leases,
            privileged_role: config.lease.privileged_role.clone(),
            connector,
            submit_lock: Mutex::new(()),
        })
    }

    pub fn node_id(&self) -> &str {
        self.field.local_node()
    }

    pub fn field(&self) -> &Arc<FieldAggregator> {
        &self.field
    }

    pub fn leases(&self) -> &LeaseManager {
        &self.leases
    }

    /// Validate without touching the field.
    pub fn validate_message(
        &self,
        raw: &RawMessage,
        tier: AccessTier,
    ) -> Result<Message, ValidationError> {
        self.validator.validate(raw, tier, self.clock.now())
    }

    pub fn apply_message(&self, message: &Message) -> FieldState {
        self.field.apply(message)
    }

    /// Validate and apply in one step.
    ///
    /// Privileged kinds also require the sender to hold the configured
    /// privileged role.
    pub fn submit_message(
        &self,
        raw: &RawMessage,
        tier: AccessTier,
    ) -> Result<FieldState, ServiceError> {
        let _order = self.submit_lock.lock().unwrap_or_else(|e| e.into_inner());

        let message = self.validate_message(raw, tier).map_err(|e| {
            debug!(code = e.code(), error = %e, "Message rejected");
            e
        })?;
        self.check_privileged(&message)?;
        Ok(self.field.apply(&message))
    }

    pub fn get_field_state(&self) -> FieldState {
        self.field.snapshot()
    }

    pub fn claim_role(&self, role: &str, caller: &str) -> Result<(), LeaseError> {
        self.leases.claim(role, caller)
    }

    pub fn heartbeat_role(&self, role: &str, caller: &str) -> Result<(), LeaseError> {
        self.leases.heartbeat(role, caller)
    }

    pub fn release_role(&self, role: &str, caller: &str) -> Result<(), LeaseError> {
        self.leases.release(role, caller)
    }

    pub fn role_status(&self, role: &str) -> LeaseStatus {
        self.leases.status(role)
    }

    /// Bridge this node's field to `peer_url`.
    pub fn start_bridge(&self, peer_url: &str, config: BridgeConfig) -> BridgeHandle {
        bridge::start_bridge(peer_url, config, self.field.clone(), self.connector.clone())
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FieldEvent> {
        self.field.subscribe()
    }

    /// Advance decay and fluctuation to now.
    pub fn tick(&self) -> FieldState {
        self.field.tick()
    }

    fn check_privileged(&self, message: &Message) -> Result<(), LeaseError> {
        let Some(role) = &self.privileged_role else {
            return Ok(());
        };
        if self.validator.catalog().min_tier(message.kind()) < AccessTier::Privileged {
            return Ok(());
        }
        if self.leases.is_holder(role, message.from_node()) {
            Ok(())
        } else {
            Err(LeaseError::NotHolder {
                role: role.clone(),
                caller: message.from_node().to_string(),
            })
        }
    }
}
