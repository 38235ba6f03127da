//! Field aggregator
//!
//! Owns the local [`FieldState`]. Every mutation runs under one mutex and
//! publishes [`FieldEvent`]s on a broadcast channel before the lock is
//! released, so subscribers see events in mutation order.

use std::collections::HashMap;
use std::f64::consts::{LN_2, PI};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use super::noise::NoiseSource;
use super::reconcile::{merge, MergeOutcome};
use super::scoring::{self, ContributionFactors};
use super::state::{clamp_coherence, FieldState};
use crate::clock::Clock;
use crate::config::{FieldConfig, ScoringConfig};
use crate::message::{Message, MessageKind};

pub const BREAKTHROUGH_THRESHOLD: f64 = 90.0;
pub const WARNING_THRESHOLD: f64 = 50.0;
pub const CRISIS_THRESHOLD: f64 = 30.0;

const EVENT_CAPACITY: usize = 256;

/// What caused a field update.
#[derive(Debug, Clone, PartialEq)]
pub enum UpdateCause {
    Message { kind: MessageKind, from_node: String },
    Decay,
    Fluctuation,
    Reconcile { peer: String },
}

/// Notifications published by the aggregator.
#[derive(Debug, Clone, PartialEq)]
pub enum FieldEvent {
    /// Any mutation.
    Updated { coherence: f64, cause: UpdateCause },
    /// Coherence rose through the breakthrough threshold.
    Breakthrough { coherence: f64 },
    /// Coherence fell through the warning threshold.
    Warning { coherence: f64 },
    /// Coherence fell through the crisis threshold.
    Crisis { coherence: f64 },
}

struct FieldInner {
    state: FieldState,
    /// Offset currently baked into `state.coherence` by `fluctuate`.
    fluctuation: f64,
    last_tick_at: DateTime<Utc>,
    /// Remote and local senders by last-seen time.
    nodes: HashMap<String, DateTime<Utc>>,
}

pub struct FieldAggregator {
    local_node: String,
    config: FieldConfig,
    scoring: ScoringConfig,
    clock: Arc<dyn Clock>,
    noise: Arc<dyn NoiseSource>,
    inner: Mutex<FieldInner>,
    events: broadcast::Sender<FieldEvent>,
}

impl FieldAggregator {
    pub fn new(
        local_node: impl Into<String>,
        config: FieldConfig,
        scoring: ScoringConfig,
        clock: Arc<dyn Clock>,
        noise: Arc<dyn NoiseSource>,
    ) -> Self {
        let now = clock.now();
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = FieldInner {
            state: FieldState::new(config.initial_coherence, now),
            fluctuation: 0.0,
            last_tick_at: now,
            nodes: HashMap::new(),
        };

        Self {
            local_node: local_node.into(),
            config,
            scoring,
            clock,
            noise,
            inner: Mutex::new(inner),
            events,
        }
    }

    pub fn local_node(&self) -> &str {
        &self.local_node
    }

    pub fn subscribe(&self) -> broadcast::Receiver<FieldEvent> {
        self.events.subscribe()
    }

    /// Apply a validated message's catalog impact to coherence and to its
    /// harmony category.
    pub fn apply(&self, message: &Message) -> FieldState {
        let delta = f64::from(message.impact_weight()) * self.config.scale_factor;
        let now = self.clock.now();

        let mut inner = self.lock();
        let before = inner.state.coherence;
        inner.state.coherence = clamp_coherence(before + delta);
        *inner
            .state
            .harmonics
            .entry(message.harmony_category())
            .or_insert(0.0) += delta;
        inner.state.last_updated_at = now;
        inner.nodes.insert(message.from_node().to_string(), now);

        let snapshot = self.snapshot_locked(&mut inner, now);
        debug!(
            kind = %message.kind(),
            from = message.from_node(),
            delta,
            coherence = snapshot.coherence,
            "Applied message"
        );
        self.publish(
            before,
            snapshot.coherence,
            UpdateCause::Message {
                kind: message.kind(),
                from_node: message.from_node().to_string(),
            },
        );
        snapshot
    }

    /// Exponential decay toward the configured baseline over `elapsed`.
    /// Harmonics decay toward zero by the same factor.
    pub fn decay(&self, elapsed: Duration) -> FieldState {
        let now = self.clock.now();
        let mut inner = self.lock();
        if elapsed.is_zero() {
            return self.snapshot_locked(&mut inner, now);
        }
        self.decay_locked(&mut inner, elapsed);
        self.snapshot_locked(&mut inner, now)
    }

    /// Replace the previous fluctuation offset with a fresh one.
    ///
    /// The offset is `amplitude * sin(2πt / period)` plus scaled noise, so
    /// with a pinned clock and no noise the result is deterministic.
    pub fn fluctuate(&self) -> FieldState {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.fluctuate_locked(&mut inner, now);
        self.snapshot_locked(&mut inner, now)
    }

    /// Decay by the time since the previous tick, then fluctuate. Driven by
    /// the daemon's ticker.
    pub fn tick(&self) -> FieldState {
        let now = self.clock.now();
        let mut inner = self.lock();
        let elapsed = (now - inner.last_tick_at).to_std().unwrap_or(Duration::ZERO);
        inner.last_tick_at = now;
        if !elapsed.is_zero() {
            self.decay_locked(&mut inner, elapsed);
        }
        self.fluctuate_locked(&mut inner, now);
        self.snapshot_locked(&mut inner, now)
    }

    pub fn snapshot(&self) -> FieldState {
        let now = self.clock.now();
        let mut inner = self.lock();
        self.snapshot_locked(&mut inner, now)
    }

    /// Reconcile a snapshot received from `peer`.
    pub fn merge_remote(
        &self,
        remote: &FieldState,
        peer: &str,
        window: chrono::Duration,
    ) -> MergeOutcome {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.nodes.insert(peer.to_string(), now);

        let before = inner.state.coherence;
        let outcome = merge(&mut inner.state, remote, window);
        if outcome == MergeOutcome::RemoteAdopted {
            // the local offset is not part of the adopted value
            inner.fluctuation = 0.0;
        }
        if outcome != MergeOutcome::Unchanged {
            let after = inner.state.coherence;
            debug!(peer, ?outcome, coherence = after, "Merged remote snapshot");
            self.publish(before, after, UpdateCause::Reconcile { peer: peer.to_string() });
        }
        outcome
    }

    /// Current time on the aggregator's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    /// Record that `node_id` is alive without touching the field.
    pub fn observe_node(&self, node_id: &str) {
        let now = self.clock.now();
        self.lock().nodes.insert(node_id.to_string(), now);
    }

    pub fn contribution_score(&self, factors: &ContributionFactors) -> f64 {
        scoring::contribution_score(factors, &self.scoring)
    }

    /// Emergence potential of an agent with the given contribution score
    /// (0-1) against the current field.
    pub fn emergence_potential(&self, agent_contribution: f64) -> f64 {
        let state = self.snapshot();
        scoring::emergence_potential(
            agent_contribution * 100.0,
            scoring::harmony_integration(&state.harmonics),
            state.coherence,
            &self.scoring,
        )
    }

    fn decay_locked(&self, inner: &mut FieldInner, elapsed: Duration) {
        let half_life_ms = self.config.half_life_ms.max(1) as f64;
        let factor = (-LN_2 * elapsed.as_secs_f64() * 1000.0 / half_life_ms).exp();
        let baseline = self.config.decay_baseline;

        let before = inner.state.coherence;
        inner.state.coherence = clamp_coherence(baseline + (before - baseline) * factor);
        for value in inner.state.harmonics.values_mut() {
            *value *= factor;
        }
        self.publish(before, inner.state.coherence, UpdateCause::Decay);
    }

    fn fluctuate_locked(&self, inner: &mut FieldInner, now: DateTime<Utc>) {
        let period_ms = self.config.fluctuation_period_ms.max(1) as f64;
        let t_ms = now.timestamp_millis() as f64;
        let wave = self.config.fluctuation_amplitude * (2.0 * PI * t_ms / period_ms).sin();
        let noise = self.noise.sample().clamp(-1.0, 1.0) * self.config.noise_amplitude;
        let offset = wave + noise;

        let before = inner.state.coherence;
        inner.state.coherence = clamp_coherence(before - inner.fluctuation + offset);
        inner.fluctuation = offset;
        self.publish(before, inner.state.coherence, UpdateCause::Fluctuation);
    }

    fn snapshot_locked(&self, inner: &mut FieldInner, now: DateTime<Utc>) -> FieldState {
        let ttl = chrono::Duration::seconds(self.config.node_ttl_secs as i64);
        let local = self.local_node.as_str();
        inner.nodes.retain(|_, seen| now - *seen <= ttl);
        let remote = inner.nodes.keys().filter(|id| id.as_str() != local).count();
        inner.state.active_node_count = u32::try_from(remote + 1).unwrap_or(u32::MAX);
        inner.state.clone()
    }

    fn publish(&self, before: f64, after: f64, cause: UpdateCause) {
        // send only fails when nobody is subscribed
        let _ = self.events.send(FieldEvent::Updated { coherence: after, cause });

        if before < BREAKTHROUGH_THRESHOLD && after >= BREAKTHROUGH_THRESHOLD {
            info!(coherence = after, "Field breakthrough");
            let _ = self.events.send(FieldEvent::Breakthrough { coherence: after });
        }
        if before >= WARNING_THRESHOLD && after < WARNING_THRESHOLD {
            warn!(coherence = after, "Field coherence below warning threshold");
            let _ = self.events.send(FieldEvent::Warning { coherence: after });
        }
        if before >= CRISIS_THRESHOLD && after < CRISIS_THRESHOLD {
            warn!(coherence = after, "Field coherence in crisis");
            let _ = self.events.send(FieldEvent::Crisis { coherence: after });
        }
    }

    fn lock(&self) -> MutexGuard<'_, FieldInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
