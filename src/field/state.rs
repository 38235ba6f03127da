//! Field state snapshot

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::HarmonyCategory;

pub const MIN_COHERENCE: f64 = 0.0;
pub const MAX_COHERENCE: f64 = 100.0;

/// The shared aggregate every node holds a view of.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldState {
    /// Always within [0, 100].
    pub coherence: f64,
    /// Per-harmony scores, never negative.
    pub harmonics: BTreeMap<HarmonyCategory, f64>,
    /// Time of the last message applied or remote state adopted.
    pub last_updated_at: DateTime<Utc>,
    pub active_node_count: u32,
}

impl FieldState {
    pub fn new(coherence: f64, at: DateTime<Utc>) -> Self {
        Self {
            coherence: clamp_coherence(coherence),
            harmonics: HarmonyCategory::ALL.into_iter().map(|c| (c, 0.0)).collect(),
            last_updated_at: at,
            active_node_count: 1,
        }
    }

    pub fn harmonic(&self, category: HarmonyCategory) -> f64 {
        self.harmonics.get(&category).copied().unwrap_or(0.0)
    }

    pub fn collective_state(&self) -> CollectiveState {
        CollectiveState::from_coherence(self.coherence)
    }
}

pub fn clamp_coherence(value: f64) -> f64 {
    if value.is_nan() {
        return MIN_COHERENCE;
    }
    value.clamp(MIN_COHERENCE, MAX_COHERENCE)
}

/// Named bands of field coherence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CollectiveState {
    UnifiedConsciousness,
    HarmonicFlow,
    CoherentCollaboration,
    StableConnection,
    EmergingAlignment,
    SeekingHarmony,
    FragmentedField,
    CrisisTransformation,
}

impl CollectiveState {
    pub fn from_coherence(coherence: f64) -> Self {
        match coherence {
            c if c >= 95.0 => Self::UnifiedConsciousness,
            c if c >= 85.0 => Self::HarmonicFlow,
            c if c >= 75.0 => Self::CoherentCollaboration,
            c if c >= 65.0 => Self::StableConnection,
            c if c >= 50.0 => Self::EmergingAlignment,
            c if c >= 35.0 => Self::SeekingHarmony,
            c if c >= 20.0 => Self::FragmentedField,
            _ => Self::CrisisTransformation,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_state_has_all_harmonies() {
        let state = FieldState::new(80.0, Utc::now());
        assert_eq!(state.harmonics.len(), 7);
        assert!(state.harmonics.values().all(|v| *v == 0.0));
    }

    #[test]
    fn test_new_state_clamps() {
        assert_eq!(FieldState::new(140.0, Utc::now()).coherence, 100.0);
        assert_eq!(FieldState::new(-3.0, Utc::now()).coherence, 0.0);
        assert_eq!(FieldState::new(f64::NAN, Utc::now()).coherence, 0.0);
    }

    #[test]
    fn test_collective_state_bands() {
        assert_eq!(CollectiveState::from_coherence(97.0), CollectiveState::UnifiedConsciousness);
        assert_eq!(CollectiveState::from_coherence(75.0), CollectiveState::CoherentCollaboration);
        assert_eq!(CollectiveState::from_coherence(74.9), CollectiveState::StableConnection);
        assert_eq!(CollectiveState::from_coherence(0.0), CollectiveState::CrisisTransformation);
    }

    #[test]
    fn test_state_json_uses_category_names() {
        let state = FieldState::new(75.0, Utc::now());
        let json = serde_json::to_value(&state).unwrap();
        assert!(json["harmonics"]["mutuality"].is_number());
        assert_eq!(json["activeNodeCount"], 1);

        let back: FieldState = serde_json::from_value(json).unwrap();
        assert_eq!(back, state);
    }
}
