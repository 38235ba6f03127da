//! Contribution, emergence and resonance scoring
//!
//! Pure functions. All tunable constants come from [`ScoringConfig`].

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::config::ScoringConfig;
use crate::message::HarmonyCategory;

/// Normalized inputs to a node's contribution score, each in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ContributionFactors {
    pub engagement: f64,
    pub trust: f64,
    pub alignment: f64,
}

/// One node's position on the two dimensions entanglement is measured over.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct NodeReading {
    pub alignment: f64,
    pub trust: f64,
}

/// Harmonic mean; 0 for an empty slice or when any value is not positive.
pub fn harmonic_mean(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan() || *v <= 0.0) {
        return 0.0;
    }
    let reciprocal_sum: f64 = values.iter().map(|v| 1.0 / v).sum();
    values.len() as f64 / reciprocal_sum
}

/// Geometric mean; 0 for an empty slice or when any value is not positive.
pub fn geometric_mean(values: &[f64]) -> f64 {
    if values.is_empty() || values.iter().any(|v| v.is_nan() || *v <= 0.0) {
        return 0.0;
    }
    let log_sum: f64 = values.iter().map(|v| v.ln()).sum();
    (log_sum / values.len() as f64).exp()
}

/// A node's contribution to the field, in [0, 1].
///
/// Uses the harmonic mean so one collapsed factor drags the whole score
/// down no matter how strong the others are.
pub fn contribution_score(factors: &ContributionFactors, config: &ScoringConfig) -> f64 {
    let normalized = [
        unit(factors.engagement),
        unit(factors.trust),
        unit(factors.alignment),
    ];
    (harmonic_mean(&normalized) * config.contribution_scale).clamp(0.0, 1.0)
}

/// Readiness signal in [0, 100] from three inputs on a 0-100 scale.
///
/// The geometric mean of the inputs is pushed through a logistic curve
/// centred on `emergence_midpoint`.
pub fn emergence_potential(
    agent_contribution: f64,
    harmony_integration: f64,
    field_coherence: f64,
    config: &ScoringConfig,
) -> f64 {
    let g = geometric_mean(&[
        agent_contribution.clamp(0.0, 100.0),
        harmony_integration.clamp(0.0, 100.0),
        field_coherence.clamp(0.0, 100.0),
    ]);
    100.0 / (1.0 + (-config.emergence_steepness * (g - config.emergence_midpoint)).exp())
}

/// How evenly the harmonies are developed, 0-100.
///
/// Ratio of geometric to arithmetic mean across all seven categories; 100
/// when every harmony carries the same score, 0 while any harmony is empty.
pub fn harmony_integration(harmonics: &BTreeMap<HarmonyCategory, f64>) -> f64 {
    let values: Vec<f64> = HarmonyCategory::ALL
        .iter()
        .map(|c| harmonics.get(c).copied().unwrap_or(0.0).max(0.0))
        .collect();
    let arithmetic = values.iter().sum::<f64>() / values.len() as f64;
    if arithmetic <= 0.0 {
        return 0.0;
    }
    (geometric_mean(&values) / arithmetic * 100.0).clamp(0.0, 100.0)
}

/// Similarity of two non-negative magnitudes: 1.0 when equal, decaying as
/// the gap grows relative to their average.
pub fn resonance(a: f64, b: f64) -> f64 {
    let a = a.max(0.0);
    let b = b.max(0.0);
    if a == 0.0 && b == 0.0 {
        return 1.0;
    }
    let avg = (a + b) / 2.0;
    (-(a - b).abs() / avg).exp()
}

/// Mean pairwise `resonance(alignment) * resonance(trust)` across nodes.
///
/// Fewer than two nodes have no pairs and score 0.
pub fn entanglement(nodes: &[NodeReading]) -> f64 {
    let mut total = 0.0;
    let mut pairs = 0usize;
    for (i, a) in nodes.iter().enumerate() {
        for b in &nodes[i + 1..] {
            total += resonance(a.alignment, b.alignment) * resonance(a.trust, b.trust);
            pairs += 1;
        }
    }
    if pairs == 0 {
        0.0
    } else {
        total / pairs as f64
    }
}

/// Collective coherence of a group of nodes: the harmonic mean of their
/// individual coherence values.
pub fn group_coherence(coherences: &[f64]) -> f64 {
    harmonic_mean(coherences)
}

fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}
