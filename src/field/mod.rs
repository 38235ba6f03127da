//! Field coherence: state, aggregation, scoring and reconciliation

pub mod aggregator;
pub mod noise;
pub mod reconcile;
pub mod scoring;
pub mod state;

pub use aggregator::{FieldAggregator, FieldEvent, UpdateCause};
pub use noise::{NoNoise, NoiseSource, RandomNoise};
pub use reconcile::MergeOutcome;
pub use scoring::{ContributionFactors, NodeReading};
pub use state::{CollectiveState, FieldState};
