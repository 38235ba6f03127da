//! coherence-node: field-coherence runtime for presence network nodes
//!
//! Each node keeps a shared "field" aggregate fed by validated messages:
//! - Message catalog and validation (`message`)
//! - Field aggregation, decay, fluctuation and scoring (`field`)
//! - Exclusive role leases with heartbeats (`lease`)
//! - Peer bridges that reconcile field snapshots between nodes (`bridge`)
//!
//! [`FieldService`] ties these together behind one handle.

pub mod bridge;
pub mod clock;
pub mod config;
pub mod error;
pub mod field;
pub mod lease;
pub mod message;
pub mod service;

pub use bridge::{start_bridge, BridgeConfig, BridgeHandle, ConnectionState, LinkStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::Config;
pub use error::{BridgeError, ConfigError, LeaseError, ServiceError, ValidationError};
pub use field::{FieldAggregator, FieldEvent, FieldState};
pub use lease::{LeaseManager, LeaseStatus};
pub use message::{AccessTier, HarmonyCategory, Message, MessageKind, MessageValidator, RawMessage};
pub use service::FieldService;
