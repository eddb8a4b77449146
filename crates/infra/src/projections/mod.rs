//! Projection implementations (read model builders).
//!
//! Projections consume committed envelopes and build query-side state. They
//! are rebuildable from the event store and idempotent under redelivery.

pub mod bus;
pub mod snapshot;

use serde_json::Value as JsonValue;
use thiserror::Error;

use maternity_events::EventEnvelope;

pub use bus::ProjectionBus;
pub use snapshot::SnapshotProjection;

#[derive(Debug, Error)]
pub enum ProjectionError {
    #[error("{projection}: failed to deserialize event: {reason}")]
    Deserialize {
        projection: &'static str,
        reason: String,
    },

    #[error("{projection}: non-monotonic sequence number (last={last}, found={found})")]
    NonMonotonicSequence {
        projection: &'static str,
        last: u64,
        found: u64,
    },

    #[error("{0}: projection state unavailable (lock poisoned)")]
    Unavailable(&'static str),
}

/// Outcome of a rebuild.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplayReport {
    pub projection: &'static str,
    pub events_replayed: u64,
    pub aggregates: u64,
}

impl ReplayReport {
    pub fn new(projection: &'static str) -> Self {
        Self {
            projection,
            events_replayed: 0,
            aggregates: 0,
        }
    }
}

/// A read model fed by committed envelopes of one aggregate type.
pub trait Projection: Send + Sync {
    fn name(&self) -> &'static str;

    /// Only envelopes of this aggregate type are routed here.
    fn aggregate_type(&self) -> &'static str;

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError>;

    /// Drop all state and replay `envelopes` in stream order.
    fn rebuild_from_scratch(
        &self,
        envelopes: Vec<EventEnvelope<JsonValue>>,
    ) -> Result<ReplayReport, ProjectionError>;
}
