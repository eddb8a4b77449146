use std::sync::{Arc, PoisonError, RwLock};

use serde_json::Value as JsonValue;

use maternity_events::{EventBus, EventEnvelope};

use super::{Projection, ProjectionError};

/// Synchronous bus that hands each committed envelope to the projections
/// registered for its aggregate type.
///
/// Delivery happens on the publishing thread, so a read after a successful
/// commit observes the commit.
#[derive(Default)]
pub struct ProjectionBus {
    projections: RwLock<Vec<Arc<dyn Projection>>>,
}

impl ProjectionBus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, projection: Arc<dyn Projection>) {
        let mut projections = self.projections.write().unwrap_or_else(|poisoned| {
            tracing::warn!("projection registry lock poisoned; recovering");
            poisoned.into_inner()
        });
        tracing::debug!(
            projection = projection.name(),
            aggregate_type = projection.aggregate_type(),
            "projection subscribed"
        );
        projections.push(projection);
    }

    pub fn subscribers(&self) -> Vec<Arc<dyn Projection>> {
        self.projections
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl core::fmt::Debug for ProjectionBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let names: Vec<&'static str> = self.subscribers().iter().map(|p| p.name()).collect();
        f.debug_struct("ProjectionBus")
            .field("projections", &names)
            .finish()
    }
}

impl EventBus<EventEnvelope<JsonValue>> for ProjectionBus {
    type Error = ProjectionError;

    /// Every matching projection sees the envelope; the first failure is
    /// returned after all of them have been tried.
    fn publish(&self, message: EventEnvelope<JsonValue>) -> Result<(), Self::Error> {
        let mut first_error = None;
        for projection in self.subscribers() {
            if projection.aggregate_type() != message.aggregate_type() {
                continue;
            }
            if let Err(err) = projection.apply_envelope(&message) {
                first_error.get_or_insert(err);
            }
        }
        first_error.map_or(Ok(()), Err)
    }
}
