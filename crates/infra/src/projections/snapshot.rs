use std::collections::HashMap;
use std::sync::RwLock;

use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;

use maternity_core::{Aggregate, AggregateId};
use maternity_events::EventEnvelope;

use super::{Projection, ProjectionError, ReplayReport};
use crate::read_model::ReadStore;

/// Read model holding the latest state of every aggregate of one type.
///
/// Keeps a per-stream cursor so redelivered envelopes are ignored and gaps
/// are reported instead of silently applied out of order.
pub struct SnapshotProjection<A, S>
where
    A: Aggregate,
    S: ReadStore<AggregateId, A>,
{
    name: &'static str,
    aggregate_type: &'static str,
    make_empty: fn(AggregateId) -> A,
    store: S,
    cursors: RwLock<HashMap<AggregateId, u64>>,
}

impl<A, S> SnapshotProjection<A, S>
where
    A: Aggregate,
    S: ReadStore<AggregateId, A>,
{
    pub fn new(
        name: &'static str,
        aggregate_type: &'static str,
        make_empty: fn(AggregateId) -> A,
        store: S,
    ) -> Self {
        Self {
            name,
            aggregate_type,
            make_empty,
            store,
            cursors: RwLock::new(HashMap::new()),
        }
    }

    pub fn get(&self, aggregate_id: &AggregateId) -> Option<A> {
        self.store.get(aggregate_id)
    }

    pub fn list(&self) -> Vec<A> {
        self.store.list()
    }

    /// Last applied sequence number for a stream (0 when unseen).
    pub fn cursor(&self, aggregate_id: &AggregateId) -> u64 {
        self.cursors
            .read()
            .ok()
            .and_then(|c| c.get(aggregate_id).copied())
            .unwrap_or(0)
    }
}

impl<A, S> Projection for SnapshotProjection<A, S>
where
    A: Aggregate + Send + Sync,
    A::Event: DeserializeOwned,
    S: ReadStore<AggregateId, A>,
{
    fn name(&self) -> &'static str {
        self.name
    }

    fn aggregate_type(&self) -> &'static str {
        self.aggregate_type
    }

    fn apply_envelope(&self, envelope: &EventEnvelope<JsonValue>) -> Result<(), ProjectionError> {
        let aggregate_id = envelope.aggregate_id();
        let seq = envelope.sequence_number();

        let mut cursors = self
            .cursors
            .write()
            .map_err(|_| ProjectionError::Unavailable(self.name))?;
        let last = cursors.get(&aggregate_id).copied().unwrap_or(0);

        if seq <= last {
            // Redelivery or replay overlap.
            return Ok(());
        }
        if seq != last + 1 {
            return Err(ProjectionError::NonMonotonicSequence {
                projection: self.name,
                last,
                found: seq,
            });
        }

        let event: A::Event = serde_json::from_value(envelope.payload().clone()).map_err(|e| {
            ProjectionError::Deserialize {
                projection: self.name,
                reason: e.to_string(),
            }
        })?;

        let mut snapshot = self
            .store
            .get(&aggregate_id)
            .unwrap_or_else(|| (self.make_empty)(aggregate_id));
        snapshot.apply(&event);
        self.store.upsert(aggregate_id, snapshot);

        cursors.insert(aggregate_id, seq);
        Ok(())
    }

    fn rebuild_from_scratch(
        &self,
        envelopes: Vec<EventEnvelope<JsonValue>>,
    ) -> Result<ReplayReport, ProjectionError> {
        if let Ok(mut cursors) = self.cursors.write() {
            cursors.clear();
        }
        self.store.clear();

        let mut envs = envelopes;
        envs.sort_by_key(|e| (e.aggregate_id(), e.sequence_number()));

        let mut report = ReplayReport::new(self.name);
        let mut previous = None;
        for env in &envs {
            self.apply_envelope(env)?;
            report.events_replayed += 1;
            if previous != Some(env.aggregate_id()) {
                report.aggregates += 1;
                previous = Some(env.aggregate_id());
            }
        }

        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use uuid::Uuid;

    use maternity_stock::{
        RecordTransaction, RegisterVaccine, StockDirection, StorageBand, VaccineId,
        VaccineProfile, VaccineStock, VaccineStockEvent, VaccineStockCommand,
    };

    use super::*;
    use crate::read_model::InMemoryReadStore;

    type StockSnapshots = SnapshotProjection<VaccineStock, Arc<InMemoryReadStore<AggregateId, VaccineStock>>>;

    fn projection() -> StockSnapshots {
        SnapshotProjection::new(
            "vaccine_stock",
            "stock.vaccine",
            |id| VaccineStock::empty(VaccineId::new(id)),
            Arc::new(InMemoryReadStore::new()),
        )
    }

    fn envelopes(id: VaccineId) -> Vec<EventEnvelope<JsonValue>> {
        let at = NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(9, 0, 0)
            .unwrap();
        let mut stock = VaccineStock::empty(id);
        let commands = [
            VaccineStockCommand::RegisterVaccine(RegisterVaccine {
                vaccine_id: id,
                profile: VaccineProfile {
                    name: "Measles".to_string(),
                    category: "live attenuated".to_string(),
                    doses_required: 2,
                    min_stock: 3,
                    expiry_date: NaiveDate::from_ymd_opt(2024, 9, 30).unwrap(),
                    storage: StorageBand::Refrigerated,
                },
                initial_quantity: 6,
                occurred_at: at,
            }),
            VaccineStockCommand::RecordTransaction(RecordTransaction {
                vaccine_id: id,
                transaction_id: Uuid::now_v7(),
                direction: StockDirection::Out,
                quantity: 4,
                reason: "campaign".to_string(),
                occurred_at: at,
            }),
        ];

        let mut events: Vec<VaccineStockEvent> = Vec::new();
        for cmd in &commands {
            events.extend(maternity_events::execute(&mut stock, cmd).unwrap());
        }
        events
            .iter()
            .enumerate()
            .map(|(i, e)| {
                EventEnvelope::new(
                    Uuid::now_v7(),
                    id.0,
                    "stock.vaccine",
                    i as u64 + 1,
                    serde_json::to_value(e).unwrap(),
                )
            })
            .collect()
    }

    #[test]
    fn applies_in_order_and_ignores_redelivery() {
        let p = projection();
        let id = VaccineId::new(AggregateId::new());
        let envs = envelopes(id);

        for env in &envs {
            p.apply_envelope(env).unwrap();
        }
        p.apply_envelope(&envs[1]).unwrap();

        let snapshot = p.get(&id.0).unwrap();
        assert_eq!(snapshot.current_quantity(), 2);
        assert!(snapshot.is_low_stock());
        assert_eq!(p.cursor(&id.0), 2);
    }

    #[test]
    fn gap_in_sequence_is_reported() {
        let p = projection();
        let id = VaccineId::new(AggregateId::new());
        let envs = envelopes(id);

        let err = p.apply_envelope(&envs[1]).unwrap_err();
        assert!(matches!(
            err,
            ProjectionError::NonMonotonicSequence { last: 0, found: 2, .. }
        ));
        assert!(p.get(&id.0).is_none());
    }

    #[test]
    fn rebuild_reaches_the_same_state_in_any_delivery_order() {
        let p = projection();
        let a = VaccineId::new(AggregateId::new());
        let b = VaccineId::new(AggregateId::new());

        let mut all = envelopes(a);
        all.extend(envelopes(b));
        all.reverse();

        let report = p.rebuild_from_scratch(all).unwrap();
        assert_eq!(report.events_replayed, 4);
        assert_eq!(report.aggregates, 2);
        assert_eq!(p.list().len(), 2);
        assert_eq!(p.get(&b.0).unwrap().current_quantity(), 2);
    }
}
