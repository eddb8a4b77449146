use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use maternity_core::AggregateId;

use super::r#trait::{EventStore, EventStoreError, StoredEvent, StreamAppend};

/// In-memory append-only event store.
///
/// Intended for tests/dev. A single write lock covers a whole batch, so a
/// multi-stream append is observed either entirely or not at all.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Vec<StoredEvent>>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    /// Reject malformed batches before taking the lock.
    fn validate_batch(batch: &[StreamAppend]) -> Result<(), EventStoreError> {
        let mut seen = HashSet::with_capacity(batch.len());
        for append in batch {
            if !seen.insert(append.aggregate_id) {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch names stream {} more than once",
                    append.aggregate_id
                )));
            }

            let Some(first) = append.events.first() else {
                continue;
            };
            for (idx, e) in append.events.iter().enumerate() {
                if e.aggregate_id != append.aggregate_id {
                    return Err(EventStoreError::InvalidAppend(format!(
                        "event at index {idx} targets {} inside the append for {}",
                        e.aggregate_id, append.aggregate_id
                    )));
                }
                if e.aggregate_type != first.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "append for {} mixes aggregate types (index {idx})",
                        append.aggregate_id
                    )));
                }
            }
        }
        Ok(())
    }
}

impl EventStore for InMemoryEventStore {
    fn append_atomic(&self, batch: Vec<StreamAppend>) -> Result<Vec<StoredEvent>, EventStoreError> {
        let batch: Vec<StreamAppend> = batch.into_iter().filter(|a| !a.events.is_empty()).collect();
        if batch.is_empty() {
            return Ok(vec![]);
        }
        Self::validate_batch(&batch)?;

        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        // Check every stream first; nothing is written unless all pass.
        for append in &batch {
            let stream = streams
                .get(&append.aggregate_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let current = Self::current_version(stream);

            if !append.expected_version.matches(current) {
                return Err(EventStoreError::Concurrency(format!(
                    "stream {}: expected {:?}, found {current}",
                    append.aggregate_id, append.expected_version
                )));
            }

            // Aggregate type is fixed by the stream's first event.
            if let (Some(existing), Some(incoming)) = (stream.first(), append.events.first()) {
                if existing.aggregate_type != incoming.aggregate_type {
                    return Err(EventStoreError::AggregateTypeMismatch(format!(
                        "stream aggregate_type is '{}', attempted append with '{}'",
                        existing.aggregate_type, incoming.aggregate_type
                    )));
                }
            }
        }

        let mut committed = Vec::new();
        for append in batch {
            let stream = streams.entry(append.aggregate_id).or_default();
            let mut next = Self::current_version(stream) + 1;
            for e in append.events {
                let stored = StoredEvent {
                    event_id: e.event_id,
                    aggregate_id: e.aggregate_id,
                    aggregate_type: e.aggregate_type,
                    sequence_number: next,
                    event_type: e.event_type,
                    event_version: e.event_version,
                    occurred_at: e.occurred_at,
                    payload: e.payload,
                };
                next += 1;
                stream.push(stored.clone());
                committed.push(stored);
            }
        }

        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        Ok(streams.get(&aggregate_id).cloned().unwrap_or_default())
    }

    fn load_by_type(&self, aggregate_type: &str) -> Result<Vec<StoredEvent>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Unavailable("lock poisoned".to_string()))?;

        let mut matching: Vec<&Vec<StoredEvent>> = streams
            .values()
            .filter(|s| s.first().is_some_and(|e| e.aggregate_type == aggregate_type))
            .collect();
        matching.sort_by_key(|s| s.first().map(|e| e.aggregate_id));

        Ok(matching.into_iter().flatten().cloned().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use maternity_core::ExpectedVersion;
    use serde_json::json;
    use uuid::Uuid;

    use crate::event_store::UncommittedEvent;

    fn event(aggregate_id: AggregateId, aggregate_type: &str) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: aggregate_type.to_string(),
            event_type: "test.happened".to_string(),
            event_version: 1,
            occurred_at: NaiveDate::from_ymd_opt(2024, 3, 1)
                .unwrap()
                .and_hms_opt(9, 0, 0)
                .unwrap(),
            payload: json!({}),
        }
    }

    #[test]
    fn assigns_gapless_sequence_numbers_per_stream() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();

        let first = store
            .append(vec![event(a, "stock.vaccine"), event(a, "stock.vaccine")], ExpectedVersion::Exact(0))
            .unwrap();
        let second = store
            .append(vec![event(a, "stock.vaccine")], ExpectedVersion::Exact(2))
            .unwrap();

        let seqs: Vec<u64> = first.iter().chain(&second).map(|e| e.sequence_number).collect();
        assert_eq!(seqs, vec![1, 2, 3]);
        assert_eq!(store.load_stream(a).unwrap().len(), 3);
    }

    #[test]
    fn failed_expectation_on_one_stream_writes_nothing() {
        let store = InMemoryEventStore::new();
        let dose = AggregateId::new();
        let vaccine = AggregateId::new();
        store
            .append(vec![event(vaccine, "stock.vaccine")], ExpectedVersion::Exact(0))
            .unwrap();

        let err = store
            .append_atomic(vec![
                StreamAppend::new(dose, ExpectedVersion::Exact(0), vec![event(dose, "immunization.dose")]),
                StreamAppend::new(vaccine, ExpectedVersion::Exact(0), vec![event(vaccine, "stock.vaccine")]),
            ])
            .unwrap_err();

        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert!(store.load_stream(dose).unwrap().is_empty());
        assert_eq!(store.load_stream(vaccine).unwrap().len(), 1);
    }

    #[test]
    fn rejects_batch_naming_a_stream_twice() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        let err = store
            .append_atomic(vec![
                StreamAppend::new(a, ExpectedVersion::Any, vec![event(a, "stock.vaccine")]),
                StreamAppend::new(a, ExpectedVersion::Any, vec![event(a, "stock.vaccine")]),
            ])
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn stream_type_is_fixed_by_first_event() {
        let store = InMemoryEventStore::new();
        let a = AggregateId::new();
        store
            .append(vec![event(a, "stock.vaccine")], ExpectedVersion::Exact(0))
            .unwrap();
        let err = store
            .append(vec![event(a, "prenatal.record")], ExpectedVersion::Exact(1))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::AggregateTypeMismatch(_)));
    }

    #[test]
    fn load_by_type_filters_streams() {
        let store = InMemoryEventStore::new();
        let v1 = AggregateId::new();
        let v2 = AggregateId::new();
        let r = AggregateId::new();
        store.append(vec![event(v1, "stock.vaccine")], ExpectedVersion::Exact(0)).unwrap();
        store.append(vec![event(r, "prenatal.record")], ExpectedVersion::Exact(0)).unwrap();
        store.append(vec![event(v2, "stock.vaccine")], ExpectedVersion::Exact(0)).unwrap();

        let loaded = store.load_by_type("stock.vaccine").unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.iter().all(|e| e.aggregate_type == "stock.vaccine"));
    }
}
