//! Command execution pipeline (application-level orchestration).
//!
//! ```text
//! Command
//!   ↓
//! 1. Load the aggregate's stream from the store
//!   ↓
//! 2. Rehydrate (apply historical events)
//!   ↓
//! 3. Handle the command (pure decision, produces events)
//!   ↓
//! 4. Stage the events in a UnitOfWork, expecting the loaded version
//!   ↓
//! 5. Commit: one atomic append over every staged stream
//!   ↓
//! 6. Publish the committed events to the projection bus
//! ```
//!
//! A single-aggregate command goes through [`CommandDispatcher::dispatch`].
//! Operations that must change two aggregates together (a dose administration
//! and its stock withdrawal) load both, execute against each into one
//! [`UnitOfWork`], and [`commit`](CommandDispatcher::commit) once.
//!
//! Commits are serialized by a lock held across append and publish, so
//! projections receive events in commit order. Conflicts between concurrent
//! writers are still detected by the optimistic version check in the store.

use std::sync::{Mutex, MutexGuard};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value as JsonValue;
use thiserror::Error;
use uuid::Uuid;

use maternity_core::{Aggregate, AggregateId, DomainError, ExpectedVersion};
use maternity_events::{EventBus, EventEnvelope};

use crate::event_store::{EventStore, EventStoreError, StoredEvent, StreamAppend, UncommittedEvent};
use crate::projections::{Projection, ReplayReport};

/// Failure at the service boundary.
///
/// Domain rejections are carried unchanged; infrastructure failures keep their
/// cause. Use [`DispatchError::kind`] to branch on the error taxonomy.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Optimistic concurrency failure (stale stream version).
    #[error("concurrency conflict: {0}")]
    Concurrency(String),

    /// A historical payload could not be decoded into the aggregate's event type.
    #[error("failed to deserialize stored event: {0}")]
    Deserialize(String),

    #[error(transparent)]
    Store(EventStoreError),

    /// A projection rejected the replay of a rebuild.
    #[error("event publication failed: {0}")]
    Publish(String),
}

/// Error taxonomy exposed to callers of the core.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    InvalidStateTransition,
    InsufficientStock,
    ConcurrencyConflict,
    NotFound,
    Internal,
}

impl DispatchError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DispatchError::Domain(err) => match err {
                DomainError::Validation(_) | DomainError::InvalidId(_) => ErrorKind::Validation,
                DomainError::InvalidStateTransition { .. } => ErrorKind::InvalidStateTransition,
                DomainError::InsufficientStock { .. } => ErrorKind::InsufficientStock,
                DomainError::Conflict(_) => ErrorKind::ConcurrencyConflict,
                DomainError::NotFound(_) => ErrorKind::NotFound,
                DomainError::InvariantViolation(_) => ErrorKind::Internal,
            },
            DispatchError::Concurrency(_) => ErrorKind::ConcurrencyConflict,
            DispatchError::Deserialize(_) | DispatchError::Store(_) | DispatchError::Publish(_) => {
                ErrorKind::Internal
            }
        }
    }

    /// Worth retrying after reloading state.
    pub fn is_transient(&self) -> bool {
        self.kind() == ErrorKind::ConcurrencyConflict
    }
}

impl From<EventStoreError> for DispatchError {
    fn from(value: EventStoreError) -> Self {
        match value {
            EventStoreError::Concurrency(msg) => DispatchError::Concurrency(msg),
            other => DispatchError::Store(other),
        }
    }
}

/// Streams staged for one atomic commit.
#[derive(Debug, Default)]
pub struct UnitOfWork {
    appends: Vec<StreamAppend>,
}

impl UnitOfWork {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.appends.iter().all(|a| a.events.is_empty())
    }

    /// Stage events for a stream. Events staged twice for the same stream are
    /// concatenated under the first expectation.
    pub fn stage(&mut self, append: StreamAppend) {
        if append.events.is_empty() {
            return;
        }
        match self
            .appends
            .iter_mut()
            .find(|a| a.aggregate_id == append.aggregate_id)
        {
            Some(existing) => existing.events.extend(append.events),
            None => self.appends.push(append),
        }
    }

    fn into_appends(self) -> Vec<StreamAppend> {
        self.appends
    }
}

/// A rehydrated aggregate together with the stream version it was loaded at.
#[derive(Debug, Clone)]
pub struct Loaded<A> {
    aggregate: A,
    aggregate_id: AggregateId,
    aggregate_type: String,
    version: u64,
}

impl<A> Loaded<A> {
    pub fn aggregate(&self) -> &A {
        &self.aggregate
    }

    pub fn into_aggregate(self) -> A {
        self.aggregate
    }

    /// Stream version including any events executed but not yet committed.
    pub fn version(&self) -> u64 {
        self.version
    }

    /// Nothing has been appended to the stream yet.
    pub fn is_new(&self) -> bool {
        self.version == 0
    }
}

impl<A> Loaded<A>
where
    A: Aggregate<Error = DomainError>,
    A::Event: maternity_events::Event + Serialize,
{
    /// Decide and apply `command`, staging the resulting events in `uow`.
    ///
    /// The in-memory aggregate reflects the command afterwards; the store does
    /// not until the unit of work is committed.
    pub fn execute(
        &mut self,
        command: &A::Command,
        uow: &mut UnitOfWork,
    ) -> Result<Vec<A::Event>, DispatchError> {
        let expected = ExpectedVersion::Exact(self.version);
        let decided = maternity_events::execute(&mut self.aggregate, command)?;
        if decided.is_empty() {
            return Ok(decided);
        }

        let uncommitted = decided
            .iter()
            .map(|ev| {
                UncommittedEvent::from_typed(
                    self.aggregate_id,
                    self.aggregate_type.clone(),
                    Uuid::now_v7(),
                    ev,
                )
            })
            .collect::<Result<Vec<_>, _>>()?;

        self.version += uncommitted.len() as u64;
        uow.stage(StreamAppend::new(self.aggregate_id, expected, uncommitted));
        Ok(decided)
    }
}

/// Reusable command execution engine for event-sourced aggregates.
///
/// - `S`: event store implementation
/// - `B`: bus receiving committed envelopes (the projections)
#[derive(Debug)]
pub struct CommandDispatcher<S, B> {
    store: S,
    bus: B,
    commit_lock: Mutex<()>,
}

impl<S, B> CommandDispatcher<S, B> {
    pub fn new(store: S, bus: B) -> Self {
        Self {
            store,
            bus,
            commit_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }
}

impl<S, B> CommandDispatcher<S, B>
where
    S: EventStore,
    B: EventBus<EventEnvelope<JsonValue>>,
{
    /// Load and rehydrate one aggregate.
    ///
    /// `make_aggregate` builds the empty instance that history is applied to.
    pub fn load<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<Loaded<A>, DispatchError>
    where
        A: Aggregate,
        A::Event: DeserializeOwned,
    {
        let history = self.store.load_stream(aggregate_id)?;
        validate_loaded_stream(aggregate_id, &history)?;

        let mut aggregate = make_aggregate(aggregate_id);
        apply_history(&mut aggregate, &history)?;

        Ok(Loaded {
            aggregate,
            aggregate_id,
            aggregate_type: aggregate_type.into(),
            version: stream_version(&history),
        })
    }

    /// Append every staged stream atomically, then publish.
    ///
    /// An empty unit of work is a no-op. Once the append succeeds the commit
    /// is reported as successful: a projection that rejects an envelope is
    /// caught up from the store, and every remaining envelope of the batch is
    /// still delivered.
    pub fn commit(&self, uow: UnitOfWork) -> Result<Vec<StoredEvent>, DispatchError> {
        if uow.is_empty() {
            return Ok(vec![]);
        }

        let _guard = self.lock_commits()?;
        let committed = self.store.append_atomic(uow.into_appends())?;

        let mut caught_up = Vec::new();
        for stored in &committed {
            if caught_up.contains(&stored.aggregate_id) {
                continue;
            }
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                tracing::warn!(
                    aggregate_id = %stored.aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?err,
                    "publish rejected; catching the stream up from the store"
                );
                self.catch_up(stored.aggregate_id);
                caught_up.push(stored.aggregate_id);
            }
        }

        Ok(committed)
    }

    /// Replay one stream onto the bus. Projections skip what they already
    /// applied, so this fills a gap left by a missed delivery.
    fn catch_up(&self, aggregate_id: AggregateId) {
        let stream = match self.store.load_stream(aggregate_id) {
            Ok(stream) => stream,
            Err(err) => {
                tracing::error!(%aggregate_id, error = %err, "catch-up failed: stream unreadable");
                return;
            }
        };
        for stored in &stream {
            if let Err(err) = self.bus.publish(stored.to_envelope()) {
                tracing::error!(
                    %aggregate_id,
                    sequence_number = stored.sequence_number,
                    error = ?err,
                    "catch-up failed; read models are behind the event store until rebuilt"
                );
                return;
            }
        }
    }

    /// Drop `projection`'s state and replay its aggregate type from the store.
    ///
    /// Holds the commit lock for the whole replay, so no commit can be
    /// published onto a half-rebuilt projection. Reads made meanwhile may see
    /// a partial view.
    pub fn rebuild(&self, projection: &dyn Projection) -> Result<ReplayReport, DispatchError> {
        let _guard = self.lock_commits()?;
        let envelopes = self.envelopes_of(projection.aggregate_type())?;
        projection
            .rebuild_from_scratch(envelopes)
            .map_err(|e| DispatchError::Publish(e.to_string()))
    }

    /// Run `read` while no commit can land, so the store and every projection
    /// describe the same point in the log.
    pub fn read_consistent<T>(&self, read: impl FnOnce() -> T) -> Result<T, DispatchError> {
        let _guard = self.lock_commits()?;
        Ok(read())
    }

    fn lock_commits(&self) -> Result<MutexGuard<'_, ()>, DispatchError> {
        self.commit_lock
            .lock()
            .map_err(|_| EventStoreError::Unavailable("commit lock poisoned".to_string()).into())
    }

    /// Load, execute and commit a single-aggregate command.
    ///
    /// Returns the aggregate as it stands after the command.
    pub fn dispatch<A>(
        &self,
        aggregate_id: AggregateId,
        aggregate_type: impl Into<String>,
        command: &A::Command,
        make_aggregate: impl FnOnce(AggregateId) -> A,
    ) -> Result<A, DispatchError>
    where
        A: Aggregate<Error = DomainError>,
        A::Event: maternity_events::Event + Serialize + DeserializeOwned,
    {
        let mut loaded = self.load(aggregate_id, aggregate_type, make_aggregate)?;
        let mut uow = UnitOfWork::new();
        loaded.execute(command, &mut uow)?;
        self.commit(uow)?;
        Ok(loaded.into_aggregate())
    }

    /// Every stored event of one aggregate type, as publishable envelopes.
    pub fn envelopes_of(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<EventEnvelope<JsonValue>>, DispatchError> {
        Ok(self
            .store
            .load_by_type(aggregate_type)?
            .iter()
            .map(StoredEvent::to_envelope)
            .collect())
    }
}

fn stream_version(stream: &[StoredEvent]) -> u64 {
    stream.last().map(|e| e.sequence_number).unwrap_or(0)
}

fn validate_loaded_stream(
    aggregate_id: AggregateId,
    stream: &[StoredEvent],
) -> Result<(), DispatchError> {
    let mut last = 0u64;
    for (idx, e) in stream.iter().enumerate() {
        if e.aggregate_id != aggregate_id {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "loaded stream contains wrong aggregate_id at index {idx}"
            ))));
        }
        if e.sequence_number <= last {
            return Err(DispatchError::Store(EventStoreError::InvalidAppend(format!(
                "non-monotonic sequence_number in loaded stream (last={last}, found={})",
                e.sequence_number
            ))));
        }
        last = e.sequence_number;
    }
    Ok(())
}

fn apply_history<A>(aggregate: &mut A, history: &[StoredEvent]) -> Result<(), DispatchError>
where
    A: Aggregate,
    A::Event: DeserializeOwned,
{
    for stored in history {
        let ev: A::Event = serde_json::from_value(stored.payload.clone())
            .map_err(|e| DispatchError::Deserialize(format!("{} #{}: {e}", stored.event_type, stored.sequence_number)))?;
        aggregate.apply(&ev);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::NaiveDate;
    use maternity_stock::{
        RecordTransaction, RegisterVaccine, StockDirection, StorageBand, VaccineId,
        VaccineProfile, VaccineStock, VaccineStockCommand,
    };

    use super::*;
    use crate::event_store::InMemoryEventStore;
    use crate::projections::{ProjectionBus, SnapshotProjection};
    use crate::read_model::InMemoryReadStore;

    fn dispatcher() -> CommandDispatcher<InMemoryEventStore, Arc<ProjectionBus>> {
        CommandDispatcher::new(InMemoryEventStore::new(), Arc::new(ProjectionBus::new()))
    }

    fn at(h: u32) -> chrono::NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 3, 1)
            .unwrap()
            .and_hms_opt(h, 0, 0)
            .unwrap()
    }

    fn register(id: VaccineId) -> VaccineStockCommand {
        VaccineStockCommand::RegisterVaccine(RegisterVaccine {
            vaccine_id: id,
            profile: VaccineProfile {
                name: "OPV".to_string(),
                category: "oral".to_string(),
                doses_required: 4,
                min_stock: 2,
                expiry_date: NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
                storage: StorageBand::Frozen,
            },
            initial_quantity: 5,
            occurred_at: at(8),
        })
    }

    fn dispense(id: VaccineId, quantity: i64) -> VaccineStockCommand {
        VaccineStockCommand::RecordTransaction(RecordTransaction {
            vaccine_id: id,
            transaction_id: Uuid::now_v7(),
            direction: StockDirection::Out,
            quantity,
            reason: "outreach session".to_string(),
            occurred_at: at(10),
        })
    }

    fn vaccine(id: AggregateId) -> VaccineStock {
        VaccineStock::empty(VaccineId::new(id))
    }

    #[test]
    fn dispatch_rehydrates_before_deciding() {
        let d = dispatcher();
        let id = VaccineId::new(AggregateId::new());

        d.dispatch(id.0, "stock.vaccine", &register(id), vaccine).unwrap();
        let stock = d.dispatch(id.0, "stock.vaccine", &dispense(id, 3), vaccine).unwrap();
        assert_eq!(stock.current_quantity(), 2);

        let err = d
            .dispatch(id.0, "stock.vaccine", &dispense(id, 3), vaccine)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientStock);
        assert_eq!(d.store().load_stream(id.0).unwrap().len(), 2);
    }

    #[test]
    fn stale_loaded_version_surfaces_as_transient_conflict() {
        let d = dispatcher();
        let id = VaccineId::new(AggregateId::new());
        d.dispatch(id.0, "stock.vaccine", &register(id), vaccine).unwrap();

        let mut first = d.load(id.0, "stock.vaccine", vaccine).unwrap();
        let mut second = d.load(id.0, "stock.vaccine", vaccine).unwrap();

        let mut uow = UnitOfWork::new();
        first.execute(&dispense(id, 1), &mut uow).unwrap();
        d.commit(uow).unwrap();

        let mut uow = UnitOfWork::new();
        second.execute(&dispense(id, 1), &mut uow).unwrap();
        let err = d.commit(uow).unwrap_err();
        assert!(matches!(err, DispatchError::Concurrency(_)));
        assert!(err.is_transient());
    }

    #[test]
    fn staging_twice_for_one_stream_keeps_first_expectation() {
        let d = dispatcher();
        let id = VaccineId::new(AggregateId::new());
        let mut loaded = d.load(id.0, "stock.vaccine", vaccine).unwrap();
        assert!(loaded.is_new());

        let mut uow = UnitOfWork::new();
        loaded.execute(&register(id), &mut uow).unwrap();
        loaded.execute(&dispense(id, 2), &mut uow).unwrap();
        assert_eq!(loaded.version(), 2);

        let committed = d.commit(uow).unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(committed[1].sequence_number, 2);
    }

    #[test]
    fn commit_catches_up_a_projection_that_missed_events() {
        let d = dispatcher();
        let snapshots = Arc::new(SnapshotProjection::new(
            "vaccine_stock",
            "stock.vaccine",
            vaccine,
            Arc::new(InMemoryReadStore::new()),
        ));
        d.bus().subscribe(snapshots.clone());

        // Registration lands in the store without reaching the projection.
        let missed = VaccineId::new(AggregateId::new());
        let mut stock = vaccine(missed.0);
        let events: Vec<UncommittedEvent> = maternity_events::execute(&mut stock, &register(missed))
            .unwrap()
            .iter()
            .map(|e| UncommittedEvent::from_typed(missed.0, "stock.vaccine", Uuid::now_v7(), e).unwrap())
            .collect();
        d.store().append(events, ExpectedVersion::Exact(0)).unwrap();
        assert!(snapshots.get(&missed.0).is_none());

        // One batch: the lagging stream first, a fresh stream after it.
        let fresh = VaccineId::new(AggregateId::new());
        let mut lagging = d.load(missed.0, "stock.vaccine", vaccine).unwrap();
        let mut other = d.load(fresh.0, "stock.vaccine", vaccine).unwrap();
        let mut uow = UnitOfWork::new();
        lagging.execute(&dispense(missed, 2), &mut uow).unwrap();
        other.execute(&register(fresh), &mut uow).unwrap();

        let committed = d.commit(uow).unwrap();
        assert_eq!(committed.len(), 2);
        assert_eq!(snapshots.cursor(&missed.0), 2);
        assert_eq!(snapshots.get(&missed.0).unwrap().current_quantity(), 3);
        assert_eq!(snapshots.get(&fresh.0).unwrap().current_quantity(), 5);
    }

    #[test]
    fn rebuild_replays_the_store_into_the_projection() {
        let d = dispatcher();
        let snapshots = Arc::new(SnapshotProjection::new(
            "vaccine_stock",
            "stock.vaccine",
            vaccine,
            Arc::new(InMemoryReadStore::new()),
        ));
        d.bus().subscribe(snapshots.clone());

        let id = VaccineId::new(AggregateId::new());
        d.dispatch(id.0, "stock.vaccine", &register(id), vaccine).unwrap();
        d.dispatch(id.0, "stock.vaccine", &dispense(id, 1), vaccine).unwrap();

        let report = d.rebuild(snapshots.as_ref()).unwrap();
        assert_eq!(report.events_replayed, 2);
        assert_eq!(report.aggregates, 1);
        assert_eq!(snapshots.get(&id.0).unwrap().current_quantity(), 4);
        assert_eq!(d.read_consistent(|| snapshots.cursor(&id.0)).unwrap(), 2);
    }

    #[test]
    fn domain_errors_map_onto_taxonomy() {
        let cases = [
            (DomainError::validation("x"), ErrorKind::Validation),
            (DomainError::transition("Done", "mark missed"), ErrorKind::InvalidStateTransition),
            (DomainError::insufficient_stock(2, 1), ErrorKind::InsufficientStock),
            (DomainError::not_found("vaccine"), ErrorKind::NotFound),
            (DomainError::conflict("stale"), ErrorKind::ConcurrencyConflict),
            (DomainError::invariant("broken"), ErrorKind::Internal),
        ];
        for (err, kind) in cases {
            assert_eq!(DispatchError::from(err).kind(), kind);
        }
        assert!(!DispatchError::Publish("bus down".to_string()).is_transient());
    }
}
