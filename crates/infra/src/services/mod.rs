//! The three clinic services and their wiring.
//!
//! Each service owns one family of aggregates, writes through the shared
//! [`Dispatcher`] and answers queries from its own snapshot projections.
//! The immunization engine reaches the stock ledger only through
//! [`StockLedger::stage_transaction`].

pub mod immunization_engine;
pub mod prenatal_tracker;
pub mod stock_ledger;

use std::sync::Arc;

use maternity_core::{AggregateId, Clock};

use crate::command_dispatcher::{CommandDispatcher, DispatchError, ErrorKind};
use crate::config::CoreConfig;
use crate::event_store::{EventStore, InMemoryEventStore};
use crate::projections::{Projection, ProjectionBus, ReplayReport, SnapshotProjection};
use crate::read_model::InMemoryReadStore;

pub use immunization_engine::ImmunizationEngine;
pub use prenatal_tracker::{BatchReport, NewPrenatalRecord, PrenatalTracker};
pub use stock_ledger::{LedgerAudit, StockLedger, VaccineRegistration};

/// Dispatcher shared by every service.
pub type Dispatcher = CommandDispatcher<Arc<dyn EventStore>, Arc<ProjectionBus>>;

/// Latest state of every aggregate of one type, kept in memory.
pub type Snapshots<A> = SnapshotProjection<A, Arc<InMemoryReadStore<AggregateId, A>>>;

/// Stream type names.
pub mod aggregate_types {
    pub const VACCINE_STOCK: &str = "stock.vaccine";
    pub const IMMUNIZATION_DOSE: &str = "immunization.dose";
    pub const PRENATAL_RECORD: &str = "prenatal.record";
    pub const PRENATAL_CHECKUP: &str = "prenatal.checkup";
}

/// The assembled core: one store, one bus, three services.
#[derive(Clone)]
pub struct CoreServices {
    pub dispatcher: Arc<Dispatcher>,
    pub stock: Arc<StockLedger>,
    pub immunization: Arc<ImmunizationEngine>,
    pub prenatal: Arc<PrenatalTracker>,
}

impl CoreServices {
    /// Wire the services over `store`. Projections subscribe before any
    /// command can run.
    pub fn new(store: Arc<dyn EventStore>, config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let dispatcher = Arc::new(CommandDispatcher::new(store, Arc::new(ProjectionBus::new())));

        let stock = Arc::new(StockLedger::new(dispatcher.clone(), config.clone(), clock.clone()));
        let immunization = Arc::new(ImmunizationEngine::new(
            dispatcher.clone(),
            stock.clone(),
            config.clone(),
            clock.clone(),
        ));
        let prenatal = Arc::new(PrenatalTracker::new(dispatcher.clone(), config, clock));

        Self {
            dispatcher,
            stock,
            immunization,
            prenatal,
        }
    }

    pub fn in_memory(config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        Self::new(Arc::new(InMemoryEventStore::new()), config, clock)
    }

    /// Drop every read model and replay it from the event store.
    ///
    /// Each projection is rebuilt while commits are held back, so writes made
    /// during a rebuild are never lost from the read side.
    pub fn rebuild_read_models(&self) -> Result<Vec<ReplayReport>, DispatchError> {
        let mut reports = Vec::new();
        for projection in self.dispatcher.bus().subscribers() {
            let report = self.dispatcher.rebuild(projection.as_ref())?;
            tracing::info!(
                projection = report.projection,
                events = report.events_replayed,
                aggregates = report.aggregates,
                "read model rebuilt"
            );
            reports.push(report);
        }
        Ok(reports)
    }
}

/// Create a snapshot projection and subscribe it to the dispatcher's bus.
pub(crate) fn subscribe_snapshots<A>(
    dispatcher: &Dispatcher,
    name: &'static str,
    aggregate_type: &'static str,
    make_empty: fn(AggregateId) -> A,
) -> Arc<Snapshots<A>>
where
    A: maternity_core::Aggregate + Clone + Send + Sync + 'static,
    A::Event: serde::de::DeserializeOwned,
{
    let projection = Arc::new(SnapshotProjection::new(
        name,
        aggregate_type,
        make_empty,
        Arc::new(InMemoryReadStore::new()),
    ));
    dispatcher
        .bus()
        .subscribe(projection.clone() as Arc<dyn Projection>);
    projection
}

/// Log a rejected or failed operation and pass the result through.
pub(crate) fn traced<T>(
    operation: &'static str,
    result: Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    if let Err(err) = &result {
        match err.kind() {
            ErrorKind::Internal => {
                tracing::error!(operation, error = %err, "operation failed")
            }
            kind => tracing::warn!(operation, ?kind, error = %err, "operation rejected"),
        }
    }
    result
}
