//! Infrastructure layer: event store, command dispatch, read models, and the
//! clinic services built on them.

pub mod command_dispatcher;
pub mod config;
pub mod event_store;
pub mod projections;
pub mod read_model;
pub mod retry;
pub mod services;


pub use command_dispatcher::{CommandDispatcher, DispatchError, ErrorKind, Loaded, UnitOfWork};
pub use config::{ConfigError, CoreConfig};
pub use retry::{RetryPolicy, retry_on_conflict};
pub use services::{
    BatchReport, CoreServices, ImmunizationEngine, LedgerAudit, NewPrenatalRecord,
    PrenatalTracker, StockLedger, VaccineRegistration,
};
