//! `maternity-core`: domain foundation building blocks.
//!
//! This crate contains **pure domain** primitives shared by the stock ledger,
//! the immunization schedule and the prenatal tracker (no infrastructure concerns).

pub mod aggregate;
pub mod clinic_hours;
pub mod clock;
pub mod error;
pub mod id;

pub use aggregate::{Aggregate, AggregateRoot, ExpectedVersion};
pub use clinic_hours::ClinicHours;
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::{DomainError, DomainResult};
pub use id::{AggregateId, ChildId, PatientId};
