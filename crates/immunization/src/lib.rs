//! Immunization schedule domain module (event-sourced).
//!
//! One aggregate per scheduled vaccine dose, moving through
//! `Upcoming -> Done | Missed`. Stock consumption on administration is
//! coordinated by the infra layer; this crate only decides the transition.

pub mod dose;

pub use dose::{
    DoseAdministered, DoseCommand, DoseEvent, DoseMissed, DoseRescheduled, DoseScheduled,
    ImmunizationEvent, ImmunizationEventId, ImmunizationStatus, MarkDone, MarkMissed, Reschedule,
    ScheduleDose,
};
