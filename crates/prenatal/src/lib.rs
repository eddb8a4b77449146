//! Prenatal care domain module (event-sourced).
//!
//! Two aggregates: the pregnancy record (whose status is a derived projection
//! of its checkups and the calendar) and the individual checkup visit.

pub mod checkup;
pub mod gestation;
pub mod record;
pub mod status;
pub mod vitals;

pub use checkup::{
    CancelCheckup, CheckupCancelled, CheckupCommand, CheckupCompleted, CheckupEvent,
    CheckupFindings, CheckupMissed, CheckupRescheduled, CheckupScheduled, CheckupStatus,
    CompleteCheckup, MarkCheckupMissed, PrenatalCheckup, PrenatalCheckupId, RescheduleCheckup,
    ScheduleCheckup,
};
pub use gestation::{Trimester, expected_due_date, gestational_age_weeks};
pub use record::{
    CompleteRecord, GestationalAgeUpdated, OpenRecord, PrenatalRecord, PrenatalRecordId,
    RecomputeStatus, RecordCommand, RecordCompleted, RecordEvent, RecordOpened, RecordStatus,
    StatusRecomputed, UpdateGestationalAge,
};
pub use status::{CheckupFacts, derive_status};
pub use vitals::{BloodPressure, FetalPresentation, RiskMarker, Vitals};
