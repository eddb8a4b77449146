use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use maternity_core::{Aggregate, AggregateId, AggregateRoot, ClinicHours, DomainError};
use maternity_events::Event;

use crate::record::PrenatalRecordId;
use crate::vitals::{RiskMarker, Vitals};

/// Prenatal checkup identifier.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrenatalCheckupId(pub AggregateId);

impl PrenatalCheckupId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PrenatalCheckupId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Checkup lifecycle.
///
/// `Done`, `Cancelled` and `Rescheduled` are terminal. `Missed` is terminal
/// except for a single reschedule, which keeps the status `Missed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CheckupStatus {
    Upcoming,
    Done,
    Missed,
    Cancelled,
    Rescheduled,
}

/// What was observed at a completed visit.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CheckupFindings {
    pub vitals: Vitals,
    pub symptoms: String,
    pub findings: String,
    pub notes: String,
    pub risk: RiskMarker,
    pub next_visit: Option<NaiveDateTime>,
}

/// Aggregate root: PrenatalCheckup.
#[derive(Debug, Clone, PartialEq)]
pub struct PrenatalCheckup {
    id: PrenatalCheckupId,
    record_id: PrenatalRecordId,
    checkup_date: NaiveDate,
    checkup_time: NaiveTime,
    status: CheckupStatus,
    findings: Option<CheckupFindings>,
    missed_reason: Option<String>,
    missed_at: Option<NaiveDateTime>,
    cancel_reason: Option<String>,
    supersedes: Option<PrenatalCheckupId>,
    rescheduled_to: Option<PrenatalCheckupId>,
    version: u64,
    created: bool,
}

impl PrenatalCheckup {
    /// Create an empty, not-yet-scheduled aggregate instance for rehydration.
    pub fn empty(id: PrenatalCheckupId) -> Self {
        Self {
            id,
            record_id: PrenatalRecordId::new(AggregateId::from_uuid(Uuid::nil())),
            checkup_date: NaiveDate::MIN,
            checkup_time: NaiveTime::MIN,
            status: CheckupStatus::Upcoming,
            findings: None,
            missed_reason: None,
            missed_at: None,
            cancel_reason: None,
            supersedes: None,
            rescheduled_to: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PrenatalCheckupId {
        self.id
    }

    pub fn is_scheduled(&self) -> bool {
        self.created
    }

    pub fn record_id(&self) -> PrenatalRecordId {
        self.record_id
    }

    pub fn checkup_date(&self) -> NaiveDate {
        self.checkup_date
    }

    pub fn checkup_time(&self) -> NaiveTime {
        self.checkup_time
    }

    pub fn scheduled_at(&self) -> NaiveDateTime {
        self.checkup_date.and_time(self.checkup_time)
    }

    pub fn status(&self) -> CheckupStatus {
        self.status
    }

    pub fn findings(&self) -> Option<&CheckupFindings> {
        self.findings.as_ref()
    }

    pub fn missed_reason(&self) -> Option<&str> {
        self.missed_reason.as_deref()
    }

    pub fn missed_at(&self) -> Option<NaiveDateTime> {
        self.missed_at
    }

    pub fn cancel_reason(&self) -> Option<&str> {
        self.cancel_reason.as_deref()
    }

    pub fn supersedes(&self) -> Option<PrenatalCheckupId> {
        self.supersedes
    }

    pub fn rescheduled_to(&self) -> Option<PrenatalCheckupId> {
        self.rescheduled_to
    }

    pub fn next_visit(&self) -> Option<NaiveDateTime> {
        self.findings.as_ref().and_then(|f| f.next_visit)
    }

    /// Completed with abnormal vitals or an explicit high-risk marker.
    pub fn flags_high_risk(&self) -> bool {
        self.findings
            .as_ref()
            .is_some_and(|f| f.risk == RiskMarker::HighRisk || f.vitals.is_abnormal())
    }

    pub fn flags_monitor(&self) -> bool {
        self.findings
            .as_ref()
            .is_some_and(|f| f.risk == RiskMarker::Monitor)
    }
}

impl AggregateRoot for PrenatalCheckup {
    type Id = PrenatalCheckupId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ScheduleCheckup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleCheckup {
    pub checkup_id: PrenatalCheckupId,
    pub record_id: PrenatalRecordId,
    pub checkup_date: NaiveDate,
    pub checkup_time: NaiveTime,
    pub supersedes: Option<PrenatalCheckupId>,
    pub clinic_hours: ClinicHours,
    pub occurred_at: NaiveDateTime,
}

/// Command: CompleteCheckup. "Today" is `occurred_at`'s date.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompleteCheckup {
    pub checkup_id: PrenatalCheckupId,
    pub findings: CheckupFindings,
    pub clinic_hours: ClinicHours,
    pub occurred_at: NaiveDateTime,
}

/// Command: MarkCheckupMissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkCheckupMissed {
    pub checkup_id: PrenatalCheckupId,
    pub reason: String,
    pub occurred_at: NaiveDateTime,
}

/// Command: CancelCheckup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CancelCheckup {
    pub checkup_id: PrenatalCheckupId,
    pub reason: String,
    pub occurred_at: NaiveDateTime,
}

/// Command: RescheduleCheckup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RescheduleCheckup {
    pub checkup_id: PrenatalCheckupId,
    pub successor_id: PrenatalCheckupId,
    pub occurred_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CheckupCommand {
    ScheduleCheckup(ScheduleCheckup),
    CompleteCheckup(CompleteCheckup),
    MarkCheckupMissed(MarkCheckupMissed),
    CancelCheckup(CancelCheckup),
    RescheduleCheckup(RescheduleCheckup),
}

/// Event: CheckupScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckupScheduled {
    pub checkup_id: PrenatalCheckupId,
    pub record_id: PrenatalRecordId,
    pub checkup_date: NaiveDate,
    pub checkup_time: NaiveTime,
    pub supersedes: Option<PrenatalCheckupId>,
    pub occurred_at: NaiveDateTime,
}

/// Event: CheckupCompleted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CheckupCompleted {
    pub checkup_id: PrenatalCheckupId,
    pub findings: CheckupFindings,
    pub occurred_at: NaiveDateTime,
}

/// Event: CheckupMissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckupMissed {
    pub checkup_id: PrenatalCheckupId,
    pub reason: String,
    pub occurred_at: NaiveDateTime,
}

/// Event: CheckupCancelled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckupCancelled {
    pub checkup_id: PrenatalCheckupId,
    pub reason: String,
    pub occurred_at: NaiveDateTime,
}

/// Event: CheckupRescheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckupRescheduled {
    pub checkup_id: PrenatalCheckupId,
    pub successor_id: PrenatalCheckupId,
    pub occurred_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CheckupEvent {
    CheckupScheduled(CheckupScheduled),
    CheckupCompleted(CheckupCompleted),
    CheckupMissed(CheckupMissed),
    CheckupCancelled(CheckupCancelled),
    CheckupRescheduled(CheckupRescheduled),
}

impl Event for CheckupEvent {
    fn event_type(&self) -> &'static str {
        match self {
            CheckupEvent::CheckupScheduled(_) => "prenatal.checkup.scheduled",
            CheckupEvent::CheckupCompleted(_) => "prenatal.checkup.completed",
            CheckupEvent::CheckupMissed(_) => "prenatal.checkup.missed",
            CheckupEvent::CheckupCancelled(_) => "prenatal.checkup.cancelled",
            CheckupEvent::CheckupRescheduled(_) => "prenatal.checkup.rescheduled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> NaiveDateTime {
        match self {
            CheckupEvent::CheckupScheduled(e) => e.occurred_at,
            CheckupEvent::CheckupCompleted(e) => e.occurred_at,
            CheckupEvent::CheckupMissed(e) => e.occurred_at,
            CheckupEvent::CheckupCancelled(e) => e.occurred_at,
            CheckupEvent::CheckupRescheduled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PrenatalCheckup {
    type Command = CheckupCommand;
    type Event = CheckupEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            CheckupEvent::CheckupScheduled(e) => {
                self.id = e.checkup_id;
                self.record_id = e.record_id;
                self.checkup_date = e.checkup_date;
                self.checkup_time = e.checkup_time;
                self.supersedes = e.supersedes;
                self.status = CheckupStatus::Upcoming;
                self.created = true;
            }
            CheckupEvent::CheckupCompleted(e) => {
                self.status = CheckupStatus::Done;
                self.findings = Some(e.findings.clone());
            }
            CheckupEvent::CheckupMissed(e) => {
                self.status = CheckupStatus::Missed;
                self.missed_reason = Some(e.reason.clone());
                self.missed_at = Some(e.occurred_at);
            }
            CheckupEvent::CheckupCancelled(e) => {
                self.status = CheckupStatus::Cancelled;
                self.cancel_reason = Some(e.reason.clone());
            }
            CheckupEvent::CheckupRescheduled(e) => {
                // A missed visit keeps its status and reason as history.
                if self.status == CheckupStatus::Upcoming {
                    self.status = CheckupStatus::Rescheduled;
                }
                self.rescheduled_to = Some(e.successor_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            CheckupCommand::ScheduleCheckup(cmd) => self.handle_schedule(cmd),
            CheckupCommand::CompleteCheckup(cmd) => self.handle_complete(cmd),
            CheckupCommand::MarkCheckupMissed(cmd) => self.handle_missed(cmd),
            CheckupCommand::CancelCheckup(cmd) => self.handle_cancel(cmd),
            CheckupCommand::RescheduleCheckup(cmd) => self.handle_reschedule(cmd),
        }
    }
}

impl PrenatalCheckup {
    fn ensure_scheduled(&self, checkup_id: PrenatalCheckupId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("prenatal checkup {checkup_id}")));
        }
        if self.id != checkup_id {
            return Err(DomainError::invariant("checkup_id mismatch"));
        }
        Ok(())
    }

    fn ensure_upcoming(&self, action: &str) -> Result<(), DomainError> {
        if self.status == CheckupStatus::Upcoming {
            Ok(())
        } else {
            Err(DomainError::transition(self.status, action))
        }
    }

    fn handle_schedule(&self, cmd: &ScheduleCheckup) -> Result<Vec<CheckupEvent>, DomainError> {
        if self.created {
            return Err(DomainError::validation(format!(
                "prenatal checkup {} already exists",
                cmd.checkup_id
            )));
        }
        cmd.clinic_hours
            .ensure_contains(cmd.checkup_time, "checkup time")?;

        Ok(vec![CheckupEvent::CheckupScheduled(CheckupScheduled {
            checkup_id: cmd.checkup_id,
            record_id: cmd.record_id,
            checkup_date: cmd.checkup_date,
            checkup_time: cmd.checkup_time,
            supersedes: cmd.supersedes,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteCheckup) -> Result<Vec<CheckupEvent>, DomainError> {
        self.ensure_scheduled(cmd.checkup_id)?;
        self.ensure_upcoming("complete")?;

        let today = cmd.occurred_at.date();
        if self.checkup_date > today {
            return Err(DomainError::validation(format!(
                "checkup dated {} cannot be completed before it happens (today is {today})",
                self.checkup_date
            )));
        }
        cmd.findings.vitals.validate()?;
        if let Some(next) = cmd.findings.next_visit {
            if next.date() <= self.checkup_date {
                return Err(DomainError::validation(
                    "next visit must be after the checkup date",
                ));
            }
            cmd.clinic_hours.ensure_contains(next.time(), "next visit time")?;
        }

        Ok(vec![CheckupEvent::CheckupCompleted(CheckupCompleted {
            checkup_id: cmd.checkup_id,
            findings: cmd.findings.clone(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_missed(&self, cmd: &MarkCheckupMissed) -> Result<Vec<CheckupEvent>, DomainError> {
        self.ensure_scheduled(cmd.checkup_id)?;
        self.ensure_upcoming("mark missed")?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation(
                "a reason is required to mark a checkup missed",
            ));
        }

        Ok(vec![CheckupEvent::CheckupMissed(CheckupMissed {
            checkup_id: cmd.checkup_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_cancel(&self, cmd: &CancelCheckup) -> Result<Vec<CheckupEvent>, DomainError> {
        self.ensure_scheduled(cmd.checkup_id)?;
        self.ensure_upcoming("cancel")?;

        Ok(vec![CheckupEvent::CheckupCancelled(CheckupCancelled {
            checkup_id: cmd.checkup_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reschedule(&self, cmd: &RescheduleCheckup) -> Result<Vec<CheckupEvent>, DomainError> {
        self.ensure_scheduled(cmd.checkup_id)?;

        let reschedulable = self.rescheduled_to.is_none()
            && matches!(self.status, CheckupStatus::Upcoming | CheckupStatus::Missed);
        if !reschedulable {
            return Err(DomainError::transition(self.status, "reschedule"));
        }
        if cmd.successor_id == self.id {
            return Err(DomainError::invariant("a checkup cannot be rescheduled onto itself"));
        }

        Ok(vec![CheckupEvent::CheckupRescheduled(CheckupRescheduled {
            checkup_id: cmd.checkup_id,
            successor_id: cmd.successor_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vitals::BloodPressure;
    use maternity_events::execute;

    fn test_checkup_id() -> PrenatalCheckupId {
        PrenatalCheckupId::new(AggregateId::new())
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 7, d).unwrap()
    }

    fn at(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn now() -> NaiveDateTime {
        day(15).and_time(at(11))
    }

    fn scheduled_on(date: NaiveDate) -> PrenatalCheckup {
        let checkup_id = test_checkup_id();
        let mut checkup = PrenatalCheckup::empty(checkup_id);
        execute(
            &mut checkup,
            &CheckupCommand::ScheduleCheckup(ScheduleCheckup {
                checkup_id,
                record_id: PrenatalRecordId::new(AggregateId::new()),
                checkup_date: date,
                checkup_time: at(10),
                supersedes: None,
                clinic_hours: ClinicHours::default(),
                occurred_at: now(),
            }),
        )
        .unwrap();
        checkup
    }

    fn complete(checkup: &PrenatalCheckup, findings: CheckupFindings) -> CheckupCommand {
        CheckupCommand::CompleteCheckup(CompleteCheckup {
            checkup_id: checkup.id_typed(),
            findings,
            clinic_hours: ClinicHours::default(),
            occurred_at: now(),
        })
    }

    fn missed(checkup: &PrenatalCheckup, reason: &str) -> CheckupCommand {
        CheckupCommand::MarkCheckupMissed(MarkCheckupMissed {
            checkup_id: checkup.id_typed(),
            reason: reason.to_string(),
            occurred_at: now(),
        })
    }

    fn findings_with_bp(systolic: u16, diastolic: u16) -> CheckupFindings {
        CheckupFindings {
            vitals: Vitals {
                weight_kg: Some(68.5),
                blood_pressure: Some(BloodPressure::new(systolic, diastolic).unwrap()),
                fetal_heart_rate: Some(142),
                fundal_height_cm: Some(26.0),
                presentation: None,
            },
            next_visit: Some(day(29).and_time(at(9))),
            ..CheckupFindings::default()
        }
    }

    #[test]
    fn complete_records_findings() {
        let mut checkup = scheduled_on(day(15));
        let cmd = complete(&checkup, findings_with_bp(118, 75));
        execute(&mut checkup, &cmd).unwrap();

        assert_eq!(checkup.status(), CheckupStatus::Done);
        assert_eq!(checkup.next_visit(), Some(day(29).and_time(at(9))));
        assert!(!checkup.flags_high_risk());
    }

    #[test]
    fn hypertensive_reading_flags_high_risk() {
        let mut checkup = scheduled_on(day(14));
        let cmd = complete(&checkup, findings_with_bp(150, 95));
        execute(&mut checkup, &cmd).unwrap();
        assert!(checkup.flags_high_risk());
    }

    #[test]
    fn future_checkup_cannot_be_completed() {
        let checkup = scheduled_on(day(16));
        let err = checkup
            .handle(&complete(&checkup, CheckupFindings::default()))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("before it happens")));
    }

    #[test]
    fn next_visit_must_follow_checkup_and_be_in_clinic_hours() {
        let checkup = scheduled_on(day(15));

        let mut findings = CheckupFindings::default();
        findings.next_visit = Some(day(15).and_time(at(12)));
        assert!(matches!(
            checkup.handle(&complete(&checkup, findings)),
            Err(DomainError::Validation(_))
        ));

        let mut findings = CheckupFindings::default();
        findings.next_visit = Some(day(22).and_time(at(19)));
        assert!(matches!(
            checkup.handle(&complete(&checkup, findings)),
            Err(DomainError::Validation(msg)) if msg.contains("clinic hours")
        ));
    }

    #[test]
    fn missed_requires_reason_and_stamps_time() {
        let mut checkup = scheduled_on(day(10));
        assert!(matches!(
            checkup.handle(&missed(&checkup, "")),
            Err(DomainError::Validation(_))
        ));

        let cmd = missed(&checkup, "no transport");
        execute(&mut checkup, &cmd).unwrap();
        assert_eq!(checkup.status(), CheckupStatus::Missed);
        assert_eq!(checkup.missed_reason(), Some("no transport"));
        assert_eq!(checkup.missed_at(), Some(now()));
    }

    #[test]
    fn rescheduling_missed_keeps_missed_status_and_reason() {
        let mut checkup = scheduled_on(day(10));
        let cmd = missed(&checkup, "no transport");
        execute(&mut checkup, &cmd).unwrap();

        let successor = test_checkup_id();
        let cmd = CheckupCommand::RescheduleCheckup(RescheduleCheckup {
            checkup_id: checkup.id_typed(),
            successor_id: successor,
            occurred_at: now(),
        });
        execute(&mut checkup, &cmd).unwrap();

        assert_eq!(checkup.status(), CheckupStatus::Missed);
        assert_eq!(checkup.missed_reason(), Some("no transport"));
        assert_eq!(checkup.rescheduled_to(), Some(successor));
        assert!(matches!(
            checkup.handle(&cmd),
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn rescheduling_upcoming_marks_it_rescheduled() {
        let mut checkup = scheduled_on(day(20));
        let cmd = CheckupCommand::RescheduleCheckup(RescheduleCheckup {
            checkup_id: checkup.id_typed(),
            successor_id: test_checkup_id(),
            occurred_at: now(),
        });
        execute(&mut checkup, &cmd).unwrap();
        assert_eq!(checkup.status(), CheckupStatus::Rescheduled);
    }

    #[test]
    fn terminal_states_reject_further_transitions() {
        let mut done = scheduled_on(day(15));
        let cmd = complete(&done, CheckupFindings::default());
        execute(&mut done, &cmd).unwrap();
        assert!(matches!(
            done.handle(&missed(&done, "late")),
            Err(DomainError::InvalidStateTransition { .. })
        ));

        let mut cancelled = scheduled_on(day(20));
        let cmd = CheckupCommand::CancelCheckup(CancelCheckup {
            checkup_id: cancelled.id_typed(),
            reason: "moved away".to_string(),
            occurred_at: now(),
        });
        execute(&mut cancelled, &cmd).unwrap();
        let reschedule = CheckupCommand::RescheduleCheckup(RescheduleCheckup {
            checkup_id: cancelled.id_typed(),
            successor_id: test_checkup_id(),
            occurred_at: now(),
        });
        assert!(matches!(
            cancelled.handle(&reschedule),
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn schedule_outside_clinic_hours_is_rejected() {
        let checkup_id = test_checkup_id();
        let cmd = CheckupCommand::ScheduleCheckup(ScheduleCheckup {
            checkup_id,
            record_id: PrenatalRecordId::new(AggregateId::new()),
            checkup_date: day(20),
            checkup_time: NaiveTime::from_hms_opt(4, 30, 0).unwrap(),
            supersedes: None,
            clinic_hours: ClinicHours::default(),
            occurred_at: now(),
        });
        assert!(matches!(
            PrenatalCheckup::empty(checkup_id).handle(&cmd),
            Err(DomainError::Validation(_))
        ));
    }
}
