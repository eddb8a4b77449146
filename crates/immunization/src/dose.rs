use chrono::{Days, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use maternity_core::{Aggregate, AggregateId, AggregateRoot, ChildId, ClinicHours, DomainError};
use maternity_events::Event;
use maternity_stock::VaccineId;

/// Immunization event identifier (one stream per scheduled dose instance).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ImmunizationEventId(pub AggregateId);

impl ImmunizationEventId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for ImmunizationEventId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Dose lifecycle. `Done` and `Missed` are terminal for the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImmunizationStatus {
    Upcoming,
    Done,
    Missed,
}

/// Aggregate root: ImmunizationEvent (one scheduled dose for one child).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImmunizationEvent {
    id: ImmunizationEventId,
    child_id: ChildId,
    vaccine_id: VaccineId,
    dose_label: String,
    scheduled_date: NaiveDate,
    scheduled_time: NaiveTime,
    status: ImmunizationStatus,
    notes: String,
    next_due_date: Option<NaiveDate>,
    missed_reason: Option<String>,
    completed_at: Option<NaiveDateTime>,
    supersedes: Option<ImmunizationEventId>,
    superseded_by: Option<ImmunizationEventId>,
    version: u64,
    created: bool,
}

impl ImmunizationEvent {
    /// Create an empty, not-yet-scheduled aggregate instance for rehydration.
    pub fn empty(id: ImmunizationEventId) -> Self {
        Self {
            id,
            child_id: ChildId::from_uuid(Uuid::nil()),
            vaccine_id: VaccineId::new(AggregateId::from_uuid(Uuid::nil())),
            dose_label: String::new(),
            scheduled_date: NaiveDate::MIN,
            scheduled_time: NaiveTime::MIN,
            status: ImmunizationStatus::Upcoming,
            notes: String::new(),
            next_due_date: None,
            missed_reason: None,
            completed_at: None,
            supersedes: None,
            superseded_by: None,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> ImmunizationEventId {
        self.id
    }

    pub fn is_scheduled(&self) -> bool {
        self.created
    }

    pub fn child_id(&self) -> ChildId {
        self.child_id
    }

    pub fn vaccine_id(&self) -> VaccineId {
        self.vaccine_id
    }

    pub fn dose_label(&self) -> &str {
        &self.dose_label
    }

    pub fn scheduled_date(&self) -> NaiveDate {
        self.scheduled_date
    }

    pub fn scheduled_time(&self) -> NaiveTime {
        self.scheduled_time
    }

    pub fn scheduled_at(&self) -> NaiveDateTime {
        self.scheduled_date.and_time(self.scheduled_time)
    }

    pub fn status(&self) -> ImmunizationStatus {
        self.status
    }

    pub fn notes(&self) -> &str {
        &self.notes
    }

    pub fn next_due_date(&self) -> Option<NaiveDate> {
        self.next_due_date
    }

    pub fn missed_reason(&self) -> Option<&str> {
        self.missed_reason.as_deref()
    }

    /// When the dose was administered or marked missed.
    pub fn completed_at(&self) -> Option<NaiveDateTime> {
        self.completed_at
    }

    pub fn supersedes(&self) -> Option<ImmunizationEventId> {
        self.supersedes
    }

    pub fn superseded_by(&self) -> Option<ImmunizationEventId> {
        self.superseded_by
    }

    /// Upcoming and not replaced by a rescheduled instance.
    pub fn is_active(&self) -> bool {
        self.created
            && self.status == ImmunizationStatus::Upcoming
            && self.superseded_by.is_none()
    }

    /// Active and its scheduled date and time have passed.
    pub fn is_overdue(&self, now: NaiveDateTime) -> bool {
        self.is_active() && self.scheduled_at() < now
    }

    /// Active and scheduled between `today` and `today + days` (inclusive).
    pub fn is_due_within(&self, today: NaiveDate, days: u32) -> bool {
        let horizon = today
            .checked_add_days(Days::new(u64::from(days)))
            .unwrap_or(NaiveDate::MAX);
        self.is_active() && self.scheduled_date >= today && self.scheduled_date <= horizon
    }
}

impl AggregateRoot for ImmunizationEvent {
    type Id = ImmunizationEventId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: ScheduleDose.
///
/// Carries the scheduling context (clinic hours, vaccine expiry) looked up by
/// the caller, so the decision stays pure.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleDose {
    pub event_id: ImmunizationEventId,
    pub child_id: ChildId,
    pub vaccine_id: VaccineId,
    pub dose_label: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub next_due_date: Option<NaiveDate>,
    /// Set when this instance replaces a rescheduled one.
    pub supersedes: Option<ImmunizationEventId>,
    pub clinic_hours: ClinicHours,
    pub vaccine_expiry: NaiveDate,
    pub occurred_at: NaiveDateTime,
}

/// Command: MarkDone.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkDone {
    pub event_id: ImmunizationEventId,
    pub notes: String,
    pub next_due_date: Option<NaiveDate>,
    pub occurred_at: NaiveDateTime,
}

/// Command: MarkMissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarkMissed {
    pub event_id: ImmunizationEventId,
    pub reason: String,
    pub occurred_at: NaiveDateTime,
}

/// Command: Reschedule (hand this instance over to `successor_id`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reschedule {
    pub event_id: ImmunizationEventId,
    pub successor_id: ImmunizationEventId,
    pub occurred_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseCommand {
    ScheduleDose(ScheduleDose),
    MarkDone(MarkDone),
    MarkMissed(MarkMissed),
    Reschedule(Reschedule),
}

/// Event: DoseScheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseScheduled {
    pub event_id: ImmunizationEventId,
    pub child_id: ChildId,
    pub vaccine_id: VaccineId,
    pub dose_label: String,
    pub scheduled_date: NaiveDate,
    pub scheduled_time: NaiveTime,
    pub next_due_date: Option<NaiveDate>,
    pub supersedes: Option<ImmunizationEventId>,
    pub occurred_at: NaiveDateTime,
}

/// Event: DoseAdministered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseAdministered {
    pub event_id: ImmunizationEventId,
    pub vaccine_id: VaccineId,
    pub notes: String,
    pub next_due_date: Option<NaiveDate>,
    pub occurred_at: NaiveDateTime,
}

/// Event: DoseMissed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseMissed {
    pub event_id: ImmunizationEventId,
    pub reason: String,
    pub occurred_at: NaiveDateTime,
}

/// Event: DoseRescheduled.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DoseRescheduled {
    pub event_id: ImmunizationEventId,
    pub successor_id: ImmunizationEventId,
    pub occurred_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum DoseEvent {
    DoseScheduled(DoseScheduled),
    DoseAdministered(DoseAdministered),
    DoseMissed(DoseMissed),
    DoseRescheduled(DoseRescheduled),
}

impl Event for DoseEvent {
    fn event_type(&self) -> &'static str {
        match self {
            DoseEvent::DoseScheduled(_) => "immunization.dose.scheduled",
            DoseEvent::DoseAdministered(_) => "immunization.dose.administered",
            DoseEvent::DoseMissed(_) => "immunization.dose.missed",
            DoseEvent::DoseRescheduled(_) => "immunization.dose.rescheduled",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> NaiveDateTime {
        match self {
            DoseEvent::DoseScheduled(e) => e.occurred_at,
            DoseEvent::DoseAdministered(e) => e.occurred_at,
            DoseEvent::DoseMissed(e) => e.occurred_at,
            DoseEvent::DoseRescheduled(e) => e.occurred_at,
        }
    }
}

impl Aggregate for ImmunizationEvent {
    type Command = DoseCommand;
    type Event = DoseEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            DoseEvent::DoseScheduled(e) => {
                self.id = e.event_id;
                self.child_id = e.child_id;
                self.vaccine_id = e.vaccine_id;
                self.dose_label = e.dose_label.clone();
                self.scheduled_date = e.scheduled_date;
                self.scheduled_time = e.scheduled_time;
                self.next_due_date = e.next_due_date;
                self.supersedes = e.supersedes;
                self.status = ImmunizationStatus::Upcoming;
                self.created = true;
            }
            DoseEvent::DoseAdministered(e) => {
                self.status = ImmunizationStatus::Done;
                self.notes = e.notes.clone();
                if e.next_due_date.is_some() {
                    self.next_due_date = e.next_due_date;
                }
                self.completed_at = Some(e.occurred_at);
            }
            DoseEvent::DoseMissed(e) => {
                self.status = ImmunizationStatus::Missed;
                self.missed_reason = Some(e.reason.clone());
                self.completed_at = Some(e.occurred_at);
            }
            DoseEvent::DoseRescheduled(e) => {
                self.superseded_by = Some(e.successor_id);
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            DoseCommand::ScheduleDose(cmd) => self.handle_schedule(cmd),
            DoseCommand::MarkDone(cmd) => self.handle_mark_done(cmd),
            DoseCommand::MarkMissed(cmd) => self.handle_mark_missed(cmd),
            DoseCommand::Reschedule(cmd) => self.handle_reschedule(cmd),
        }
    }
}

impl ImmunizationEvent {
    fn state_label(&self) -> String {
        match self.superseded_by {
            Some(successor) => format!("{:?} (rescheduled to {successor})", self.status),
            None => format!("{:?}", self.status),
        }
    }

    fn ensure_scheduled(&self, event_id: ImmunizationEventId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("immunization event {event_id}")));
        }
        if self.id != event_id {
            return Err(DomainError::invariant("event_id mismatch"));
        }
        Ok(())
    }

    /// Only an active (Upcoming, not superseded) dose may be completed.
    fn ensure_active(&self, action: &str) -> Result<(), DomainError> {
        if self.is_active() {
            Ok(())
        } else {
            Err(DomainError::InvalidStateTransition {
                from: self.state_label(),
                action: action.to_string(),
            })
        }
    }

    fn handle_schedule(&self, cmd: &ScheduleDose) -> Result<Vec<DoseEvent>, DomainError> {
        if self.created {
            return Err(DomainError::validation(format!(
                "immunization event {} already exists",
                cmd.event_id
            )));
        }
        if cmd.dose_label.trim().is_empty() {
            return Err(DomainError::validation("dose label cannot be empty"));
        }
        cmd.clinic_hours
            .ensure_contains(cmd.scheduled_time, "scheduled time")?;
        if cmd.scheduled_date > cmd.vaccine_expiry {
            return Err(DomainError::validation(format!(
                "scheduled date {} is after the vaccine expiry date {}",
                cmd.scheduled_date, cmd.vaccine_expiry
            )));
        }
        if let Some(next) = cmd.next_due_date {
            if next <= cmd.scheduled_date {
                return Err(DomainError::validation(
                    "next due date must be after the scheduled date",
                ));
            }
        }

        Ok(vec![DoseEvent::DoseScheduled(DoseScheduled {
            event_id: cmd.event_id,
            child_id: cmd.child_id,
            vaccine_id: cmd.vaccine_id,
            dose_label: cmd.dose_label.trim().to_string(),
            scheduled_date: cmd.scheduled_date,
            scheduled_time: cmd.scheduled_time,
            next_due_date: cmd.next_due_date,
            supersedes: cmd.supersedes,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_done(&self, cmd: &MarkDone) -> Result<Vec<DoseEvent>, DomainError> {
        self.ensure_scheduled(cmd.event_id)?;
        self.ensure_active("mark done")?;

        if let Some(next) = cmd.next_due_date {
            if next <= self.scheduled_date {
                return Err(DomainError::validation(
                    "next due date must be after the administered dose's date",
                ));
            }
        }

        Ok(vec![DoseEvent::DoseAdministered(DoseAdministered {
            event_id: cmd.event_id,
            vaccine_id: self.vaccine_id,
            notes: cmd.notes.clone(),
            next_due_date: cmd.next_due_date,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_mark_missed(&self, cmd: &MarkMissed) -> Result<Vec<DoseEvent>, DomainError> {
        self.ensure_scheduled(cmd.event_id)?;
        self.ensure_active("mark missed")?;

        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("a reason is required to mark a dose missed"));
        }

        Ok(vec![DoseEvent::DoseMissed(DoseMissed {
            event_id: cmd.event_id,
            reason: cmd.reason.trim().to_string(),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_reschedule(&self, cmd: &Reschedule) -> Result<Vec<DoseEvent>, DomainError> {
        self.ensure_scheduled(cmd.event_id)?;

        let reschedulable = self.superseded_by.is_none()
            && matches!(
                self.status,
                ImmunizationStatus::Upcoming | ImmunizationStatus::Missed
            );
        if !reschedulable {
            return Err(DomainError::InvalidStateTransition {
                from: self.state_label(),
                action: "reschedule".to_string(),
            });
        }
        if cmd.successor_id == self.id {
            return Err(DomainError::invariant("a dose cannot be rescheduled onto itself"));
        }

        Ok(vec![DoseEvent::DoseRescheduled(DoseRescheduled {
            event_id: cmd.event_id,
            successor_id: cmd.successor_id,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maternity_events::execute;

    fn test_event_id() -> ImmunizationEventId {
        ImmunizationEventId::new(AggregateId::new())
    }

    fn test_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 3)
            .unwrap()
            .and_hms_opt(8, 0, 0)
            .unwrap()
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 6, d).unwrap()
    }

    fn at(h: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, 0, 0).unwrap()
    }

    fn schedule_cmd(event_id: ImmunizationEventId, date: NaiveDate, time: NaiveTime) -> ScheduleDose {
        ScheduleDose {
            event_id,
            child_id: ChildId::new(),
            vaccine_id: VaccineId::new(AggregateId::new()),
            dose_label: "1st dose".to_string(),
            scheduled_date: date,
            scheduled_time: time,
            next_due_date: None,
            supersedes: None,
            clinic_hours: ClinicHours::default(),
            vaccine_expiry: day(30),
            occurred_at: test_time(),
        }
    }

    fn scheduled() -> ImmunizationEvent {
        let event_id = test_event_id();
        let mut event = ImmunizationEvent::empty(event_id);
        execute(
            &mut event,
            &DoseCommand::ScheduleDose(schedule_cmd(event_id, day(10), at(9))),
        )
        .unwrap();
        event
    }

    fn mark_done(event: &ImmunizationEvent) -> DoseCommand {
        DoseCommand::MarkDone(MarkDone {
            event_id: event.id_typed(),
            notes: "left thigh".to_string(),
            next_due_date: Some(day(24)),
            occurred_at: test_time(),
        })
    }

    fn mark_missed(event: &ImmunizationEvent) -> DoseCommand {
        DoseCommand::MarkMissed(MarkMissed {
            event_id: event.id_typed(),
            reason: "child had fever".to_string(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn schedule_emits_upcoming_dose() {
        let event = scheduled();
        assert_eq!(event.status(), ImmunizationStatus::Upcoming);
        assert_eq!(event.dose_label(), "1st dose");
        assert_eq!(event.scheduled_at(), day(10).and_time(at(9)));
        assert!(event.is_active());
        assert_eq!(event.version(), 1);
    }

    #[test]
    fn schedule_outside_clinic_hours_is_rejected() {
        let event_id = test_event_id();
        let cmd = DoseCommand::ScheduleDose(schedule_cmd(event_id, day(10), at(18)));
        let err = ImmunizationEvent::empty(event_id).handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("clinic hours")));
    }

    #[test]
    fn schedule_after_vaccine_expiry_is_rejected() {
        let event_id = test_event_id();
        let mut cmd = schedule_cmd(event_id, day(10), at(9));
        cmd.vaccine_expiry = day(9);
        let err = ImmunizationEvent::empty(event_id)
            .handle(&DoseCommand::ScheduleDose(cmd))
            .unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("expiry")));
    }

    #[test]
    fn mark_done_moves_upcoming_to_done() {
        let mut event = scheduled();
        let cmd = mark_done(&event);
        let events = execute(&mut event, &cmd).unwrap();

        match &events[0] {
            DoseEvent::DoseAdministered(e) => assert_eq!(e.vaccine_id, event.vaccine_id()),
            _ => panic!("Expected DoseAdministered event"),
        }
        assert_eq!(event.status(), ImmunizationStatus::Done);
        assert_eq!(event.next_due_date(), Some(day(24)));
        assert_eq!(event.notes(), "left thigh");
        assert!(!event.is_active());
    }

    #[test]
    fn mark_missed_on_done_event_is_invalid_and_keeps_done() {
        let mut event = scheduled();
        let cmd = mark_done(&event);
        execute(&mut event, &cmd).unwrap();

        let cmd = mark_missed(&event);
        let err = execute(&mut event, &cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
        assert_eq!(event.status(), ImmunizationStatus::Done);
    }

    #[test]
    fn mark_done_twice_is_invalid() {
        let mut event = scheduled();
        let cmd = mark_done(&event);
        execute(&mut event, &cmd).unwrap();
        let err = event.handle(&cmd).unwrap_err();
        match err {
            DomainError::InvalidStateTransition { from, action } => {
                assert_eq!(from, "Done");
                assert_eq!(action, "mark done");
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn mark_missed_requires_reason() {
        let event = scheduled();
        let cmd = DoseCommand::MarkMissed(MarkMissed {
            event_id: event.id_typed(),
            reason: "  ".to_string(),
            occurred_at: test_time(),
        });
        assert!(matches!(event.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn missed_dose_can_be_rescheduled_once() {
        let mut event = scheduled();
        let cmd = mark_missed(&event);
        execute(&mut event, &cmd).unwrap();

        let successor = test_event_id();
        let cmd = DoseCommand::Reschedule(Reschedule {
            event_id: event.id_typed(),
            successor_id: successor,
            occurred_at: test_time(),
        });
        execute(&mut event, &cmd).unwrap();
        assert_eq!(event.status(), ImmunizationStatus::Missed);
        assert_eq!(event.missed_reason(), Some("child had fever"));
        assert_eq!(event.superseded_by(), Some(successor));

        let err = event.handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn rescheduled_upcoming_dose_can_no_longer_be_administered() {
        let mut event = scheduled();
        let cmd = DoseCommand::Reschedule(Reschedule {
            event_id: event.id_typed(),
            successor_id: test_event_id(),
            occurred_at: test_time(),
        });
        execute(&mut event, &cmd).unwrap();
        assert_eq!(event.status(), ImmunizationStatus::Upcoming);
        assert!(!event.is_active());

        let err = event.handle(&mark_done(&event)).unwrap_err();
        assert!(matches!(err, DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn done_dose_cannot_be_rescheduled() {
        let mut event = scheduled();
        let cmd = mark_done(&event);
        execute(&mut event, &cmd).unwrap();
        let cmd = DoseCommand::Reschedule(Reschedule {
            event_id: event.id_typed(),
            successor_id: test_event_id(),
            occurred_at: test_time(),
        });
        assert!(matches!(
            event.handle(&cmd),
            Err(DomainError::InvalidStateTransition { .. })
        ));
    }

    #[test]
    fn overdue_and_upcoming_windows() {
        let event = scheduled();
        assert!(event.is_overdue(day(11).and_time(at(8))));
        assert!(!event.is_overdue(day(10).and_time(at(9))));
        assert!(event.is_overdue(day(10).and_time(at(16))));
        assert!(!event.is_overdue(day(9).and_time(at(16))));
        assert!(event.is_due_within(day(3), 7));
        assert!(!event.is_due_within(day(3), 6));
        assert!(!event.is_due_within(day(11), 30));
    }
}
