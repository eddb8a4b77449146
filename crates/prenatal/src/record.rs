use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use maternity_core::{Aggregate, AggregateId, AggregateRoot, DomainError, PatientId};
use maternity_events::Event;

use crate::gestation::{Trimester, expected_due_date, gestational_age_weeks};
use crate::status::{CheckupFacts, derive_status};

/// Prenatal record identifier (one stream per pregnancy).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PrenatalRecordId(pub AggregateId);

impl PrenatalRecordId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for PrenatalRecordId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RecordStatus {
    Normal,
    Monitor,
    HighRisk,
    Due,
    Completed,
}

/// Aggregate root: PrenatalRecord.
///
/// `status` and `gestational_age_weeks` are cached projections; they only
/// change through the recompute commands.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrenatalRecord {
    id: PrenatalRecordId,
    patient_id: PatientId,
    last_menstrual_period: NaiveDate,
    expected_due_date: NaiveDate,
    gravida: u32,
    para: u32,
    medical_history: String,
    status: RecordStatus,
    gestational_age_weeks: i64,
    completed: bool,
    version: u64,
    created: bool,
}

impl PrenatalRecord {
    /// Create an empty, not-yet-opened aggregate instance for rehydration.
    pub fn empty(id: PrenatalRecordId) -> Self {
        Self {
            id,
            patient_id: PatientId::from_uuid(Uuid::nil()),
            last_menstrual_period: NaiveDate::MIN,
            expected_due_date: NaiveDate::MIN,
            gravida: 0,
            para: 0,
            medical_history: String::new(),
            status: RecordStatus::Normal,
            gestational_age_weeks: 0,
            completed: false,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> PrenatalRecordId {
        self.id
    }

    pub fn is_opened(&self) -> bool {
        self.created
    }

    pub fn patient_id(&self) -> PatientId {
        self.patient_id
    }

    pub fn last_menstrual_period(&self) -> NaiveDate {
        self.last_menstrual_period
    }

    pub fn expected_due_date(&self) -> NaiveDate {
        self.expected_due_date
    }

    pub fn gravida(&self) -> u32 {
        self.gravida
    }

    pub fn para(&self) -> u32 {
        self.para
    }

    pub fn medical_history(&self) -> &str {
        &self.medical_history
    }

    pub fn status(&self) -> RecordStatus {
        self.status
    }

    pub fn gestational_age_weeks(&self) -> i64 {
        self.gestational_age_weeks
    }

    pub fn trimester(&self) -> Trimester {
        Trimester::from_weeks(self.gestational_age_weeks)
    }

    pub fn is_completed(&self) -> bool {
        self.completed
    }

    /// Opened and not yet closed out.
    pub fn is_active(&self) -> bool {
        self.created && !self.completed
    }
}

impl AggregateRoot for PrenatalRecord {
    type Id = PrenatalRecordId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: OpenRecord. "Today" is `occurred_at`'s date.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenRecord {
    pub record_id: PrenatalRecordId,
    pub patient_id: PatientId,
    pub last_menstrual_period: NaiveDate,
    /// Derived from the LMP when absent.
    pub expected_due_date: Option<NaiveDate>,
    pub gravida: u32,
    pub para: u32,
    pub medical_history: String,
    pub occurred_at: NaiveDateTime,
}

/// Command: UpdateGestationalAge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateGestationalAge {
    pub record_id: PrenatalRecordId,
    pub today: NaiveDate,
    pub occurred_at: NaiveDateTime,
}

/// Command: RecomputeStatus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecomputeStatus {
    pub record_id: PrenatalRecordId,
    pub facts: CheckupFacts,
    pub today: NaiveDate,
    pub occurred_at: NaiveDateTime,
}

/// Command: CompleteRecord.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompleteRecord {
    pub record_id: PrenatalRecordId,
    pub facts: CheckupFacts,
    pub occurred_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordCommand {
    OpenRecord(OpenRecord),
    UpdateGestationalAge(UpdateGestationalAge),
    RecomputeStatus(RecomputeStatus),
    CompleteRecord(CompleteRecord),
}

/// Event: RecordOpened.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOpened {
    pub record_id: PrenatalRecordId,
    pub patient_id: PatientId,
    pub last_menstrual_period: NaiveDate,
    pub expected_due_date: NaiveDate,
    pub gravida: u32,
    pub para: u32,
    pub medical_history: String,
    pub gestational_age_weeks: i64,
    pub status: RecordStatus,
    pub occurred_at: NaiveDateTime,
}

/// Event: GestationalAgeUpdated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GestationalAgeUpdated {
    pub record_id: PrenatalRecordId,
    pub weeks: i64,
    pub occurred_at: NaiveDateTime,
}

/// Event: StatusRecomputed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusRecomputed {
    pub record_id: PrenatalRecordId,
    pub previous: RecordStatus,
    pub status: RecordStatus,
    pub occurred_at: NaiveDateTime,
}

/// Event: RecordCompleted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordCompleted {
    pub record_id: PrenatalRecordId,
    pub status: RecordStatus,
    pub occurred_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordEvent {
    RecordOpened(RecordOpened),
    GestationalAgeUpdated(GestationalAgeUpdated),
    StatusRecomputed(StatusRecomputed),
    RecordCompleted(RecordCompleted),
}

impl Event for RecordEvent {
    fn event_type(&self) -> &'static str {
        match self {
            RecordEvent::RecordOpened(_) => "prenatal.record.opened",
            RecordEvent::GestationalAgeUpdated(_) => "prenatal.record.gestational_age_updated",
            RecordEvent::StatusRecomputed(_) => "prenatal.record.status_recomputed",
            RecordEvent::RecordCompleted(_) => "prenatal.record.completed",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> NaiveDateTime {
        match self {
            RecordEvent::RecordOpened(e) => e.occurred_at,
            RecordEvent::GestationalAgeUpdated(e) => e.occurred_at,
            RecordEvent::StatusRecomputed(e) => e.occurred_at,
            RecordEvent::RecordCompleted(e) => e.occurred_at,
        }
    }
}

impl Aggregate for PrenatalRecord {
    type Command = RecordCommand;
    type Event = RecordEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            RecordEvent::RecordOpened(e) => {
                self.id = e.record_id;
                self.patient_id = e.patient_id;
                self.last_menstrual_period = e.last_menstrual_period;
                self.expected_due_date = e.expected_due_date;
                self.gravida = e.gravida;
                self.para = e.para;
                self.medical_history = e.medical_history.clone();
                self.gestational_age_weeks = e.gestational_age_weeks;
                self.status = e.status;
                self.created = true;
            }
            RecordEvent::GestationalAgeUpdated(e) => {
                self.gestational_age_weeks = e.weeks;
            }
            RecordEvent::StatusRecomputed(e) => {
                self.status = e.status;
            }
            RecordEvent::RecordCompleted(e) => {
                self.completed = true;
                self.status = e.status;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            RecordCommand::OpenRecord(cmd) => self.handle_open(cmd),
            RecordCommand::UpdateGestationalAge(cmd) => self.handle_gestational_age(cmd),
            RecordCommand::RecomputeStatus(cmd) => self.handle_recompute(cmd),
            RecordCommand::CompleteRecord(cmd) => self.handle_complete(cmd),
        }
    }
}

impl PrenatalRecord {
    fn ensure_opened(&self, record_id: PrenatalRecordId) -> Result<(), DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("prenatal record {record_id}")));
        }
        if self.id != record_id {
            return Err(DomainError::invariant("record_id mismatch"));
        }
        Ok(())
    }

    fn ensure_active(&self, action: &str) -> Result<(), DomainError> {
        if self.completed {
            return Err(DomainError::transition(RecordStatus::Completed, action));
        }
        Ok(())
    }

    fn handle_open(&self, cmd: &OpenRecord) -> Result<Vec<RecordEvent>, DomainError> {
        if self.created {
            return Err(DomainError::validation(format!(
                "prenatal record {} already exists",
                cmd.record_id
            )));
        }

        let today = cmd.occurred_at.date();
        if cmd.last_menstrual_period > today {
            return Err(DomainError::validation(
                "last menstrual period cannot be in the future",
            ));
        }
        if cmd.gravida == 0 {
            return Err(DomainError::validation("gravida must be at least 1"));
        }
        if cmd.para > cmd.gravida {
            return Err(DomainError::validation("para cannot exceed gravida"));
        }

        let due = cmd
            .expected_due_date
            .unwrap_or_else(|| expected_due_date(cmd.last_menstrual_period));
        if due <= cmd.last_menstrual_period {
            return Err(DomainError::validation(
                "expected due date must be after the last menstrual period",
            ));
        }

        Ok(vec![RecordEvent::RecordOpened(RecordOpened {
            record_id: cmd.record_id,
            patient_id: cmd.patient_id,
            last_menstrual_period: cmd.last_menstrual_period,
            expected_due_date: due,
            gravida: cmd.gravida,
            para: cmd.para,
            medical_history: cmd.medical_history.clone(),
            gestational_age_weeks: gestational_age_weeks(cmd.last_menstrual_period, today),
            status: derive_status(false, due, today, CheckupFacts::default()),
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_gestational_age(
        &self,
        cmd: &UpdateGestationalAge,
    ) -> Result<Vec<RecordEvent>, DomainError> {
        self.ensure_opened(cmd.record_id)?;
        self.ensure_active("update gestational age")?;

        let weeks = gestational_age_weeks(self.last_menstrual_period, cmd.today);
        if weeks == self.gestational_age_weeks {
            return Ok(vec![]);
        }

        Ok(vec![RecordEvent::GestationalAgeUpdated(GestationalAgeUpdated {
            record_id: cmd.record_id,
            weeks,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_recompute(&self, cmd: &RecomputeStatus) -> Result<Vec<RecordEvent>, DomainError> {
        self.ensure_opened(cmd.record_id)?;

        let status = derive_status(self.completed, self.expected_due_date, cmd.today, cmd.facts);
        if status == self.status {
            return Ok(vec![]);
        }

        Ok(vec![RecordEvent::StatusRecomputed(StatusRecomputed {
            record_id: cmd.record_id,
            previous: self.status,
            status,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_complete(&self, cmd: &CompleteRecord) -> Result<Vec<RecordEvent>, DomainError> {
        self.ensure_opened(cmd.record_id)?;
        self.ensure_active("complete")?;

        Ok(vec![RecordEvent::RecordCompleted(RecordCompleted {
            record_id: cmd.record_id,
            status: derive_status(
                true,
                self.expected_due_date,
                cmd.occurred_at.date(),
                cmd.facts,
            ),
            occurred_at: cmd.occurred_at,
        })])
    }
}
