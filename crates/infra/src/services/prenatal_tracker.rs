//! Prenatal care tracker: pregnancy records and their checkups.
//!
//! A record's status is a cached projection of its checkups and the calendar.
//! It is recomputed whenever a checkup completes, on every `record_status`
//! read, and by the batch passes a periodic job may trigger.

use std::sync::{Arc, Mutex};

use chrono::{NaiveDate, NaiveTime};

use maternity_core::{AggregateId, Clock, DomainError, PatientId};
use maternity_prenatal::{
    CancelCheckup, CheckupCommand, CheckupFacts, CheckupFindings, CompleteCheckup, CompleteRecord,
    MarkCheckupMissed, OpenRecord, PrenatalCheckup, PrenatalCheckupId, PrenatalRecord,
    PrenatalRecordId, RecomputeStatus, RecordCommand, RecordStatus, RescheduleCheckup,
    ScheduleCheckup, UpdateGestationalAge,
};

use super::aggregate_types::{PRENATAL_CHECKUP, PRENATAL_RECORD};
use super::{Dispatcher, Snapshots, subscribe_snapshots, traced};
use crate::command_dispatcher::{DispatchError, Loaded, UnitOfWork};
use crate::config::CoreConfig;

/// Outcome of a batch pass over prenatal records.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Records whose stored value changed.
    pub changed: usize,
    /// Records the pass could not update, with the reason.
    pub failures: Vec<(PrenatalRecordId, DispatchError)>,
}

impl BatchReport {
    fn tally(&mut self, record_id: PrenatalRecordId, result: Result<bool, DispatchError>) {
        match result {
            Ok(true) => self.changed += 1,
            Ok(false) => {}
            Err(err) => self.failures.push((record_id, err)),
        }
    }
}

/// Input for opening a pregnancy record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewPrenatalRecord {
    pub patient_id: PatientId,
    pub last_menstrual_period: NaiveDate,
    /// LMP + 280 days when absent.
    pub expected_due_date: Option<NaiveDate>,
    pub gravida: u32,
    pub para: u32,
    pub medical_history: String,
}

pub struct PrenatalTracker {
    dispatcher: Arc<Dispatcher>,
    records: Arc<Snapshots<PrenatalRecord>>,
    checkups: Arc<Snapshots<PrenatalCheckup>>,
    /// Serializes the one-active-record-per-patient check with its append.
    open_lock: Mutex<()>,
    config: CoreConfig,
    clock: Arc<dyn Clock>,
}

impl PrenatalTracker {
    pub fn new(dispatcher: Arc<Dispatcher>, config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let records = subscribe_snapshots(&dispatcher, "prenatal_records", PRENATAL_RECORD, empty_record);
        let checkups =
            subscribe_snapshots(&dispatcher, "prenatal_checkups", PRENATAL_CHECKUP, empty_checkup);
        Self {
            dispatcher,
            records,
            checkups,
            open_lock: Mutex::new(()),
            config,
            clock,
        }
    }

    // --- records -----------------------------------------------------------

    pub fn open_record(&self, new: NewPrenatalRecord) -> Result<PrenatalRecord, DispatchError> {
        let result = (|| -> Result<PrenatalRecord, DispatchError> {
            let _guard = self
                .open_lock
                .lock()
                .map_err(|_| DomainError::invariant("record open lock poisoned"))?;

            if let Some(active) = self.active_record_for(new.patient_id) {
                return Err(DomainError::validation(format!(
                    "patient {} already has an active prenatal record ({})",
                    new.patient_id,
                    active.id_typed()
                ))
                .into());
            }

            let record_id = PrenatalRecordId::new(AggregateId::new());
            let command = RecordCommand::OpenRecord(OpenRecord {
                record_id,
                patient_id: new.patient_id,
                last_menstrual_period: new.last_menstrual_period,
                expected_due_date: new.expected_due_date,
                gravida: new.gravida,
                para: new.para,
                medical_history: new.medical_history,
                occurred_at: self.clock.now(),
            });
            self.dispatcher
                .dispatch(record_id.0, PRENATAL_RECORD, &command, empty_record)
        })();

        let record = traced("open_record", result)?;
        tracing::info!(
            record_id = %record.id_typed(),
            patient_id = %record.patient_id(),
            expected_due_date = %record.expected_due_date(),
            gestational_age_weeks = record.gestational_age_weeks(),
            "prenatal record opened"
        );
        Ok(record)
    }

    /// Snapshot of the record; `status` is as last recomputed.
    pub fn get_record(&self, record_id: PrenatalRecordId) -> Result<PrenatalRecord, DispatchError> {
        self.records
            .get(&record_id.0)
            .filter(PrenatalRecord::is_opened)
            .ok_or_else(|| DomainError::not_found(format!("prenatal record {record_id}")).into())
    }

    pub fn active_record_for(&self, patient_id: PatientId) -> Option<PrenatalRecord> {
        self.records
            .list()
            .into_iter()
            .find(|r| r.patient_id() == patient_id && r.is_active())
    }

    /// Recompute and return the derived status as of today.
    pub fn record_status(&self, record_id: PrenatalRecordId) -> Result<RecordStatus, DispatchError> {
        let result = self.recompute(record_id).map(|(record, _)| record.status());
        traced("record_status", result)
    }

    /// Close the pregnancy record. Its status becomes `completed` unless a
    /// higher-precedence signal still applies.
    pub fn complete_record(&self, record_id: PrenatalRecordId) -> Result<PrenatalRecord, DispatchError> {
        let command = RecordCommand::CompleteRecord(CompleteRecord {
            record_id,
            facts: self.facts_for(record_id),
            occurred_at: self.clock.now(),
        });
        let record = traced(
            "complete_record",
            self.dispatcher
                .dispatch(record_id.0, PRENATAL_RECORD, &command, empty_record),
        )?;
        tracing::info!(%record_id, status = ?record.status(), "prenatal record completed");
        Ok(record)
    }

    /// Recompute gestational age for every active record.
    ///
    /// A record that fails is logged and skipped; the pass carries on with
    /// the rest.
    pub fn update_gestational_ages(&self) -> BatchReport {
        let today = self.clock.today();
        let now = self.clock.now();
        let mut report = BatchReport::default();

        for snapshot in self.records.list().into_iter().filter(PrenatalRecord::is_active) {
            let record_id = snapshot.id_typed();
            let result = (|| -> Result<bool, DispatchError> {
                let mut record = self.load_record(record_id)?;
                let mut uow = UnitOfWork::new();
                let events = record.execute(
                    &RecordCommand::UpdateGestationalAge(UpdateGestationalAge {
                        record_id,
                        today,
                        occurred_at: now,
                    }),
                    &mut uow,
                )?;
                self.dispatcher.commit(uow)?;
                Ok(!events.is_empty())
            })();
            report.tally(record_id, traced("update_gestational_ages", result));
        }

        tracing::info!(
            changed = report.changed,
            failed = report.failures.len(),
            %today,
            "gestational ages updated"
        );
        report
    }

    /// Recompute the status of every record, skipping records that fail.
    pub fn recompute_statuses(&self) -> BatchReport {
        let mut report = BatchReport::default();
        for snapshot in self.records.list() {
            let record_id = snapshot.id_typed();
            let result = traced("recompute_statuses", self.recompute(record_id));
            report.tally(record_id, result.map(|(_, did_change)| did_change));
        }
        tracing::info!(
            changed = report.changed,
            failed = report.failures.len(),
            "prenatal statuses recomputed"
        );
        report
    }

    // --- checkups ----------------------------------------------------------

    pub fn schedule_checkup(
        &self,
        record_id: PrenatalRecordId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<PrenatalCheckup, DispatchError> {
        let result = (|| -> Result<PrenatalCheckup, DispatchError> {
            self.ensure_record_active(record_id, "schedule checkup")?;

            let checkup_id = PrenatalCheckupId::new(AggregateId::new());
            let command = CheckupCommand::ScheduleCheckup(ScheduleCheckup {
                checkup_id,
                record_id,
                checkup_date: date,
                checkup_time: time,
                supersedes: None,
                clinic_hours: self.config.clinic_hours,
                occurred_at: self.clock.now(),
            });
            self.dispatcher
                .dispatch(checkup_id.0, PRENATAL_CHECKUP, &command, empty_checkup)
        })();

        let checkup = traced("schedule_checkup", result)?;
        tracing::info!(
            checkup_id = %checkup.id_typed(),
            %record_id,
            scheduled_at = %checkup.scheduled_at(),
            "checkup scheduled"
        );
        Ok(checkup)
    }

    /// Record the visit's findings. The record's status is recomputed in the
    /// same commit, so it never lags behind the checkup.
    pub fn complete_checkup(
        &self,
        checkup_id: PrenatalCheckupId,
        findings: CheckupFindings,
    ) -> Result<PrenatalCheckup, DispatchError> {
        let result = (|| -> Result<PrenatalCheckup, DispatchError> {
            let now = self.clock.now();
            let mut checkup = self.load_checkup(checkup_id)?;
            let mut uow = UnitOfWork::new();

            checkup.execute(
                &CheckupCommand::CompleteCheckup(CompleteCheckup {
                    checkup_id,
                    findings,
                    clinic_hours: self.config.clinic_hours,
                    occurred_at: now,
                }),
                &mut uow,
            )?;

            let completed = checkup.aggregate();
            let record_id = completed.record_id();
            let mut history = self.checkups_excluding(record_id, checkup_id);
            history.push(completed.clone());

            let mut record = self.load_record(record_id)?;
            record.execute(
                &RecordCommand::RecomputeStatus(RecomputeStatus {
                    record_id,
                    facts: CheckupFacts::from_checkups(&history),
                    today: now.date(),
                    occurred_at: now,
                }),
                &mut uow,
            )?;

            self.dispatcher.commit(uow)?;
            Ok(checkup.into_aggregate())
        })();

        let checkup = traced("complete_checkup", result)?;
        tracing::info!(
            %checkup_id,
            record_id = %checkup.record_id(),
            high_risk = checkup.flags_high_risk(),
            monitor = checkup.flags_monitor(),
            "checkup completed"
        );
        Ok(checkup)
    }

    pub fn mark_checkup_missed(
        &self,
        checkup_id: PrenatalCheckupId,
        reason: &str,
    ) -> Result<PrenatalCheckup, DispatchError> {
        let command = CheckupCommand::MarkCheckupMissed(MarkCheckupMissed {
            checkup_id,
            reason: reason.to_string(),
            occurred_at: self.clock.now(),
        });
        let checkup = traced(
            "mark_checkup_missed",
            self.dispatcher
                .dispatch(checkup_id.0, PRENATAL_CHECKUP, &command, empty_checkup),
        )?;
        tracing::info!(%checkup_id, reason = checkup.missed_reason().unwrap_or_default(), "checkup missed");
        Ok(checkup)
    }

    /// Book a new Upcoming checkup in place of an Upcoming or Missed one.
    /// Returns the new checkup; the original keeps its status and reason.
    pub fn reschedule_checkup(
        &self,
        checkup_id: PrenatalCheckupId,
        date: NaiveDate,
        time: NaiveTime,
    ) -> Result<PrenatalCheckup, DispatchError> {
        let result = (|| -> Result<PrenatalCheckup, DispatchError> {
            let now = self.clock.now();
            let successor_id = PrenatalCheckupId::new(AggregateId::new());
            let mut original = self.load_checkup(checkup_id)?;
            let mut uow = UnitOfWork::new();

            original.execute(
                &CheckupCommand::RescheduleCheckup(RescheduleCheckup {
                    checkup_id,
                    successor_id,
                    occurred_at: now,
                }),
                &mut uow,
            )?;

            let record_id = original.aggregate().record_id();
            self.ensure_record_active(record_id, "reschedule checkup")?;

            let mut successor = self.load_checkup(successor_id)?;
            successor.execute(
                &CheckupCommand::ScheduleCheckup(ScheduleCheckup {
                    checkup_id: successor_id,
                    record_id,
                    checkup_date: date,
                    checkup_time: time,
                    supersedes: Some(checkup_id),
                    clinic_hours: self.config.clinic_hours,
                    occurred_at: now,
                }),
                &mut uow,
            )?;

            self.dispatcher.commit(uow)?;
            Ok(successor.into_aggregate())
        })();

        let successor = traced("reschedule_checkup", result)?;
        tracing::info!(
            %checkup_id,
            successor_id = %successor.id_typed(),
            scheduled_at = %successor.scheduled_at(),
            "checkup rescheduled"
        );
        Ok(successor)
    }

    pub fn cancel_checkup(
        &self,
        checkup_id: PrenatalCheckupId,
        reason: &str,
    ) -> Result<PrenatalCheckup, DispatchError> {
        let command = CheckupCommand::CancelCheckup(CancelCheckup {
            checkup_id,
            reason: reason.to_string(),
            occurred_at: self.clock.now(),
        });
        let checkup = traced(
            "cancel_checkup",
            self.dispatcher
                .dispatch(checkup_id.0, PRENATAL_CHECKUP, &command, empty_checkup),
        )?;
        tracing::info!(%checkup_id, "checkup cancelled");
        Ok(checkup)
    }

    pub fn get_checkup(&self, checkup_id: PrenatalCheckupId) -> Result<PrenatalCheckup, DispatchError> {
        self.checkups
            .get(&checkup_id.0)
            .filter(PrenatalCheckup::is_scheduled)
            .ok_or_else(|| DomainError::not_found(format!("prenatal checkup {checkup_id}")).into())
    }

    /// All checkups of a record, ordered by date and time.
    pub fn checkups_for(&self, record_id: PrenatalRecordId) -> Vec<PrenatalCheckup> {
        let mut checkups: Vec<PrenatalCheckup> = self
            .checkups
            .list()
            .into_iter()
            .filter(|c| c.is_scheduled() && c.record_id() == record_id)
            .collect();
        checkups.sort_by_key(|c| (c.scheduled_at(), c.id_typed()));
        checkups
    }

    // --- internals ---------------------------------------------------------

    fn facts_for(&self, record_id: PrenatalRecordId) -> CheckupFacts {
        CheckupFacts::from_checkups(&self.checkups_for(record_id))
    }

    fn checkups_excluding(
        &self,
        record_id: PrenatalRecordId,
        checkup_id: PrenatalCheckupId,
    ) -> Vec<PrenatalCheckup> {
        self.checkups_for(record_id)
            .into_iter()
            .filter(|c| c.id_typed() != checkup_id)
            .collect()
    }

    /// Returns the record after recomputation and whether its status moved.
    fn recompute(&self, record_id: PrenatalRecordId) -> Result<(PrenatalRecord, bool), DispatchError> {
        let now = self.clock.now();
        let mut record = self.load_record(record_id)?;
        let mut uow = UnitOfWork::new();
        let events = record.execute(
            &RecordCommand::RecomputeStatus(RecomputeStatus {
                record_id,
                facts: self.facts_for(record_id),
                today: now.date(),
                occurred_at: now,
            }),
            &mut uow,
        )?;
        self.dispatcher.commit(uow)?;

        let record = record.into_aggregate();
        if !events.is_empty() {
            tracing::info!(%record_id, status = ?record.status(), "prenatal status changed");
        }
        Ok((record, !events.is_empty()))
    }

    fn ensure_record_active(&self, record_id: PrenatalRecordId, action: &str) -> Result<(), DispatchError> {
        let record = self.get_record(record_id)?;
        if record.is_completed() {
            return Err(DomainError::transition(RecordStatus::Completed, action).into());
        }
        Ok(())
    }

    fn load_record(&self, record_id: PrenatalRecordId) -> Result<Loaded<PrenatalRecord>, DispatchError> {
        self.dispatcher.load(record_id.0, PRENATAL_RECORD, empty_record)
    }

    fn load_checkup(&self, checkup_id: PrenatalCheckupId) -> Result<Loaded<PrenatalCheckup>, DispatchError> {
        self.dispatcher.load(checkup_id.0, PRENATAL_CHECKUP, empty_checkup)
    }
}

fn empty_record(id: AggregateId) -> PrenatalRecord {
    PrenatalRecord::empty(PrenatalRecordId::new(id))
}

fn empty_checkup(id: AggregateId) -> PrenatalCheckup {
    PrenatalCheckup::empty(PrenatalCheckupId::new(id))
}
