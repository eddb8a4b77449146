//! Immunization schedule engine.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveTime};

use maternity_core::{AggregateId, ChildId, Clock, DomainError};
use maternity_immunization::{
    DoseCommand, ImmunizationEvent, ImmunizationEventId, MarkDone, MarkMissed, Reschedule,
    ScheduleDose,
};
use maternity_stock::{StockDirection, VaccineId};

use super::aggregate_types::IMMUNIZATION_DOSE;
use super::stock_ledger::StockLedger;
use super::{Dispatcher, Snapshots, subscribe_snapshots, traced};
use crate::command_dispatcher::{DispatchError, Loaded, UnitOfWork};
use crate::config::CoreConfig;

pub struct ImmunizationEngine {
    dispatcher: Arc<Dispatcher>,
    doses: Arc<Snapshots<ImmunizationEvent>>,
    ledger: Arc<StockLedger>,
    config: CoreConfig,
    clock: Arc<dyn Clock>,
}

impl ImmunizationEngine {
    pub fn new(
        dispatcher: Arc<Dispatcher>,
        ledger: Arc<StockLedger>,
        config: CoreConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let doses = subscribe_snapshots(
            &dispatcher,
            "immunization_doses",
            IMMUNIZATION_DOSE,
            empty_dose,
        );
        Self {
            dispatcher,
            doses,
            ledger,
            config,
            clock,
        }
    }

    /// Book a dose. The vaccine must be registered and not expire before
    /// `date`; `time` must fall inside clinic hours.
    pub fn schedule_dose(
        &self,
        child_id: ChildId,
        vaccine_id: VaccineId,
        dose_label: &str,
        date: NaiveDate,
        time: NaiveTime,
        next_due_date: Option<NaiveDate>,
    ) -> Result<ImmunizationEvent, DispatchError> {
        let result = (|| -> Result<ImmunizationEvent, DispatchError> {
            let vaccine = self.ledger.vaccine(vaccine_id)?;
            let event_id = ImmunizationEventId::new(AggregateId::new());
            let command = DoseCommand::ScheduleDose(ScheduleDose {
                event_id,
                child_id,
                vaccine_id,
                dose_label: dose_label.to_string(),
                scheduled_date: date,
                scheduled_time: time,
                next_due_date,
                supersedes: None,
                clinic_hours: self.config.clinic_hours,
                vaccine_expiry: vaccine_expiry(&vaccine)?,
                occurred_at: self.clock.now(),
            });
            self.dispatcher
                .dispatch(event_id.0, IMMUNIZATION_DOSE, &command, empty_dose)
        })();

        let dose = traced("schedule_dose", result)?;
        tracing::info!(
            event_id = %dose.id_typed(),
            %child_id,
            %vaccine_id,
            dose_label = dose.dose_label(),
            scheduled_at = %dose.scheduled_at(),
            "dose scheduled"
        );
        Ok(dose)
    }

    /// Administer a dose: the event becomes Done and one unit leaves stock,
    /// committed together. On any failure neither stream changes.
    pub fn mark_done(
        &self,
        event_id: ImmunizationEventId,
        notes: &str,
        next_due_date: Option<NaiveDate>,
    ) -> Result<ImmunizationEvent, DispatchError> {
        let result = (|| -> Result<ImmunizationEvent, DispatchError> {
            let now = self.clock.now();
            let mut dose = self.load(event_id)?;
            let mut uow = UnitOfWork::new();

            dose.execute(
                &DoseCommand::MarkDone(MarkDone {
                    event_id,
                    notes: notes.to_string(),
                    next_due_date,
                    occurred_at: now,
                }),
                &mut uow,
            )?;

            let vaccine_id = dose.aggregate().vaccine_id();
            self.ledger.stage_transaction(
                vaccine_id,
                StockDirection::Out,
                1,
                &format!("dose administered: {event_id}"),
                now,
                &mut uow,
            )?;

            self.dispatcher.commit(uow)?;
            Ok(dose.into_aggregate())
        })();

        let dose = traced("mark_done", result)?;
        tracing::info!(
            %event_id,
            vaccine_id = %dose.vaccine_id(),
            child_id = %dose.child_id(),
            "dose administered"
        );
        Ok(dose)
    }

    pub fn mark_missed(
        &self,
        event_id: ImmunizationEventId,
        reason: &str,
    ) -> Result<ImmunizationEvent, DispatchError> {
        let command = DoseCommand::MarkMissed(MarkMissed {
            event_id,
            reason: reason.to_string(),
            occurred_at: self.clock.now(),
        });
        let dose = traced(
            "mark_missed",
            self.dispatcher
                .dispatch(event_id.0, IMMUNIZATION_DOSE, &command, empty_dose),
        )?;
        tracing::info!(%event_id, reason = dose.missed_reason().unwrap_or_default(), "dose missed");
        Ok(dose)
    }

    /// Move a dose to a new slot. The original stays as history, linked to
    /// the returned successor, and both streams are committed together.
    pub fn reschedule(
        &self,
        event_id: ImmunizationEventId,
        new_date: NaiveDate,
        new_time: NaiveTime,
    ) -> Result<ImmunizationEvent, DispatchError> {
        let result = (|| -> Result<ImmunizationEvent, DispatchError> {
            let now = self.clock.now();
            let successor_id = ImmunizationEventId::new(AggregateId::new());
            let mut original = self.load(event_id)?;
            let mut uow = UnitOfWork::new();

            original.execute(
                &DoseCommand::Reschedule(Reschedule {
                    event_id,
                    successor_id,
                    occurred_at: now,
                }),
                &mut uow,
            )?;

            let previous = original.aggregate();
            let vaccine = self.ledger.vaccine(previous.vaccine_id())?;
            let mut successor = self.load(successor_id)?;
            successor.execute(
                &DoseCommand::ScheduleDose(ScheduleDose {
                    event_id: successor_id,
                    child_id: previous.child_id(),
                    vaccine_id: previous.vaccine_id(),
                    dose_label: previous.dose_label().to_string(),
                    scheduled_date: new_date,
                    scheduled_time: new_time,
                    next_due_date: previous.next_due_date(),
                    supersedes: Some(event_id),
                    clinic_hours: self.config.clinic_hours,
                    vaccine_expiry: vaccine_expiry(&vaccine)?,
                    occurred_at: now,
                }),
                &mut uow,
            )?;

            self.dispatcher.commit(uow)?;
            Ok(successor.into_aggregate())
        })();

        let successor = traced("reschedule", result)?;
        tracing::info!(
            %event_id,
            successor_id = %successor.id_typed(),
            scheduled_at = %successor.scheduled_at(),
            "dose rescheduled"
        );
        Ok(successor)
    }

    pub fn get(&self, event_id: ImmunizationEventId) -> Result<ImmunizationEvent, DispatchError> {
        self.doses
            .get(&event_id.0)
            .filter(ImmunizationEvent::is_scheduled)
            .ok_or_else(|| DomainError::not_found(format!("immunization event {event_id}")).into())
    }

    /// Active doses scheduled from today through today + `within_days`.
    pub fn list_upcoming(&self, within_days: u32) -> Vec<ImmunizationEvent> {
        let today = self.clock.today();
        self.sorted(|dose| dose.is_due_within(today, within_days))
    }

    /// Active doses whose scheduled date and time are before now.
    pub fn list_overdue(&self) -> Vec<ImmunizationEvent> {
        let now = self.clock.now();
        self.sorted(|dose| dose.is_overdue(now))
    }

    /// Every dose ever booked for the child, superseded ones included.
    pub fn history_for_child(&self, child_id: ChildId) -> Vec<ImmunizationEvent> {
        self.sorted(|dose| dose.child_id() == child_id)
    }

    fn sorted(&self, keep: impl Fn(&ImmunizationEvent) -> bool) -> Vec<ImmunizationEvent> {
        let mut doses: Vec<ImmunizationEvent> = self
            .doses
            .list()
            .into_iter()
            .filter(|dose| dose.is_scheduled() && keep(dose))
            .collect();
        doses.sort_by_key(|dose| (dose.scheduled_at(), dose.id_typed()));
        doses
    }

    fn load(&self, event_id: ImmunizationEventId) -> Result<Loaded<ImmunizationEvent>, DispatchError> {
        self.dispatcher.load(event_id.0, IMMUNIZATION_DOSE, empty_dose)
    }
}

fn vaccine_expiry(vaccine: &maternity_stock::VaccineStock) -> Result<NaiveDate, DispatchError> {
    vaccine.expiry_date().ok_or_else(|| {
        DomainError::invariant(format!("vaccine {} has no expiry date", vaccine.id_typed())).into()
    })
}

fn empty_dose(id: AggregateId) -> ImmunizationEvent {
    ImmunizationEvent::empty(ImmunizationEventId::new(id))
}
