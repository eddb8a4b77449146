//! Stock ledger: the only writer of vaccine stock.

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime};
use uuid::Uuid;

use maternity_core::{AggregateId, Clock, DomainError};
use maternity_stock::{
    RecordTransaction, RegisterVaccine, StockDirection, StockTransaction, StorageBand, VaccineId,
    VaccineProfile, VaccineStock, VaccineStockCommand, VaccineStockEvent, replay_balance,
};

use super::aggregate_types::VACCINE_STOCK;
use super::{Dispatcher, Snapshots, subscribe_snapshots, traced};
use crate::command_dispatcher::{DispatchError, Loaded, UnitOfWork};
use crate::config::CoreConfig;

/// Cached quantity of a vaccine next to the balance replayed from its log.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerAudit {
    pub cached: i64,
    pub replayed: i64,
    pub transactions: usize,
}

impl LedgerAudit {
    pub fn is_consistent(&self) -> bool {
        self.cached == self.replayed
    }
}

/// Input for registering a vaccine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaccineRegistration {
    pub name: String,
    pub category: String,
    pub doses_required: u32,
    /// Falls back to the configured default threshold.
    pub min_stock: Option<i64>,
    pub expiry_date: NaiveDate,
    pub storage: StorageBand,
    pub initial_quantity: i64,
}

pub struct StockLedger {
    dispatcher: Arc<Dispatcher>,
    vaccines: Arc<Snapshots<VaccineStock>>,
    config: CoreConfig,
    clock: Arc<dyn Clock>,
}

impl StockLedger {
    pub fn new(dispatcher: Arc<Dispatcher>, config: CoreConfig, clock: Arc<dyn Clock>) -> Self {
        let vaccines = subscribe_snapshots(&dispatcher, "vaccine_stock", VACCINE_STOCK, empty_stock);
        Self {
            dispatcher,
            vaccines,
            config,
            clock,
        }
    }

    pub fn register_vaccine(
        &self,
        registration: VaccineRegistration,
    ) -> Result<VaccineStock, DispatchError> {
        let vaccine_id = VaccineId::new(AggregateId::new());
        let command = VaccineStockCommand::RegisterVaccine(RegisterVaccine {
            vaccine_id,
            profile: VaccineProfile {
                name: registration.name,
                category: registration.category,
                doses_required: registration.doses_required,
                min_stock: registration
                    .min_stock
                    .unwrap_or(self.config.low_stock_default),
                expiry_date: registration.expiry_date,
                storage: registration.storage,
            },
            initial_quantity: registration.initial_quantity,
            occurred_at: self.clock.now(),
        });

        let stock = traced(
            "register_vaccine",
            self.dispatcher
                .dispatch(vaccine_id.0, VACCINE_STOCK, &command, empty_stock),
        )?;
        tracing::info!(
            %vaccine_id,
            name = stock.name(),
            initial_quantity = stock.initial_quantity(),
            "vaccine registered"
        );
        Ok(stock)
    }

    /// Append one stock movement and return it with its resulting balance.
    ///
    /// The balance check and the append are one optimistic unit against the
    /// vaccine's stream; a concurrent writer makes this fail with a
    /// concurrency conflict rather than over-withdraw.
    pub fn record_transaction(
        &self,
        vaccine_id: VaccineId,
        direction: StockDirection,
        quantity: i64,
        reason: &str,
    ) -> Result<StockTransaction, DispatchError> {
        let result = (|| -> Result<StockTransaction, DispatchError> {
            let mut uow = UnitOfWork::new();
            let tx = self.stage_transaction(
                vaccine_id,
                direction,
                quantity,
                reason,
                self.clock.now(),
                &mut uow,
            )?;
            self.dispatcher.commit(uow)?;
            Ok(tx)
        })();

        let tx = traced("record_transaction", result)?;
        tracing::info!(
            %vaccine_id,
            direction = ?tx.direction,
            quantity = tx.quantity,
            balance_after = tx.balance_after,
            reason = %tx.reason,
            "stock transaction recorded"
        );
        Ok(tx)
    }

    /// Decide a movement against the vaccine's current stream and stage it in
    /// `uow` without committing. Callers that must change another aggregate
    /// in the same unit (dose administration) commit both together.
    pub fn stage_transaction(
        &self,
        vaccine_id: VaccineId,
        direction: StockDirection,
        quantity: i64,
        reason: &str,
        occurred_at: NaiveDateTime,
        uow: &mut UnitOfWork,
    ) -> Result<StockTransaction, DispatchError> {
        let mut stock = self.load(vaccine_id)?;
        let command = VaccineStockCommand::RecordTransaction(RecordTransaction {
            vaccine_id,
            transaction_id: Uuid::now_v7(),
            direction,
            quantity,
            reason: reason.to_string(),
            occurred_at,
        });

        let events = stock.execute(&command, uow)?;
        events
            .into_iter()
            .find_map(|e| match e {
                VaccineStockEvent::TransactionRecorded(tx) => Some(tx),
                VaccineStockEvent::VaccineRegistered(_) => None,
            })
            .ok_or_else(|| DomainError::invariant("transaction produced no ledger entry").into())
    }

    /// Cached on-hand quantity.
    pub fn current_quantity(&self, vaccine_id: VaccineId) -> Result<i64, DispatchError> {
        Ok(self.vaccine(vaccine_id)?.current_quantity())
    }

    pub fn is_low_stock(&self, vaccine_id: VaccineId) -> Result<bool, DispatchError> {
        Ok(self.vaccine(vaccine_id)?.is_low_stock())
    }

    /// Expiry falls on or before today + `days`.
    pub fn is_expiring_within(&self, vaccine_id: VaccineId, days: u32) -> Result<bool, DispatchError> {
        Ok(self
            .vaccine(vaccine_id)?
            .is_expiring_within(self.clock.today(), days))
    }

    /// Replay the full transaction log and return the recomputed balance.
    ///
    /// A mismatch with the cached quantity is logged as an error and left
    /// in place for investigation.
    pub fn reconcile(&self, vaccine_id: VaccineId) -> Result<i64, DispatchError> {
        let audit = self.audit(vaccine_id)?;

        if audit.is_consistent() {
            tracing::debug!(%vaccine_id, replayed = audit.replayed, "stock ledger reconciled");
        } else {
            tracing::error!(
                %vaccine_id,
                cached = audit.cached,
                replayed = audit.replayed,
                transactions = audit.transactions,
                "stock ledger divergence: cached quantity does not match replayed log"
            );
        }
        Ok(audit.replayed)
    }

    /// Cached quantity and replayed balance, read at the same point in the
    /// commit order.
    pub fn audit(&self, vaccine_id: VaccineId) -> Result<LedgerAudit, DispatchError> {
        self.dispatcher.read_consistent(|| -> Result<LedgerAudit, DispatchError> {
            let (initial, transactions) = self.ledger(vaccine_id)?;
            Ok(LedgerAudit {
                cached: self.current_quantity(vaccine_id)?,
                replayed: replay_balance(initial, &transactions),
                transactions: transactions.len(),
            })
        })?
    }

    /// Transaction log in append order.
    pub fn transactions(&self, vaccine_id: VaccineId) -> Result<Vec<StockTransaction>, DispatchError> {
        Ok(self.ledger(vaccine_id)?.1)
    }

    pub fn vaccine(&self, vaccine_id: VaccineId) -> Result<VaccineStock, DispatchError> {
        self.vaccines
            .get(&vaccine_id.0)
            .filter(VaccineStock::is_registered)
            .ok_or_else(|| DomainError::not_found(format!("vaccine {vaccine_id}")).into())
    }

    pub fn vaccines(&self) -> Vec<VaccineStock> {
        let mut all = self.vaccines.list();
        all.sort_by(|a, b| a.name().cmp(b.name()));
        all
    }

    pub fn low_stock_vaccines(&self) -> Vec<VaccineStock> {
        self.vaccines()
            .into_iter()
            .filter(VaccineStock::is_low_stock)
            .collect()
    }

    pub fn expiring_vaccines(&self, days: u32) -> Vec<VaccineStock> {
        let today = self.clock.today();
        let mut expiring: Vec<VaccineStock> = self
            .vaccines()
            .into_iter()
            .filter(|v| v.is_expiring_within(today, days))
            .collect();
        expiring.sort_by_key(|v| v.expiry_date());
        expiring
    }

    fn load(&self, vaccine_id: VaccineId) -> Result<Loaded<VaccineStock>, DispatchError> {
        self.dispatcher.load(vaccine_id.0, VACCINE_STOCK, empty_stock)
    }

    /// Opening quantity and every transaction, read straight from the store.
    fn ledger(&self, vaccine_id: VaccineId) -> Result<(i64, Vec<StockTransaction>), DispatchError> {
        let stream = self.dispatcher.store().load_stream(vaccine_id.0)?;

        let mut initial = None;
        let mut transactions = Vec::new();
        for stored in stream {
            let event: VaccineStockEvent = serde_json::from_value(stored.payload)
                .map_err(|e| DispatchError::Deserialize(e.to_string()))?;
            match event {
                VaccineStockEvent::VaccineRegistered(e) => initial = Some(e.initial_quantity),
                VaccineStockEvent::TransactionRecorded(tx) => transactions.push(tx),
            }
        }

        let initial =
            initial.ok_or_else(|| DomainError::not_found(format!("vaccine {vaccine_id}")))?;
        Ok((initial, transactions))
    }
}

fn empty_stock(id: AggregateId) -> VaccineStock {
    VaccineStock::empty(VaccineId::new(id))
}
