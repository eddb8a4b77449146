use chrono::{Days, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use maternity_core::{Aggregate, AggregateId, AggregateRoot, DomainError};
use maternity_events::Event;

/// Vaccine identifier (one stock stream per vaccine).
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VaccineId(pub AggregateId);

impl VaccineId {
    pub fn new(id: AggregateId) -> Self {
        Self(id)
    }
}

impl core::fmt::Display for VaccineId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        core::fmt::Display::fmt(&self.0, f)
    }
}

/// Direction of an inventory movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StockDirection {
    In,
    Out,
}

impl StockDirection {
    /// Signed effect of moving `quantity` units in this direction.
    pub fn signed(self, quantity: i64) -> i64 {
        match self {
            StockDirection::In => quantity,
            StockDirection::Out => -quantity,
        }
    }
}

/// Storage temperature band printed on the vaccine label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBand {
    /// -25°C to -15°C.
    Frozen,
    /// +2°C to +8°C.
    Refrigerated,
    /// +15°C to +25°C.
    Ambient,
}

/// Descriptive attributes fixed at registration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccineProfile {
    pub name: String,
    pub category: String,
    /// Doses needed for a full course.
    pub doses_required: u32,
    /// Low-stock threshold (inclusive).
    pub min_stock: i64,
    pub expiry_date: NaiveDate,
    pub storage: StorageBand,
}

impl VaccineProfile {
    fn validate(&self) -> Result<(), DomainError> {
        if self.name.trim().is_empty() {
            return Err(DomainError::validation("vaccine name cannot be empty"));
        }
        if self.doses_required == 0 {
            return Err(DomainError::validation("doses required must be at least 1"));
        }
        if self.min_stock < 0 {
            return Err(DomainError::validation("minimum stock cannot be negative"));
        }
        Ok(())
    }
}

/// One immutable inventory movement with the balance it produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockTransaction {
    pub transaction_id: Uuid,
    pub vaccine_id: VaccineId,
    pub direction: StockDirection,
    /// Always positive; the direction carries the sign.
    pub quantity: i64,
    pub reason: String,
    pub balance_after: i64,
    pub occurred_at: NaiveDateTime,
}

impl StockTransaction {
    pub fn signed_quantity(&self) -> i64 {
        self.direction.signed(self.quantity)
    }
}

/// Recompute a balance from the opening quantity and the transaction log.
///
/// Uses direction and quantity only; `balance_after` is never trusted here so
/// the result can be compared against cached values.
pub fn replay_balance<'a>(
    initial_quantity: i64,
    transactions: impl IntoIterator<Item = &'a StockTransaction>,
) -> i64 {
    transactions
        .into_iter()
        .fold(initial_quantity, |balance, tx| balance + tx.signed_quantity())
}

/// Aggregate root: VaccineStock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VaccineStock {
    id: VaccineId,
    profile: Option<VaccineProfile>,
    initial_quantity: i64,
    current_quantity: i64,
    transaction_count: u64,
    version: u64,
    created: bool,
}

impl VaccineStock {
    /// Create an empty, not-yet-registered aggregate instance for rehydration.
    pub fn empty(id: VaccineId) -> Self {
        Self {
            id,
            profile: None,
            initial_quantity: 0,
            current_quantity: 0,
            transaction_count: 0,
            version: 0,
            created: false,
        }
    }

    pub fn id_typed(&self) -> VaccineId {
        self.id
    }

    pub fn is_registered(&self) -> bool {
        self.created
    }

    pub fn profile(&self) -> Option<&VaccineProfile> {
        self.profile.as_ref()
    }

    pub fn name(&self) -> &str {
        self.profile.as_ref().map(|p| p.name.as_str()).unwrap_or("")
    }

    pub fn initial_quantity(&self) -> i64 {
        self.initial_quantity
    }

    pub fn current_quantity(&self) -> i64 {
        self.current_quantity
    }

    pub fn transaction_count(&self) -> u64 {
        self.transaction_count
    }

    pub fn min_stock(&self) -> i64 {
        self.profile.as_ref().map(|p| p.min_stock).unwrap_or(0)
    }

    pub fn expiry_date(&self) -> Option<NaiveDate> {
        self.profile.as_ref().map(|p| p.expiry_date)
    }

    pub fn is_low_stock(&self) -> bool {
        self.current_quantity <= self.min_stock()
    }

    /// True when the vaccine expires on or before `today + days`.
    pub fn is_expiring_within(&self, today: NaiveDate, days: u32) -> bool {
        let Some(expiry) = self.expiry_date() else {
            return false;
        };
        match today.checked_add_days(Days::new(u64::from(days))) {
            Some(horizon) => expiry <= horizon,
            None => true,
        }
    }

    /// True when `date` falls after the expiry date.
    pub fn is_expired_on(&self, date: NaiveDate) -> bool {
        self.expiry_date().is_some_and(|expiry| date > expiry)
    }
}

impl AggregateRoot for VaccineStock {
    type Id = VaccineId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

/// Command: RegisterVaccine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisterVaccine {
    pub vaccine_id: VaccineId,
    pub profile: VaccineProfile,
    pub initial_quantity: i64,
    pub occurred_at: NaiveDateTime,
}

/// Command: RecordTransaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordTransaction {
    pub vaccine_id: VaccineId,
    pub transaction_id: Uuid,
    pub direction: StockDirection,
    pub quantity: i64,
    pub reason: String,
    pub occurred_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaccineStockCommand {
    RegisterVaccine(RegisterVaccine),
    RecordTransaction(RecordTransaction),
}

/// Event: VaccineRegistered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VaccineRegistered {
    pub vaccine_id: VaccineId,
    pub profile: VaccineProfile,
    pub initial_quantity: i64,
    pub occurred_at: NaiveDateTime,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum VaccineStockEvent {
    VaccineRegistered(VaccineRegistered),
    TransactionRecorded(StockTransaction),
}

impl Event for VaccineStockEvent {
    fn event_type(&self) -> &'static str {
        match self {
            VaccineStockEvent::VaccineRegistered(_) => "stock.vaccine.registered",
            VaccineStockEvent::TransactionRecorded(_) => "stock.vaccine.transaction_recorded",
        }
    }

    fn version(&self) -> u32 {
        1
    }

    fn occurred_at(&self) -> NaiveDateTime {
        match self {
            VaccineStockEvent::VaccineRegistered(e) => e.occurred_at,
            VaccineStockEvent::TransactionRecorded(e) => e.occurred_at,
        }
    }
}

impl Aggregate for VaccineStock {
    type Command = VaccineStockCommand;
    type Event = VaccineStockEvent;
    type Error = DomainError;

    fn apply(&mut self, event: &Self::Event) {
        match event {
            VaccineStockEvent::VaccineRegistered(e) => {
                self.id = e.vaccine_id;
                self.profile = Some(e.profile.clone());
                self.initial_quantity = e.initial_quantity;
                self.current_quantity = e.initial_quantity;
                self.created = true;
            }
            VaccineStockEvent::TransactionRecorded(tx) => {
                self.current_quantity = tx.balance_after;
                self.transaction_count += 1;
            }
        }

        self.version += 1;
    }

    fn handle(&self, command: &Self::Command) -> Result<Vec<Self::Event>, Self::Error> {
        match command {
            VaccineStockCommand::RegisterVaccine(cmd) => self.handle_register(cmd),
            VaccineStockCommand::RecordTransaction(cmd) => self.handle_record(cmd),
        }
    }
}

impl VaccineStock {
    fn ensure_vaccine_id(&self, vaccine_id: VaccineId) -> Result<(), DomainError> {
        if self.id != vaccine_id {
            return Err(DomainError::invariant("vaccine_id mismatch"));
        }
        Ok(())
    }

    fn handle_register(&self, cmd: &RegisterVaccine) -> Result<Vec<VaccineStockEvent>, DomainError> {
        if self.created {
            return Err(DomainError::validation(format!(
                "vaccine {} is already registered",
                cmd.vaccine_id
            )));
        }
        cmd.profile.validate()?;
        if cmd.initial_quantity < 0 {
            return Err(DomainError::validation("initial quantity cannot be negative"));
        }

        Ok(vec![VaccineStockEvent::VaccineRegistered(VaccineRegistered {
            vaccine_id: cmd.vaccine_id,
            profile: cmd.profile.clone(),
            initial_quantity: cmd.initial_quantity,
            occurred_at: cmd.occurred_at,
        })])
    }

    fn handle_record(&self, cmd: &RecordTransaction) -> Result<Vec<VaccineStockEvent>, DomainError> {
        if !self.created {
            return Err(DomainError::not_found(format!("vaccine {}", cmd.vaccine_id)));
        }
        self.ensure_vaccine_id(cmd.vaccine_id)?;

        if cmd.quantity <= 0 {
            return Err(DomainError::validation(format!(
                "quantity must be positive (got {})",
                cmd.quantity
            )));
        }
        if cmd.reason.trim().is_empty() {
            return Err(DomainError::validation("transaction reason cannot be empty"));
        }

        let balance_after = self
            .current_quantity
            .checked_add(cmd.direction.signed(cmd.quantity))
            .ok_or_else(|| DomainError::validation("quantity overflows the stock balance"))?;
        if balance_after < 0 {
            return Err(DomainError::insufficient_stock(
                cmd.quantity,
                self.current_quantity,
            ));
        }

        Ok(vec![VaccineStockEvent::TransactionRecorded(StockTransaction {
            transaction_id: cmd.transaction_id,
            vaccine_id: cmd.vaccine_id,
            direction: cmd.direction,
            quantity: cmd.quantity,
            reason: cmd.reason.clone(),
            balance_after,
            occurred_at: cmd.occurred_at,
        })])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use maternity_events::execute;
    use proptest::prelude::*;

    fn test_vaccine_id() -> VaccineId {
        VaccineId::new(AggregateId::new())
    }

    fn test_time() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, 6)
            .unwrap()
            .and_hms_opt(9, 30, 0)
            .unwrap()
    }

    fn bcg_profile(min_stock: i64) -> VaccineProfile {
        VaccineProfile {
            name: "BCG".to_string(),
            category: "tuberculosis".to_string(),
            doses_required: 1,
            min_stock,
            expiry_date: NaiveDate::from_ymd_opt(2024, 12, 31).unwrap(),
            storage: StorageBand::Refrigerated,
        }
    }

    fn registered(initial_quantity: i64, min_stock: i64) -> VaccineStock {
        let vaccine_id = test_vaccine_id();
        let mut stock = VaccineStock::empty(vaccine_id);
        execute(
            &mut stock,
            &VaccineStockCommand::RegisterVaccine(RegisterVaccine {
                vaccine_id,
                profile: bcg_profile(min_stock),
                initial_quantity,
                occurred_at: test_time(),
            }),
        )
        .unwrap();
        stock
    }

    fn movement(stock: &VaccineStock, direction: StockDirection, quantity: i64) -> VaccineStockCommand {
        VaccineStockCommand::RecordTransaction(RecordTransaction {
            vaccine_id: stock.id_typed(),
            transaction_id: Uuid::now_v7(),
            direction,
            quantity,
            reason: "manual adjustment".to_string(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn register_emits_vaccine_registered_with_opening_balance() {
        let stock = registered(10, 5);
        assert!(stock.is_registered());
        assert_eq!(stock.current_quantity(), 10);
        assert_eq!(stock.initial_quantity(), 10);
        assert_eq!(stock.version(), 1);
        assert_eq!(stock.name(), "BCG");
    }

    #[test]
    fn register_twice_is_rejected() {
        let stock = registered(10, 5);
        let cmd = VaccineStockCommand::RegisterVaccine(RegisterVaccine {
            vaccine_id: stock.id_typed(),
            profile: bcg_profile(5),
            initial_quantity: 3,
            occurred_at: test_time(),
        });
        assert!(matches!(stock.handle(&cmd), Err(DomainError::Validation(_))));
    }

    #[test]
    fn register_rejects_zero_dose_course() {
        let vaccine_id = test_vaccine_id();
        let mut profile = bcg_profile(5);
        profile.doses_required = 0;
        let cmd = VaccineStockCommand::RegisterVaccine(RegisterVaccine {
            vaccine_id,
            profile,
            initial_quantity: 3,
            occurred_at: test_time(),
        });
        let err = VaccineStock::empty(vaccine_id).handle(&cmd).unwrap_err();
        assert!(matches!(err, DomainError::Validation(msg) if msg.contains("doses required")));
    }

    #[test]
    fn bcg_scenario_tracks_low_stock_and_rejects_overdraw() {
        let mut stock = registered(10, 5);

        let cmd = movement(&stock, StockDirection::Out, 3);
        execute(&mut stock, &cmd).unwrap();
        assert_eq!(stock.current_quantity(), 7);
        assert!(!stock.is_low_stock());

        let cmd = movement(&stock, StockDirection::Out, 3);
        execute(&mut stock, &cmd).unwrap();
        assert_eq!(stock.current_quantity(), 4);
        assert!(stock.is_low_stock());

        let before = stock.clone();
        let cmd = movement(&stock, StockDirection::Out, 10);
        let err = execute(&mut stock, &cmd).unwrap_err();
        assert_eq!(err, DomainError::insufficient_stock(10, 4));
        assert_eq!(stock, before);
    }

    #[test]
    fn transaction_records_resulting_balance() {
        let stock = registered(2, 0);
        let events = stock.handle(&movement(&stock, StockDirection::In, 8)).unwrap();
        match &events[0] {
            VaccineStockEvent::TransactionRecorded(tx) => {
                assert_eq!(tx.balance_after, 10);
                assert_eq!(tx.signed_quantity(), 8);
            }
            _ => panic!("Expected TransactionRecorded event"),
        }
    }

    #[test]
    fn non_positive_quantity_is_a_validation_error() {
        let stock = registered(5, 1);
        for quantity in [0, -4] {
            let err = stock.handle(&movement(&stock, StockDirection::In, quantity)).unwrap_err();
            assert!(matches!(err, DomainError::Validation(_)));
        }
    }

    #[test]
    fn transaction_on_unregistered_vaccine_is_not_found() {
        let stock = VaccineStock::empty(test_vaccine_id());
        let err = stock.handle(&movement(&stock, StockDirection::In, 1)).unwrap_err();
        assert!(matches!(err, DomainError::NotFound(_)));
    }

    #[test]
    fn expiry_window_is_inclusive() {
        let stock = registered(1, 0);
        let today = NaiveDate::from_ymd_opt(2024, 12, 1).unwrap();
        assert!(stock.is_expiring_within(today, 30));
        assert!(!stock.is_expiring_within(today, 29));
        assert!(!stock.is_expired_on(NaiveDate::from_ymd_opt(2024, 12, 31).unwrap()));
        assert!(stock.is_expired_on(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap()));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: whatever mix of movements is attempted, the balance never
        /// goes negative and always equals the replay of the accepted log.
        #[test]
        fn balance_equals_replay_and_never_goes_negative(
            initial in 0i64..50,
            moves in prop::collection::vec((any::<bool>(), 1i64..40), 0..40)
        ) {
            let mut stock = registered(initial, 5);
            let mut log: Vec<StockTransaction> = Vec::new();

            for (is_in, quantity) in moves {
                let direction = if is_in { StockDirection::In } else { StockDirection::Out };
                let before = stock.current_quantity();
                let cmd = movement(&stock, direction, quantity);
                match execute(&mut stock, &cmd) {
                    Ok(events) => {
                        for ev in events {
                            if let VaccineStockEvent::TransactionRecorded(tx) = ev {
                                log.push(tx);
                            }
                        }
                    }
                    Err(DomainError::InsufficientStock { .. }) => {
                        prop_assert_eq!(stock.current_quantity(), before);
                    }
                    Err(other) => prop_assert!(false, "unexpected error {:?}", other),
                }
                prop_assert!(stock.current_quantity() >= 0);
            }

            prop_assert_eq!(replay_balance(initial, &log), stock.current_quantity());
        }
    }
}
