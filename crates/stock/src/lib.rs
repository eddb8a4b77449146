//! Vaccine stock domain module (event-sourced).
//!
//! Inventory counts for each registered vaccine, changed only by appending
//! stock transactions. Pure domain logic: no IO, no storage.

pub mod vaccine;

pub use vaccine::{
    RecordTransaction, RegisterVaccine, StockDirection, StockTransaction, StorageBand,
    VaccineId, VaccineProfile, VaccineRegistered, VaccineStock, VaccineStockCommand,
    VaccineStockEvent, replay_balance,
};
