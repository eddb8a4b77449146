//! Domain error model.

use thiserror::Error;

/// Result type used across the domain layer.
pub type DomainResult<T> = Result<T, DomainError>;

/// Domain-level error.
///
/// Deterministic business failures only. Storage and publication problems are
/// reported by the infrastructure layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Malformed or out-of-range input (bad vitals pair, non-positive quantity,
    /// time outside clinic hours). Nothing was persisted.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The operation is not permitted from the record's current state.
    #[error("invalid state transition: cannot {action} from {from}")]
    InvalidStateTransition { from: String, action: String },

    /// An `out` movement (or a dose administration) would drive stock negative.
    #[error("insufficient stock: requested {requested}, available {available}")]
    InsufficientStock { requested: i64, available: i64 },

    /// A domain invariant was violated.
    #[error("invariant violated: {0}")]
    InvariantViolation(String),

    /// An identifier was invalid (e.g. parse failure).
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    /// A referenced vaccine, event, patient or record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stale version / optimistic concurrency conflict. Transient.
    #[error("conflict: {0}")]
    Conflict(String),
}

impl DomainError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn transition(from: impl core::fmt::Debug, action: impl Into<String>) -> Self {
        Self::InvalidStateTransition {
            from: format!("{from:?}"),
            action: action.into(),
        }
    }

    pub fn insufficient_stock(requested: i64, available: i64) -> Self {
        Self::InsufficientStock {
            requested,
            available,
        }
    }

    pub fn invariant(msg: impl Into<String>) -> Self {
        Self::InvariantViolation(msg.into())
    }

    pub fn invalid_id(msg: impl Into<String>) -> Self {
        Self::InvalidId(msg.into())
    }

    pub fn not_found(what: impl Into<String>) -> Self {
        Self::NotFound(what.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }
}
