//! Bounded retry for optimistic concurrency conflicts.
//!
//! The core never retries on its own. Callers that want to absorb transient
//! conflicts wrap an operation in [`retry_on_conflict`]; anything other than
//! a conflict is returned on first occurrence.

use crate::command_dispatcher::DispatchError;
use crate::config::CoreConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first one. Never zero.
    max_attempts: u32,
}

impl RetryPolicy {
    /// `retries` extra attempts after the first.
    pub fn new(retries: u32) -> Self {
        Self {
            max_attempts: retries.saturating_add(1),
        }
    }

    pub fn no_retry() -> Self {
        Self::new(0)
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl From<&CoreConfig> for RetryPolicy {
    fn from(config: &CoreConfig) -> Self {
        Self::new(config.conflict_retries)
    }
}

/// Run `op`, re-running it while it fails with a transient conflict and
/// attempts remain. The last conflict is returned once attempts run out.
pub fn retry_on_conflict<T>(
    policy: RetryPolicy,
    mut op: impl FnMut() -> Result<T, DispatchError>,
) -> Result<T, DispatchError> {
    let mut attempt = 1;
    loop {
        match op() {
            Err(err) if err.is_transient() && attempt < policy.max_attempts => {
                tracing::warn!(
                    attempt,
                    max_attempts = policy.max_attempts,
                    error = %err,
                    "concurrency conflict; retrying"
                );
                attempt += 1;
                std::thread::yield_now();
            }
            Err(err) if err.is_transient() => {
                tracing::warn!(attempts = attempt, error = %err, "concurrency conflict; retries exhausted");
                return Err(err);
            }
            other => return other,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use maternity_core::DomainError;

    use super::*;

    fn conflict() -> DispatchError {
        DispatchError::Concurrency("stream moved".to_string())
    }

    #[test]
    fn succeeds_after_transient_conflicts() {
        let calls = Cell::new(0);
        let result = retry_on_conflict(RetryPolicy::new(3), || {
            calls.set(calls.get() + 1);
            if calls.get() < 3 { Err(conflict()) } else { Ok(calls.get()) }
        });
        assert_eq!(result.unwrap(), 3);
    }

    #[test]
    fn exhausted_retries_return_the_conflict() {
        let calls = Cell::new(0);
        let err = retry_on_conflict(RetryPolicy::new(2), || -> Result<(), _> {
            calls.set(calls.get() + 1);
            Err(conflict())
        })
        .unwrap_err();
        assert!(err.is_transient());
        assert_eq!(calls.get(), 3);
    }

    #[test]
    fn non_transient_errors_are_not_retried() {
        let calls = Cell::new(0);
        let err = retry_on_conflict(RetryPolicy::new(5), || -> Result<(), _> {
            calls.set(calls.get() + 1);
            Err(DispatchError::from(DomainError::insufficient_stock(1, 0)))
        })
        .unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(calls.get(), 1);
    }

    #[test]
    fn policy_from_config_counts_the_first_attempt() {
        let config = CoreConfig {
            conflict_retries: 4,
            ..CoreConfig::default()
        };
        assert_eq!(RetryPolicy::from(&config).max_attempts(), 5);
        assert_eq!(RetryPolicy::no_retry().max_attempts(), 1);
    }
}
