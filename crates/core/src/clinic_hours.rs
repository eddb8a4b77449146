//! Clinic opening window for scheduling immunizations and checkups.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};

use crate::error::{DomainError, DomainResult};

/// Daily window (inclusive on both ends) within which visits may be booked.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClinicHours {
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl ClinicHours {
    pub fn new(open: NaiveTime, close: NaiveTime) -> DomainResult<Self> {
        if open >= close {
            return Err(DomainError::validation(format!(
                "clinic opening time {open} must be before closing time {close}"
            )));
        }
        Ok(Self { open, close })
    }

    pub fn contains(&self, time: NaiveTime) -> bool {
        time >= self.open && time <= self.close
    }

    /// Reject `time` when it falls outside the window. `what` names the field
    /// in the error message.
    pub fn ensure_contains(&self, time: NaiveTime, what: &str) -> DomainResult<()> {
        if self.contains(time) {
            Ok(())
        } else {
            Err(DomainError::validation(format!(
                "{what} {} is outside clinic hours ({}-{})",
                time.format("%H:%M"),
                self.open.format("%H:%M"),
                self.close.format("%H:%M"),
            )))
        }
    }
}

impl Default for ClinicHours {
    /// 05:00–17:00.
    fn default() -> Self {
        Self {
            open: NaiveTime::from_hms_opt(5, 0, 0).unwrap_or(NaiveTime::MIN),
            close: NaiveTime::from_hms_opt(17, 0, 0).unwrap_or(NaiveTime::MIN),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(h: u32, m: u32) -> NaiveTime {
        NaiveTime::from_hms_opt(h, m, 0).unwrap()
    }

    #[test]
    fn default_window_is_five_to_five() {
        let hours = ClinicHours::default();
        assert!(hours.contains(at(5, 0)));
        assert!(hours.contains(at(17, 0)));
        assert!(!hours.contains(at(4, 59)));
        assert!(!hours.contains(at(17, 1)));
    }

    #[test]
    fn ensure_contains_names_the_field() {
        let err = ClinicHours::default()
            .ensure_contains(at(18, 30), "next visit time")
            .unwrap_err();
        match err {
            DomainError::Validation(msg) => {
                assert!(msg.contains("next visit time 18:30"));
                assert!(msg.contains("05:00-17:00"));
            }
            other => panic!("unexpected error {other:?}"),
        }
    }

    #[test]
    fn inverted_window_is_rejected() {
        assert!(ClinicHours::new(at(17, 0), at(5, 0)).is_err());
    }
}
