//! Derived pregnancy status.
//!
//! A record's status is never set directly. It is a function of the checkup
//! history and the calendar, recomputed whenever either may have moved.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::checkup::{CheckupStatus, PrenatalCheckup};
use crate::record::RecordStatus;

/// Risk signals extracted from a record's checkups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CheckupFacts {
    /// Any completed checkup had abnormal vitals or a high-risk marker.
    pub high_risk: bool,
    /// The latest completed checkup carries a monitor marker.
    pub monitor: bool,
}

impl CheckupFacts {
    pub fn from_checkups<'a>(checkups: impl IntoIterator<Item = &'a PrenatalCheckup>) -> Self {
        let completed: Vec<&PrenatalCheckup> = checkups
            .into_iter()
            .filter(|c| c.status() == CheckupStatus::Done)
            .collect();

        let high_risk = completed.iter().any(|c| c.flags_high_risk());
        let monitor = completed
            .iter()
            .max_by_key(|c| c.scheduled_at())
            .is_some_and(|latest| latest.flags_monitor());

        Self { high_risk, monitor }
    }
}

/// Status precedence, highest first: high-risk, due, monitor, completed, normal.
pub fn derive_status(
    completed: bool,
    expected_due_date: NaiveDate,
    today: NaiveDate,
    facts: CheckupFacts,
) -> RecordStatus {
    if facts.high_risk {
        RecordStatus::HighRisk
    } else if !completed && today >= expected_due_date {
        RecordStatus::Due
    } else if facts.monitor {
        RecordStatus::Monitor
    } else if completed {
        RecordStatus::Completed
    } else {
        RecordStatus::Normal
    }
}
