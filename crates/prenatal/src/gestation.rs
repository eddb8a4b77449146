//! Calendar arithmetic for pregnancies.

use chrono::{Days, NaiveDate};
use serde::{Deserialize, Serialize};

/// Days from last menstrual period to the expected due date (Naegele's rule).
pub const TERM_DAYS: u64 = 280;

/// Completed weeks since the last menstrual period: `floor((today - lmp) / 7)`.
pub fn gestational_age_weeks(last_menstrual_period: NaiveDate, today: NaiveDate) -> i64 {
    (today - last_menstrual_period).num_days().div_euclid(7)
}

/// Expected due date when none is supplied.
pub fn expected_due_date(last_menstrual_period: NaiveDate) -> NaiveDate {
    last_menstrual_period
        .checked_add_days(Days::new(TERM_DAYS))
        .unwrap_or(NaiveDate::MAX)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Trimester {
    First,
    Second,
    Third,
}

impl Trimester {
    pub fn from_weeks(weeks: i64) -> Self {
        match weeks {
            w if w < 14 => Trimester::First,
            w if w < 28 => Trimester::Second,
            _ => Trimester::Third,
        }
    }
}
