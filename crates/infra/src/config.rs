//! Runtime configuration for the clinic core.

use chrono::NaiveTime;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use maternity_core::{ClinicHours, DomainError};

pub const ENV_CLINIC_OPEN_HOUR: &str = "MATERNITY_CLINIC_OPEN_HOUR";
pub const ENV_CLINIC_CLOSE_HOUR: &str = "MATERNITY_CLINIC_CLOSE_HOUR";
pub const ENV_CONFLICT_RETRIES: &str = "MATERNITY_CONFLICT_RETRIES";
pub const ENV_DEFAULT_MIN_STOCK: &str = "MATERNITY_DEFAULT_MIN_STOCK";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key}: '{value}' is not a valid {expected}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("clinic hours: {0}")]
    ClinicHours(DomainError),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoreConfig {
    pub clinic_hours: ClinicHours,
    /// Extra attempts `retry_on_conflict` makes after a concurrency conflict.
    pub conflict_retries: u32,
    /// Low-stock threshold for vaccines registered without one.
    pub low_stock_default: i64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            clinic_hours: ClinicHours::default(),
            conflict_retries: 3,
            low_stock_default: 5,
        }
    }
}

impl CoreConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; missing keys keep their defaults.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let open = match lookup(ENV_CLINIC_OPEN_HOUR) {
            Some(raw) => parse_hour(ENV_CLINIC_OPEN_HOUR, &raw)?,
            None => defaults.clinic_hours.open,
        };
        let close = match lookup(ENV_CLINIC_CLOSE_HOUR) {
            Some(raw) => parse_hour(ENV_CLINIC_CLOSE_HOUR, &raw)?,
            None => defaults.clinic_hours.close,
        };
        let clinic_hours = ClinicHours::new(open, close).map_err(ConfigError::ClinicHours)?;

        let conflict_retries = match lookup(ENV_CONFLICT_RETRIES) {
            Some(raw) => raw.trim().parse::<u32>().map_err(|_| ConfigError::Invalid {
                key: ENV_CONFLICT_RETRIES,
                value: raw.clone(),
                expected: "retry count",
            })?,
            None => defaults.conflict_retries,
        };

        let low_stock_default = match lookup(ENV_DEFAULT_MIN_STOCK) {
            Some(raw) => raw
                .trim()
                .parse::<i64>()
                .ok()
                .filter(|v| *v >= 0)
                .ok_or_else(|| ConfigError::Invalid {
                    key: ENV_DEFAULT_MIN_STOCK,
                    value: raw.clone(),
                    expected: "non-negative stock threshold",
                })?,
            None => defaults.low_stock_default,
        };

        Ok(Self {
            clinic_hours,
            conflict_retries,
            low_stock_default,
        })
    }
}

fn parse_hour(key: &'static str, raw: &str) -> Result<NaiveTime, ConfigError> {
    raw.trim()
        .parse::<u32>()
        .ok()
        .and_then(|h| NaiveTime::from_hms_opt(h, 0, 0))
        .ok_or_else(|| ConfigError::Invalid {
            key,
            value: raw.to_string(),
            expected: "hour of day (0-23)",
        })
}
