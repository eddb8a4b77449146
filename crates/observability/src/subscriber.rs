//! Tracing subscriber initialization.
//!
//! Structured JSON by default, filtered through `RUST_LOG` with a fallback
//! directive when the variable is unset.

use thiserror::Error;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Json,
    /// Human-readable single-line output for local runs.
    Compact,
}

impl LogFormat {
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "compact" | "text" => Some(Self::Compact),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingConfig {
    /// Used when `RUST_LOG` is unset.
    pub default_directive: String,
    pub format: LogFormat,
}

impl Default for TracingConfig {
    fn default() -> Self {
        Self {
            default_directive: "info".to_string(),
            format: LogFormat::Json,
        }
    }
}

impl TracingConfig {
    /// Reads `MATERNITY_LOG_FORMAT` (`json` | `compact`); unknown values keep JSON.
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let format = lookup("MATERNITY_LOG_FORMAT")
            .and_then(|raw| LogFormat::parse(&raw))
            .unwrap_or_default();
        Self {
            format,
            ..Self::default()
        }
    }
}

#[derive(Debug, Error)]
pub enum ObservabilityError {
    #[error("invalid log filter directive '{directive}': {reason}")]
    InvalidFilter { directive: String, reason: String },

    #[error("a global tracing subscriber is already installed")]
    AlreadyInitialized,
}

fn build_filter(default_directive: &str) -> Result<EnvFilter, ObservabilityError> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(default_directive).map_err(|e| ObservabilityError::InvalidFilter {
        directive: default_directive.to_string(),
        reason: e.to_string(),
    })
}

/// Initialize tracing for the process from the environment.
///
/// Safe to call multiple times; later calls are no-ops.
pub fn init() {
    let _ = init_with(&TracingConfig::from_env());
}

pub fn init_with(config: &TracingConfig) -> Result<(), ObservabilityError> {
    let filter = build_filter(&config.default_directive)?;
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(tracing_subscriber::fmt::time::SystemTime)
        .with_target(false);

    let installed = match config.format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Compact => builder.compact().try_init(),
    };
    installed.map_err(|_| ObservabilityError::AlreadyInitialized)?;

    tracing::debug!(format = ?config.format, "tracing initialized");
    Ok(())
}

/// Compact output captured by the test harness. Ignores an existing subscriber.
pub fn init_for_tests() {
    let filter = build_filter("debug").unwrap_or_else(|_| EnvFilter::new("debug"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .compact()
        .try_init();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn log_format_accepts_aliases() {
        assert_eq!(LogFormat::parse(" JSON "), Some(LogFormat::Json));
        assert_eq!(LogFormat::parse("text"), Some(LogFormat::Compact));
        assert_eq!(LogFormat::parse("xml"), None);
    }

    #[test]
    fn config_falls_back_to_json_on_unknown_format() {
        let config = TracingConfig::from_lookup(|key| {
            (key == "MATERNITY_LOG_FORMAT").then(|| "yaml".to_string())
        });
        assert_eq!(config, TracingConfig::default());

        let config = TracingConfig::from_lookup(|_| Some("compact".to_string()));
        assert_eq!(config.format, LogFormat::Compact);
    }

    #[test]
    fn repeated_init_is_a_noop() {
        init_for_tests();
        init();
        init_for_tests();
    }
}
