//! Tracing and logging setup shared by every binary that embeds the clinic core.

pub mod subscriber;

pub use subscriber::{LogFormat, ObservabilityError, TracingConfig, init, init_for_tests, init_with};
