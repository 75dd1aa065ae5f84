//! Tracing and logging setup shared by every process that hosts the workflow.

/// Initialize process-wide logging from the environment.
///
/// Falls back to the defaults when `FORGEERP_LOG_FORMAT` is unset or invalid.
/// Safe to call multiple times; subsequent calls are no-ops.
pub fn init() {
    let config = ObservabilityConfig::from_env().unwrap_or_default();
    tracing::init_with(&config);
}

/// Initialize process-wide logging with an explicit configuration.
pub fn init_with(config: &ObservabilityConfig) {
    tracing::init_with(config);
}

pub mod config;

/// Tracing subscriber installation (filters, formats).
pub mod tracing;

pub use config::{ConfigError, LogFormat, ObservabilityConfig};
