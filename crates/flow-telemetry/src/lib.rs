//! # Flow Telemetry
//!
//! Structured logging and Prometheus counters shared by the flow mapper
//! worker binary and its tests.
//!
//! `init_telemetry` is called once from `main`. Library crates only emit
//! `tracing` events and touch the statics re-exported here; they never
//! install a subscriber themselves.
//!
//! Settings are read by [`TelemetryConfig::from_env`]: `FM_SERVICE_NAME`,
//! `FM_LOG_LEVEL` (falling back to `RUST_LOG`), `FM_JSON_LOGS` and
//! `FM_CONSOLE_OUTPUT`.

mod config;
mod logging;
mod metrics;

pub use config::TelemetryConfig;
pub use logging::init_logging;
pub use metrics::{
    register_metrics, render, BatchTimer, BATCH_DURATION, COMMIT_RETRIES, DEAD_LETTERS,
    EVENTS_PROCESSED, MAPPER_CLEANUPS, REGISTRY, SCHEDULED_TASKS, SESSIONS_ERRORED,
};

#[derive(thiserror::Error, Debug)]
pub enum TelemetryError {
    #[error("log subscriber: {0}")]
    LoggingInit(String),

    #[error("metrics registry: {0}")]
    MetricsInit(String),

    #[error("telemetry config: {0}")]
    Config(String),
}

/// Registers metrics, then installs the global log subscriber.
pub fn init_telemetry(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    register_metrics()?;
    init_logging(config)
}
