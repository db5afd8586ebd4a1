//! # Flow Mapper Worker
//!
//! Entry point of the `flow-worker` binary.
//!
//! ## Startup Sequence
//!
//! 1. Initialize logging and metrics
//! 2. Load configuration from `FM_*` environment variables
//! 3. Open the log and build the worker container
//! 4. Start one worker per partition
//! 5. Run until Ctrl+C; on SIGHUP reload the runtime settings

use std::sync::Arc;

use anyhow::{Context, Result};
use flow_telemetry::{init_telemetry, TelemetryConfig};
use shared_bus::InMemoryEventLog;
use tracing::{error, info};
use worker_runtime::{RuntimeSettings, WorkerConfig, WorkerContainer, WorkerRuntime};

#[tokio::main]
async fn main() -> Result<()> {
    let telemetry = TelemetryConfig::from_env();
    init_telemetry(&telemetry).context("Failed to initialize telemetry")?;

    let config = WorkerConfig::from_env().context("Invalid worker configuration")?;
    info!(
        service = %telemetry.service_name,
        partitions = config.log.partitions,
        "Starting flow mapper worker"
    );

    let log = Arc::new(InMemoryEventLog::with_partitions(config.log.partitions));
    let container = WorkerContainer::new(config, log).context("Failed to build worker container")?;
    let runtime = WorkerRuntime::new(container);
    runtime.start().context("Failed to start workers")?;

    info!("Worker is running. Press Ctrl+C to stop.");
    wait_for_shutdown(&runtime).await?;

    runtime.shutdown().await;
    Ok(())
}

#[cfg(unix)]
async fn wait_for_shutdown(runtime: &WorkerRuntime<InMemoryEventLog>) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    loop {
        tokio::select! {
            result = tokio::signal::ctrl_c() => {
                result.context("Failed to listen for Ctrl+C")?;
                return Ok(());
            }
            _ = hangup.recv() => reload(runtime),
        }
    }
}

#[cfg(not(unix))]
async fn wait_for_shutdown(_runtime: &WorkerRuntime<InMemoryEventLog>) -> Result<()> {
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")
}

#[cfg(unix)]
fn reload(runtime: &WorkerRuntime<InMemoryEventLog>) {
    info!("SIGHUP received, reloading settings");
    let result = RuntimeSettings::from_env()
        .map_err(worker_runtime::WorkerError::from)
        .and_then(|settings| runtime.reload_settings(settings));
    if let Err(err) = result {
        error!(error = %err, "Settings reload rejected, keeping current settings");
    }
}
