//! # Worker Runtime
//!
//! Composition root of the flow mapper. Builds the [`WorkerContainer`],
//! runs one [`PartitionWorker`] per partition of `flow.mapper.event` and
//! drives the wake-up scheduler.
//!
//! ## Modular Structure
//!
//! - `container/` - configuration, reloadable settings, shared services
//! - `adapters/` - bincode state store over the compacted state topic
//! - `wiring/` - partition workers and the dead-letter path
//!
//! ## Record Flow
//!
//! ```text
//!  p2p link ──SessionEvent──┐
//!  flows ───FlowStatus──────┼──→ flow.mapper.event ──→ PartitionWorker(p)
//!  scheduler ──Wakeup/Sweep─┘                              │
//!                                       one transaction per batch
//!                  ┌──────────────┬───────────────┬────────┴──────┬──────────────┐
//!                  ↓              ↓               ↓               ↓              ↓
//!              p2p.out       flow.event   flow.mapper.state   flow.mapper.dlq  offset
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Load `WorkerConfig` from the environment
//! 2. Build the container (log, scheduler, settings watch)
//! 3. Each worker restores its partition and re-arms timers
//! 4. Start the periodic sweep
//!
//! Shutdown stops the workers between batches, then aborts every timer.

pub mod adapters;
pub mod container;
pub mod error;
pub mod wiring;

pub use container::{
    CommitRetryConfig, ConfigError, ConfigWatcher, LogConfig, RuntimeSettings, WorkerConfig,
    WorkerContainer,
};
pub use error::{WorkerError, WorkerResult};
pub use wiring::{DeadLetterReason, PartitionWorker};

use fm_03_scheduler::TaskScheduler;
use parking_lot::Mutex;
use shared_bus::EventLog;
use std::sync::Arc;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Runs the partition workers of one process.
pub struct WorkerRuntime<L: EventLog> {
    container: Arc<WorkerContainer<L>>,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    handles: Mutex<Vec<(u32, JoinHandle<WorkerResult<()>>)>>,
}

impl<L: EventLog> WorkerRuntime<L> {
    pub fn new(container: WorkerContainer<L>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            container: Arc::new(container),
            shutdown_tx,
            shutdown_rx,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn container(&self) -> Arc<WorkerContainer<L>> {
        Arc::clone(&self.container)
    }

    /// Spawns a worker per partition and starts the sweep.
    pub fn start(&self) -> WorkerResult<()> {
        let mut handles = self.handles.lock();
        if !handles.is_empty() || *self.shutdown_rx.borrow() {
            return Err(WorkerError::AlreadyStarted);
        }

        for partition in self.container.partitions() {
            let worker = PartitionWorker::from_container(&self.container, partition)?;
            let shutdown = self.shutdown_rx.clone();
            let handle = tokio::spawn(async move {
                let result = worker.run(shutdown).await;
                if let Err(err) = &result {
                    error!(partition, error = %err, "Partition worker failed");
                }
                result
            });
            handles.push((partition, handle));
        }

        self.container.scheduler.start_sweep(
            self.container.config.scheduler.sweep_interval(),
            self.container.partitions(),
        )?;

        info!(
            partitions = handles.len(),
            group = %self.container.config.log.consumer_group,
            "Flow mapper workers running"
        );
        Ok(())
    }

    /// Publishes new settings; workers pick them up at their next batch.
    pub fn reload_settings(&self, settings: RuntimeSettings) -> WorkerResult<()> {
        self.container.settings.reload(settings)?;
        Ok(())
    }

    /// Number of workers still running.
    pub fn running_workers(&self) -> usize {
        self.handles
            .lock()
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .count()
    }

    /// Stops the workers, waiting up to the grace period for each to finish
    /// its batch, then cancels every timer.
    pub async fn shutdown(&self) {
        info!("Initiating graceful shutdown...");
        self.shutdown_tx.send_replace(true);

        let handles = std::mem::take(&mut *self.handles.lock());
        let grace = self.container.config.shutdown_grace();
        for (partition, handle) in handles {
            let abort = handle.abort_handle();
            match tokio::time::timeout(grace, handle).await {
                Ok(Ok(_)) => {}
                Ok(Err(err)) => error!(partition, error = %err, "Partition worker panicked"),
                Err(_) => {
                    warn!(partition, "Partition worker did not stop in time, aborting");
                    abort.abort();
                }
            }
        }

        self.container.scheduler.shutdown();
        info!("Shutdown complete");
    }
}
