//! # Worker Container
//!
//! Holds the shared pieces every partition worker needs: the log, the
//! wake-up scheduler, the reloadable settings and the clock.
//!
//! Built once at startup, then handed to the workers behind an `Arc`.

pub mod config;

pub use config::{
    CommitRetryConfig, ConfigError, ConfigWatcher, LogConfig, RuntimeSettings, WorkerConfig,
};

use crate::error::WorkerResult;
use fm_03_scheduler::{LogWakeupPublisher, WakeupScheduler};
use shared_bus::EventLog;
use shared_types::{SystemTimeSource, TimeSource};
use std::sync::Arc;
use tracing::info;

/// Scheduler that publishes its wake-ups onto the worker's own log.
pub type LogScheduler<L> = WakeupScheduler<LogWakeupPublisher<L>>;

pub struct WorkerContainer<L: EventLog> {
    pub config: WorkerConfig,
    pub log: Arc<L>,
    pub scheduler: Arc<LogScheduler<L>>,
    pub settings: ConfigWatcher,
    pub time: Arc<dyn TimeSource>,
}

impl<L: EventLog> WorkerContainer<L> {
    /// Wires the container on the wall clock. Must run inside a tokio runtime.
    pub fn new(config: WorkerConfig, log: Arc<L>) -> WorkerResult<Self> {
        Self::with_time_source(config, log, Arc::new(SystemTimeSource))
    }

    pub fn with_time_source(
        config: WorkerConfig,
        log: Arc<L>,
        time: Arc<dyn TimeSource>,
    ) -> WorkerResult<Self> {
        config.validate()?;
        if log.partition_count() != config.log.partitions {
            return Err(ConfigError::Invalid {
                reason: format!(
                    "log has {} partitions, config expects {}",
                    log.partition_count(),
                    config.log.partitions
                ),
            }
            .into());
        }

        let scheduler = WakeupScheduler::new(
            config.scheduler.clone(),
            LogWakeupPublisher::new(Arc::clone(&log)),
            Arc::clone(&time),
        )?;
        let settings = ConfigWatcher::new(config.settings.clone());

        info!(
            partitions = config.log.partitions,
            group = %config.log.consumer_group,
            "Worker container initialized"
        );

        Ok(Self {
            config,
            log,
            scheduler: Arc::new(scheduler),
            settings,
            time,
        })
    }

    pub fn partitions(&self) -> Vec<u32> {
        (0..self.config.log.partitions).collect()
    }
}
