//! Scheduler configuration.

use crate::error::{SchedulerError, SchedulerResult};
use std::time::Duration;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SchedulerConfig {
    /// Period of the cleanup sweep.
    pub sweep_interval_ms: u64,
    /// Pause between attempts to publish a wake-up.
    pub publish_retry_ms: u64,
    /// Attempts before a wake-up is dropped.
    pub max_publish_attempts: u32,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            sweep_interval_ms: 60_000,
            publish_retry_ms: 1_000,
            max_publish_attempts: 5,
        }
    }
}

impl SchedulerConfig {
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }

    pub fn publish_retry(&self) -> Duration {
        Duration::from_millis(self.publish_retry_ms)
    }

    pub fn validate(&self) -> SchedulerResult<()> {
        if self.sweep_interval_ms == 0 {
            return Err(SchedulerError::InvalidConfig {
                reason: "sweep_interval_ms must be positive".into(),
            });
        }
        if self.max_publish_attempts == 0 {
            return Err(SchedulerError::InvalidConfig {
                reason: "max_publish_attempts must be at least 1".into(),
            });
        }
        Ok(())
    }
}
