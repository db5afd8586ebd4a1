//! # Worker Configuration
//!
//! Unified configuration for the log, the state machines, the scheduler and
//! the partition workers.
//!
//! Everything has a default and can be overridden with an `FM_*` environment
//! variable. The session and mapper sections form the [`RuntimeSettings`]
//! snapshot, which can be reloaded while the workers run; the rest is read
//! once at startup.

use fm_01_session_manager::{SessionConfig, SessionManagerError};
use fm_02_flow_mapper::{FlowMapperConfig, FlowMapperError, RetryPolicy};
use fm_03_scheduler::{SchedulerConfig, SchedulerError};
use shared_bus::{DEFAULT_PARTITION_COUNT, DEFAULT_POLL_BATCH};
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::watch;
use tracing::info;

/// Configuration errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// An environment variable did not parse.
    #[error("Invalid value {value:?} for {var}")]
    InvalidValue { var: String, value: String },

    #[error("Invalid worker config: {reason}")]
    Invalid { reason: String },

    #[error(transparent)]
    Session(#[from] SessionManagerError),

    #[error(transparent)]
    Mapper(#[from] FlowMapperError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),
}

/// Log and consumer settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogConfig {
    /// Partitions of `flow.mapper.event`; one worker per partition.
    pub partitions: u32,
    /// Consumer group the workers commit offsets under.
    pub consumer_group: String,
    /// Records fetched and committed per batch.
    pub poll_batch: usize,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            partitions: DEFAULT_PARTITION_COUNT,
            consumer_group: "flow-mapper".to_string(),
            poll_batch: DEFAULT_POLL_BATCH,
        }
    }
}

/// Retry policy for batch commits that fail transiently.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRetryConfig {
    pub max_attempts: u32,
    /// Multiplied by the attempt number.
    pub backoff_ms: u64,
}

impl Default for CommitRetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff_ms: 200,
        }
    }
}

impl CommitRetryConfig {
    pub fn backoff(&self, attempt: u32) -> Duration {
        Duration::from_millis(self.backoff_ms.saturating_mul(u64::from(attempt)))
    }
}

/// The reloadable part of the configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub session: SessionConfig,
    pub mapper: FlowMapperConfig,
}

impl RuntimeSettings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.session.validate()?;
        self.mapper.validate()?;
        Ok(())
    }
}

/// Complete worker configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerConfig {
    pub log: LogConfig,
    pub settings: RuntimeSettings,
    pub scheduler: SchedulerConfig,
    pub commit_retry: CommitRetryConfig,
    /// How long shutdown waits for workers to finish their batch.
    pub shutdown_grace_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            log: LogConfig::default(),
            settings: RuntimeSettings::default(),
            scheduler: SchedulerConfig::default(),
            commit_retry: CommitRetryConfig::default(),
            shutdown_grace_ms: 5_000,
        }
    }
}

impl WorkerConfig {
    /// Defaults overridden by `FM_*` environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns.
    ///
    /// | Variable | Field |
    /// |----------|-------|
    /// | `FM_PARTITIONS` | `log.partitions` |
    /// | `FM_CONSUMER_GROUP` | `log.consumer_group` |
    /// | `FM_POLL_BATCH` | `log.poll_batch` |
    /// | `FM_SESSION_TIMEOUT_MS` | `settings.session.session_timeout_ms` |
    /// | `FM_RESEND_WINDOW_MS` | `settings.session.resend_window_ms` |
    /// | `FM_MAX_OUT_OF_ORDER_WINDOW` | `settings.session.max_out_of_order_window` |
    /// | `FM_MAX_BUFFERED_EVENTS` | `settings.session.max_buffered_events` |
    /// | `FM_CLEANUP_DELAY_MS` | `settings.mapper.cleanup_delay_ms` |
    /// | `FM_FLOW_START_MAX_ATTEMPTS` | `settings.mapper.flow_start_retry.max_attempts` |
    /// | `FM_FLOW_START_BACKOFF_MS` | `settings.mapper.flow_start_retry.base_backoff_ms` |
    /// | `FM_FLOW_START_MAX_BACKOFF_MS` | `settings.mapper.flow_start_retry.max_backoff_ms` |
    /// | `FM_SWEEP_INTERVAL_MS` | `scheduler.sweep_interval_ms` |
    /// | `FM_WAKEUP_RETRY_MS` | `scheduler.publish_retry_ms` |
    /// | `FM_COMMIT_MAX_ATTEMPTS` | `commit_retry.max_attempts` |
    /// | `FM_COMMIT_BACKOFF_MS` | `commit_retry.backoff_ms` |
    /// | `FM_SHUTDOWN_GRACE_MS` | `shutdown_grace_ms` |
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let env = Overrides { lookup: &lookup };

        env.apply("FM_PARTITIONS", &mut config.log.partitions)?;
        if let Some(group) = lookup("FM_CONSUMER_GROUP") {
            config.log.consumer_group = group;
        }
        env.apply("FM_POLL_BATCH", &mut config.log.poll_batch)?;

        config.settings = RuntimeSettings::from_overrides(&env)?;

        env.apply("FM_SWEEP_INTERVAL_MS", &mut config.scheduler.sweep_interval_ms)?;
        env.apply("FM_WAKEUP_RETRY_MS", &mut config.scheduler.publish_retry_ms)?;
        env.apply("FM_COMMIT_MAX_ATTEMPTS", &mut config.commit_retry.max_attempts)?;
        env.apply("FM_COMMIT_BACKOFF_MS", &mut config.commit_retry.backoff_ms)?;
        env.apply("FM_SHUTDOWN_GRACE_MS", &mut config.shutdown_grace_ms)?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log.partitions == 0 {
            return Err(ConfigError::Invalid {
                reason: "partitions must be at least 1".into(),
            });
        }
        if self.log.poll_batch == 0 {
            return Err(ConfigError::Invalid {
                reason: "poll_batch must be at least 1".into(),
            });
        }
        if self.log.consumer_group.is_empty() {
            return Err(ConfigError::Invalid {
                reason: "consumer_group must not be empty".into(),
            });
        }
        if self.commit_retry.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                reason: "commit max_attempts must be at least 1".into(),
            });
        }
        self.settings.validate()?;
        self.scheduler.validate()?;
        Ok(())
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

impl RuntimeSettings {
    /// Reloadable settings from `FM_*` variables over the defaults.
    pub fn from_env() -> Result<Self, ConfigError> {
        let lookup = |key: &str| std::env::var(key).ok();
        let settings = Self::from_overrides(&Overrides { lookup: &lookup })?;
        settings.validate()?;
        Ok(settings)
    }

    fn from_overrides(env: &Overrides<'_>) -> Result<Self, ConfigError> {
        let mut session = SessionConfig::default();
        env.apply("FM_SESSION_TIMEOUT_MS", &mut session.session_timeout_ms)?;
        env.apply("FM_RESEND_WINDOW_MS", &mut session.resend_window_ms)?;
        env.apply("FM_MAX_OUT_OF_ORDER_WINDOW", &mut session.max_out_of_order_window)?;
        env.apply("FM_MAX_BUFFERED_EVENTS", &mut session.max_buffered_events)?;

        let mut mapper = FlowMapperConfig::default();
        env.apply("FM_CLEANUP_DELAY_MS", &mut mapper.cleanup_delay_ms)?;
        let retry: &mut RetryPolicy = &mut mapper.flow_start_retry;
        env.apply("FM_FLOW_START_MAX_ATTEMPTS", &mut retry.max_attempts)?;
        env.apply("FM_FLOW_START_BACKOFF_MS", &mut retry.base_backoff_ms)?;
        env.apply("FM_FLOW_START_MAX_BACKOFF_MS", &mut retry.max_backoff_ms)?;

        Ok(Self { session, mapper })
    }
}

struct Overrides<'a> {
    lookup: &'a dyn Fn(&str) -> Option<String>,
}

impl Overrides<'_> {
    fn apply<T: FromStr>(&self, var: &str, field: &mut T) -> Result<(), ConfigError> {
        if let Some(value) = (self.lookup)(var) {
            *field = value.trim().parse().map_err(|_| ConfigError::InvalidValue {
                var: var.to_string(),
                value,
            })?;
        }
        Ok(())
    }
}

/// Publishes [`RuntimeSettings`] snapshots to the workers.
///
/// Workers read the latest snapshot at the start of every batch, so a
/// reload takes effect between batches and never half-way through one.
pub struct ConfigWatcher {
    tx: watch::Sender<RuntimeSettings>,
}

impl ConfigWatcher {
    pub fn new(initial: RuntimeSettings) -> Self {
        let (tx, _rx) = watch::channel(initial);
        Self { tx }
    }

    pub fn subscribe(&self) -> watch::Receiver<RuntimeSettings> {
        self.tx.subscribe()
    }

    pub fn current(&self) -> RuntimeSettings {
        self.tx.borrow().clone()
    }

    /// Validates and publishes new settings. Invalid settings are rejected
    /// and the previous snapshot stays in force.
    pub fn reload(&self, settings: RuntimeSettings) -> Result<(), ConfigError> {
        settings.validate()?;
        if *self.tx.borrow() == settings {
            info!("Configuration reload requested, nothing changed");
            return Ok(());
        }
        info!(
            session_timeout_ms = settings.session.session_timeout_ms,
            cleanup_delay_ms = settings.mapper.cleanup_delay_ms,
            "Configuration reloaded"
        );
        self.tx.send_replace(settings);
        Ok(())
    }
}
