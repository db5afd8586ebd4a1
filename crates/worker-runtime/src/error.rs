//! Worker runtime errors.

use crate::container::ConfigError;
use fm_03_scheduler::SchedulerError;
use shared_bus::LogError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum WorkerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Log(#[from] LogError),

    #[error(transparent)]
    Scheduler(#[from] SchedulerError),

    /// A snapshot could not be serialized; the batch is not committed.
    #[error("Failed to encode state for key {key}: {reason}")]
    StateEncode { key: String, reason: String },

    /// A batch kept failing to commit; the worker stops without moving its
    /// offset, so the batch is replayed by whoever takes the partition.
    #[error("Commit on partition {partition} failed after {attempts} attempts: {source}")]
    CommitFailed {
        partition: u32,
        attempts: u32,
        source: LogError,
    },

    #[error("Worker runtime already started")]
    AlreadyStarted,
}

pub type WorkerResult<T> = Result<T, WorkerError>;
