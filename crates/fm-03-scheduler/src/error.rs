//! Scheduler error types.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchedulerError {
    /// The scheduler was shut down; no new timers are accepted.
    #[error("Scheduler is shut down")]
    ShutDown,

    /// Created outside a tokio runtime.
    #[error("Scheduler requires a tokio runtime")]
    NoRuntime,

    #[error("Invalid scheduler config: {reason}")]
    InvalidConfig { reason: String },
}

pub type SchedulerResult<T> = Result<T, SchedulerError>;
