//! Log error types.

use thiserror::Error;

/// Errors raised by the ordered log.
///
/// Every variant is transient from the caller's point of view: the same
/// batch can be retried once the condition clears.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LogError {
    /// The log has been shut down.
    #[error("Log closed")]
    Closed,

    /// Partition outside the topic's partition range.
    #[error("Unknown partition {partition} for topic {topic}")]
    UnknownPartition { topic: String, partition: u32 },

    /// A commit tried to move a consumer group offset backwards.
    #[error("Offset regression for {group}/{topic}/{partition}: committed {committed}, requested {requested}")]
    OffsetRegression {
        group: String,
        topic: String,
        partition: u32,
        committed: u64,
        requested: u64,
    },

    /// The broker rejected the write.
    #[error("Publish failed: {0}")]
    PublishFailed(String),
}

/// Result alias for log operations.
pub type LogResult<T> = Result<T, LogError>;
