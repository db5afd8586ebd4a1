//! # Shared Bus - Ordered Partitioned Log
//!
//! The transport every flow mapper worker reads from and writes to.
//!
//! ## Guarantees
//!
//! - **Per-key ordering:** records with the same key land on the same
//!   partition and are read back in publish order.
//! - **At-least-once:** a consumer group resumes from its committed offset,
//!   so uncommitted records are redelivered after a restart.
//! - **Atomic commits:** output records and consumer offsets can be written
//!   in one transaction, which is how state and events are co-committed.
//! - **Compaction view:** the latest value per key is kept for every
//!   topic; tombstones remove the key.
//!
//! ```text
//! ┌──────────────┐  commit_transaction()  ┌──────────────┐
//! │   Worker p   │ ─────────────────────▶ │  Event Log   │
//! │              │ ◀───────────────────── │ (partitions) │
//! └──────────────┘    subscribe()/poll()  └──────────────┘
//! ```

#![allow(clippy::missing_const_for_fn)]
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod error;
pub mod publisher;
pub mod subscriber;

pub use error::{LogError, LogResult};
pub use publisher::{
    partition_for_key, ConsumerRecord, EventLog, InMemoryEventLog, LogTransaction, OffsetCommit,
    RecordMetadata,
};
pub use subscriber::{InMemoryConsumer, PartitionConsumer};

/// Partitions per topic when none is configured.
pub const DEFAULT_PARTITION_COUNT: u32 = 8;

/// Records fetched per poll when none is configured.
pub const DEFAULT_POLL_BATCH: usize = 100;

/// Dead Letter Queue topic for records that cannot be processed.
pub const DLQ_TOPIC: &str = shared_types::topics::FLOW_MAPPER_DLQ;
