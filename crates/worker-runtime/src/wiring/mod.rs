//! # Wiring
//!
//! Connects the log to the flow mapper: one [`PartitionWorker`] per
//! partition, with failed records routed to the dead-letter topic.

pub mod dead_letter;
pub mod partition_worker;

pub use dead_letter::{dead_letter, load_halted, DeadLetterReason};
pub use partition_worker::PartitionWorker;
