//! Adapters for the scheduler.

pub mod log_publisher;

pub use log_publisher::{LogWakeupPublisher, SWEEP_KEY};
