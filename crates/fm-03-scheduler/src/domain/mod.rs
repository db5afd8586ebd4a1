//! Domain layer for the scheduler.

pub mod config;

pub use config::SchedulerConfig;
