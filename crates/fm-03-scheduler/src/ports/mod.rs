//! Ports for the scheduler.

pub mod inbound;
pub mod outbound;

pub use inbound::TaskScheduler;
pub use outbound::WakeupPublisher;
