//! # fm-03-scheduler
//!
//! Timers for the flow mapper.
//!
//! The state machine never sleeps. It asks for wake-ups through
//! `ScheduleRequest`s; this crate arms them as tokio tasks and, when one is
//! due, publishes a `FlowMapperEvent::Wakeup` back onto the mapper's input
//! topic so it is processed in order with everything else for the session.
//!
//! ```text
//! Worker ──apply(requests)──→ WakeupScheduler ──Wakeup──→ flow.mapper.event
//!                                   │
//!                                   └──every interval──Sweep──→ each partition
//! ```
//!
//! - One timer per `(session, kind)`; re-arming replaces it.
//! - Requests are applied only after the transition that produced them was
//!   committed, so a crash never leaves a timer without its state.
//! - `shutdown()` (or drop) aborts every timer and the sweep.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod adapters;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use adapters::{LogWakeupPublisher, SWEEP_KEY};
pub use domain::SchedulerConfig;
pub use error::{SchedulerError, SchedulerResult};
pub use ports::{TaskScheduler, WakeupPublisher};
pub use service::WakeupScheduler;
