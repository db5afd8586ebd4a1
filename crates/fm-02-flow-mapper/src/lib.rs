//! # fm-02-flow-mapper
//!
//! Routes session traffic between the counterparty and local flows.
//!
//! ## Overview
//!
//! Every record on `flow.mapper.event` is keyed by session id. For each
//! one, the state machine loads the key's [`MapperKeyState`] (session state
//! plus the session-to-flow mapping) and returns:
//!
//! - the new state, or an empty one when the key is cleaned up,
//! - records for `p2p.out` (to the counterparty) and `flow.event` (to flows),
//! - timer requests for the scheduler.
//!
//! ```text
//!                 ┌─────────────────────────┐
//! flow.mapper ───→│ FlowMapperStateMachine  │──→ p2p.out
//!   .event        │   └ SessionEventProcessor│──→ flow.event
//!                 └─────────────────────────┘──→ ScheduleRequest
//! ```
//!
//! ## Lifecycle
//!
//! | Status    | Entered when                         | Left when              |
//! |-----------|--------------------------------------|------------------------|
//! | `OPEN`    | init applied (either direction)      | session terminal       |
//! | `CLOSING` | session `CLOSED` or `ERROR`          | cleanup wake-up/sweep  |
//!
//! A flow that reports `NotFound` before it ever started is retried with
//! exponential backoff; after the last attempt the session errors with
//! `FLOW_NOT_FOUND`.

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod error;
pub mod ports;

pub use domain::{
    FlowMapperConfig, FlowMapperState, FlowMapperStateMachine, FlowMapperStatus,
    MapperDisposition, MapperKeyState, MapperOutcome, RetryPolicy, StartContext,
};
pub use error::{FlowMapperError, FlowMapperResult};
pub use ports::FlowMapperApi;
