//! # fm-01-session-manager
//!
//! Session state and the session event processor.
//!
//! ## Overview
//!
//! A session is an ordered, bidirectional, at-least-once conversation
//! between two parties. Both sides number their own sequenced messages from
//! 1. The processor turns `(state?, event)` into a new state plus the events
//! to send to the counterparty and to hand to the local flow:
//!
//! - **Dedup:** anything at or below the applied watermark, or already
//!   buffered, is dropped without output.
//! - **Reordering:** events ahead of the watermark wait in a bounded buffer
//!   and are released in order once the gap fills.
//! - **Acks:** every newly received sequenced event is acknowledged with the
//!   applied watermark and the buffered sequence numbers.
//! - **Close:** a counterparty close waits until our own data has been
//!   acknowledged; `CLOSED` needs both closes and nothing outstanding.
//! - **Errors:** short-circuit to `ERROR` and drop all buffers.
//!
//! ```text
//! Counterparty ──SessionEvent──→ Processor ──acks/errors──→ Counterparty
//!                                    │
//! Local flow ───SessionEvent──→      └──in-order events──→ Local flow
//! ```
//!
//! ## Example
//!
//! ```rust,ignore
//! use fm_01_session_manager::{SessionConfig, SessionEventProcessor};
//!
//! let processor = SessionEventProcessor::new(SessionConfig::default());
//! let outcome = processor.process(state.as_ref(), &event);
//! persist(outcome.state);
//! send(outcome.to_counterparty);
//! deliver(outcome.to_flow);
//! ```

#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod domain;
pub mod error;
pub mod ports;

pub use domain::{
    EventDisposition, ReceivedEventsState, SendEventsState, SessionConfig, SessionEventProcessor,
    SessionOutcome, SessionRole, SessionState, SessionStatus,
};
pub use error::{SessionManagerError, SessionResult};
pub use ports::SessionEventHandler;
