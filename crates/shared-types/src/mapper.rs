//! # Flow Mapper Events
//!
//! Inputs consumed by the flow mapper, instructions it emits towards the
//! flow-execution layer, and the wake-up requests it hands to the scheduler.

use crate::entities::{FlowId, HoldingIdentity, SessionId, Timestamp};
use crate::session::SessionEvent;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Everything that can arrive on the flow mapper's input topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowMapperEvent {
    /// Session traffic, inbound from the counterparty or outbound from a
    /// local flow.
    Session(SessionEvent),
    /// Report from the flow-execution layer about the flow behind a session.
    FlowStatusChanged {
        session_id: SessionId,
        flow_id: FlowId,
        status: FlowStatus,
        timestamp: Timestamp,
    },
    /// A scheduled timer fired.
    Wakeup {
        session_id: SessionId,
        kind: WakeupKind,
        fired_at: Timestamp,
    },
    /// Periodic expiry sweep over a whole partition.
    Sweep { fired_at: Timestamp },
}

impl FlowMapperEvent {
    /// Session this event is keyed by; `None` for partition-wide events.
    pub fn session_id(&self) -> Option<&SessionId> {
        match self {
            Self::Session(event) => Some(&event.session_id),
            Self::FlowStatusChanged { session_id, .. } | Self::Wakeup { session_id, .. } => {
                Some(session_id)
            }
            Self::Sweep { .. } => None,
        }
    }

    /// Time the event happened, used as "now" by the pure state machines.
    pub fn timestamp(&self) -> Timestamp {
        match self {
            Self::Session(event) => event.timestamp,
            Self::FlowStatusChanged { timestamp, .. } => *timestamp,
            Self::Wakeup { fired_at, .. } | Self::Sweep { fired_at } => *fired_at,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(event) => event.payload.kind(),
            Self::FlowStatusChanged { .. } => "flow_status",
            Self::Wakeup { .. } => "wakeup",
            Self::Sweep { .. } => "sweep",
        }
    }
}

/// State of a flow as reported by the flow-execution layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowStatus {
    Started,
    Completed,
    Failed { reason: String },
    NotFound,
}

/// Instruction for the flow-execution layer, keyed by flow id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum FlowEvent {
    StartFlow {
        flow_id: FlowId,
        session_id: SessionId,
        initiator: HoldingIdentity,
        protocol: String,
        context: BTreeMap<String, String>,
        payload: Option<Vec<u8>>,
        /// Zero for the first attempt, incremented on every retry.
        attempt: u32,
    },
    DeliverSessionEvent {
        flow_id: FlowId,
        event: SessionEvent,
    },
}

impl FlowEvent {
    pub fn flow_id(&self) -> &FlowId {
        match self {
            Self::StartFlow { flow_id, .. } | Self::DeliverSessionEvent { flow_id, .. } => flow_id,
        }
    }
}

/// Timers the mapper may ask for, at most one of each kind per session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WakeupKind {
    /// Session expiry and resend of unacknowledged messages.
    SessionTimer,
    /// Removal of a closing mapping once its linger window has passed.
    Cleanup,
    /// Retry of a flow start that came back as not found.
    RetryStart,
}

impl fmt::Display for WakeupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::SessionTimer => "session_timer",
            Self::Cleanup => "cleanup",
            Self::RetryStart => "retry_start",
        };
        f.write_str(label)
    }
}

/// Side effect on the scheduler requested by a state transition.
///
/// Applied only after the transition has been committed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScheduleRequest {
    Schedule {
        session_id: SessionId,
        kind: WakeupKind,
        fire_at: Timestamp,
    },
    Cancel {
        session_id: SessionId,
        kind: WakeupKind,
    },
    CancelAll { session_id: SessionId },
}

impl ScheduleRequest {
    pub fn session_id(&self) -> &SessionId {
        match self {
            Self::Schedule { session_id, .. }
            | Self::Cancel { session_id, .. }
            | Self::CancelAll { session_id } => session_id,
        }
    }
}
