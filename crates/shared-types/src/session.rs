//! # Session Events
//!
//! The wire model for messages exchanged between the two parties of a
//! session. Both sides number their own sequenced messages (`Init`, `Data`,
//! `Close`) starting at 1; `Ack` and `Error` are never sequenced.

use crate::entities::{FlowId, HoldingIdentity, SessionId, Timestamp};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Which way a session event travels relative to this party.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageDirection {
    /// Received from the counterparty.
    Inbound,
    /// Originated locally (the local flow, or a synthetic event raised by
    /// the mapper) and destined for the counterparty.
    Outbound,
}

/// A single message of a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionEvent {
    pub session_id: SessionId,
    pub direction: MessageDirection,
    /// Present for `Init`, `Data` and `Close`.
    pub sequence_num: Option<u64>,
    pub timestamp: Timestamp,
    pub initiating_identity: HoldingIdentity,
    pub initiated_identity: HoldingIdentity,
    pub payload: SessionPayload,
}

impl SessionEvent {
    /// Creates an unsequenced event.
    pub fn new(
        session_id: SessionId,
        direction: MessageDirection,
        timestamp: Timestamp,
        initiating_identity: HoldingIdentity,
        initiated_identity: HoldingIdentity,
        payload: SessionPayload,
    ) -> Self {
        Self {
            session_id,
            direction,
            sequence_num: None,
            timestamp,
            initiating_identity,
            initiated_identity,
            payload,
        }
    }

    pub fn with_sequence(mut self, sequence_num: u64) -> Self {
        self.sequence_num = Some(sequence_num);
        self
    }

    /// Builds an outbound event on the same session, e.g. an ack or an error.
    pub fn reply(&self, payload: SessionPayload, timestamp: Timestamp) -> Self {
        Self::new(
            self.session_id.clone(),
            MessageDirection::Outbound,
            timestamp,
            self.initiating_identity.clone(),
            self.initiated_identity.clone(),
            payload,
        )
    }

    pub fn is_sequenced(&self) -> bool {
        self.payload.is_sequenced()
    }
}

/// Payload of a session event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum SessionPayload {
    Init(SessionInit),
    Data(SessionData),
    Close(SessionClose),
    Error(SessionError),
    Ack(SessionAck),
}

impl SessionPayload {
    pub fn is_sequenced(&self) -> bool {
        matches!(self, Self::Init(_) | Self::Data(_) | Self::Close(_))
    }

    /// Short label used in logs and metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Init(_) => "init",
            Self::Data(_) => "data",
            Self::Close(_) => "close",
            Self::Error(_) => "error",
            Self::Ack(_) => "ack",
        }
    }

    pub fn error(error_type: SessionErrorType, message: impl Into<String>) -> Self {
        Self::Error(SessionError {
            error_type,
            message: message.into(),
        })
    }
}

/// Opens a session and asks the counterparty to start a flow for it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionInit {
    /// Flow on the initiating side; set on outbound inits.
    pub flow_id: Option<FlowId>,
    /// Protocol name the initiated flow is registered under.
    pub protocol: String,
    pub context: BTreeMap<String, String>,
    /// Optional first message piggybacked on the init.
    pub payload: Option<Vec<u8>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionData {
    pub payload: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionClose;

/// Terminal error for a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionError {
    pub error_type: SessionErrorType,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionErrorType {
    /// Malformed sequencing, identity mismatch, or exhausted buffers.
    ProtocolViolation,
    /// No activity from the counterparty before the session expired.
    SessionTimeout,
    /// The destination flow does not exist.
    FlowNotFound,
    /// The flow failed or finished while the session was still open.
    FlowFailed,
    /// A send was attempted on a session that is already closing.
    SessionClosed,
    /// Raised by the flow itself.
    Application,
}

impl fmt::Display for SessionErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::ProtocolViolation => "PROTOCOL_VIOLATION",
            Self::SessionTimeout => "SESSION_TIMEOUT",
            Self::FlowNotFound => "FLOW_NOT_FOUND",
            Self::FlowFailed => "FLOW_FAILED",
            Self::SessionClosed => "SESSION_CLOSED",
            Self::Application => "APPLICATION",
        };
        f.write_str(label)
    }
}

/// Cumulative acknowledgement.
///
/// Everything up to and including `received_sequence_num` has been
/// received, plus the listed out-of-order sequence numbers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct SessionAck {
    pub received_sequence_num: u64,
    pub out_of_order_sequence_nums: Vec<u64>,
}

impl SessionAck {
    pub fn covers(&self, sequence_num: u64) -> bool {
        sequence_num <= self.received_sequence_num
            || self.out_of_order_sequence_nums.contains(&sequence_num)
    }
}
