//! Mapper state persisted per session key.

use crate::error::{FlowMapperError, FlowMapperResult};
use fm_01_session_manager::SessionState;
use serde::{Deserialize, Serialize};
use shared_types::{FlowId, HoldingIdentity, SessionEvent, SessionId, SessionInit, Timestamp};
use std::collections::BTreeMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum FlowMapperStatus {
    Open,
    Closing,
}

/// What the flow-execution layer needs to (re)start an initiated flow.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StartContext {
    pub initiator: HoldingIdentity,
    pub protocol: String,
    pub context: BTreeMap<String, String>,
    pub payload: Option<Vec<u8>>,
}

/// Routing entry from a session to the flow serving it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowMapperState {
    pub session_id: SessionId,
    pub flow_id: FlowId,
    pub status: FlowMapperStatus,
    /// Whether the flow has confirmed it is running.
    pub flow_ready: bool,
    /// Session events held until the flow is ready.
    pub undelivered: Vec<SessionEvent>,
    /// Present for initiated sessions, so the start can be retried.
    pub start_context: Option<StartContext>,
    pub start_attempts: u32,
    pub retry_at: Option<Timestamp>,
    /// Open: mirrors the session expiry. Closing: when cleanup may run.
    pub expiry_time: Timestamp,
}

impl FlowMapperState {
    /// Mapping for a session opened by a local flow.
    pub fn initiating(session_id: SessionId, flow_id: FlowId, expiry_time: Timestamp) -> Self {
        Self {
            session_id,
            flow_id,
            status: FlowMapperStatus::Open,
            flow_ready: true,
            undelivered: Vec::new(),
            start_context: None,
            start_attempts: 0,
            retry_at: None,
            expiry_time,
        }
    }

    /// Mapping for a session opened by the counterparty; the flow still has
    /// to be started.
    pub fn initiated(init_event: &SessionEvent, init: &SessionInit, expiry_time: Timestamp) -> Self {
        Self {
            session_id: init_event.session_id.clone(),
            flow_id: FlowId::for_initiated_session(&init_event.session_id),
            status: FlowMapperStatus::Open,
            flow_ready: false,
            undelivered: Vec::new(),
            start_context: Some(StartContext {
                initiator: init_event.initiating_identity.clone(),
                protocol: init.protocol.clone(),
                context: init.context.clone(),
                payload: init.payload.clone(),
            }),
            start_attempts: 0,
            retry_at: None,
            expiry_time,
        }
    }
}

/// Everything stored under one session key, committed as a unit.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MapperKeyState {
    pub session: Option<SessionState>,
    pub mapper: Option<FlowMapperState>,
}

impl MapperKeyState {
    pub fn is_empty(&self) -> bool {
        self.session.is_none() && self.mapper.is_none()
    }

    pub fn check_invariants(&self) -> FlowMapperResult<()> {
        if let Some(session) = &self.session {
            session.check_invariants()?;
        }
        match (&self.session, &self.mapper) {
            (None, Some(mapper)) => Err(corrupted(&mapper.session_id, "mapping without session")),
            (Some(session), None) if session.init_applied() && !session.status.is_terminal() => {
                Err(corrupted(&session.session_id, "live session without mapping"))
            }
            (Some(session), Some(mapper)) if session.session_id != mapper.session_id => {
                Err(corrupted(&session.session_id, "mapping belongs to another session"))
            }
            _ => Ok(()),
        }
    }
}

fn corrupted(session_id: &SessionId, reason: &str) -> FlowMapperError {
    FlowMapperError::StateCorrupted {
        session_id: session_id.to_string(),
        reason: reason.to_string(),
    }
}
