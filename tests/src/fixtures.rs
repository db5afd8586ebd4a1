//! # Event Builders
//!
//! Shared by the scenario tests and the benchmarks. Alice initiates, Bob is
//! the initiated side, and every event carries both identities.

use fm_03_scheduler::SWEEP_KEY;
use shared_types::{
    topics, FlowId, FlowMapperEvent, FlowStatus, HoldingIdentity, MessageDirection, Record,
    RecordValue, SessionAck, SessionClose, SessionData, SessionEvent, SessionId, SessionInit,
    SessionPayload, Timestamp, WakeupKind,
};

pub fn alice() -> HoldingIdentity {
    HoldingIdentity::new("O=Alice, L=London, C=GB", "group-1")
}

pub fn bob() -> HoldingIdentity {
    HoldingIdentity::new("O=Bob, L=Paris, C=FR", "group-1")
}

pub fn session_event(
    session: &str,
    direction: MessageDirection,
    seq: Option<u64>,
    ts: Timestamp,
    payload: SessionPayload,
) -> SessionEvent {
    let event = SessionEvent::new(SessionId::from(session), direction, ts, alice(), bob(), payload);
    match seq {
        Some(seq) => event.with_sequence(seq),
        None => event,
    }
}

/// `SessionInit` with sequence number 1. Outbound inits name the local flow.
pub fn init(session: &str, direction: MessageDirection, ts: Timestamp) -> SessionEvent {
    let flow_id = match direction {
        MessageDirection::Outbound => Some(FlowId::from("alice-flow")),
        MessageDirection::Inbound => None,
    };
    session_event(
        session,
        direction,
        Some(1),
        ts,
        SessionPayload::Init(SessionInit {
            flow_id,
            protocol: "ping".into(),
            ..SessionInit::default()
        }),
    )
}

pub fn data(session: &str, direction: MessageDirection, seq: u64, ts: Timestamp) -> SessionEvent {
    session_event(
        session,
        direction,
        Some(seq),
        ts,
        SessionPayload::Data(SessionData {
            payload: seq.to_be_bytes().to_vec(),
        }),
    )
}

pub fn close(session: &str, direction: MessageDirection, seq: u64, ts: Timestamp) -> SessionEvent {
    session_event(session, direction, Some(seq), ts, SessionPayload::Close(SessionClose))
}

/// Inbound ack from the counterparty.
pub fn ack(session: &str, received: u64, out_of_order: Vec<u64>, ts: Timestamp) -> SessionEvent {
    session_event(
        session,
        MessageDirection::Inbound,
        None,
        ts,
        SessionPayload::Ack(SessionAck {
            received_sequence_num: received,
            out_of_order_sequence_nums: out_of_order,
        }),
    )
}

/// Status report for the flow started on the initiated side.
pub fn flow_status(session: &str, status: FlowStatus, ts: Timestamp) -> FlowMapperEvent {
    let session_id = SessionId::from(session);
    FlowMapperEvent::FlowStatusChanged {
        flow_id: FlowId::for_initiated_session(&session_id),
        session_id,
        status,
        timestamp: ts,
    }
}

pub fn wakeup(session: &str, kind: WakeupKind, fired_at: Timestamp) -> FlowMapperEvent {
    FlowMapperEvent::Wakeup {
        session_id: SessionId::from(session),
        kind,
        fired_at,
    }
}

/// Record for the mapper's input topic, keyed the way producers key it.
pub fn input(event: FlowMapperEvent) -> Record {
    let key = event
        .session_id()
        .map_or_else(|| SWEEP_KEY.to_string(), SessionId::to_string);
    Record::new(topics::FLOW_MAPPER_EVENT, key, RecordValue::FlowMapper(event))
}

/// What the counterparty sees of an event we sent: the same event, inbound.
pub fn as_received(mut event: SessionEvent) -> FlowMapperEvent {
    event.direction = MessageDirection::Inbound;
    FlowMapperEvent::Session(event)
}
