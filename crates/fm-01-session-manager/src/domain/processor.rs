//! Session event processor.
//!
//! A pure transition function: the same state and event always give the
//! same outcome. Time comes from event timestamps, never from a clock, so
//! replaying the log reproduces every decision.

use crate::domain::config::SessionConfig;
use crate::domain::state::{SessionRole, SessionState, SessionStatus};
use shared_types::{
    MessageDirection, SessionAck, SessionError, SessionErrorType, SessionEvent, SessionPayload,
    Timestamp,
};
use tracing::{debug, warn};

/// What the processor did with an event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EventDisposition {
    /// The event changed the session.
    Applied,
    /// Held in the out-of-order buffer.
    Buffered,
    /// Already seen; nothing changed and nothing was emitted.
    Duplicate,
    /// Not applicable to the session in its current state.
    Ignored(&'static str),
    /// Refused as a protocol error.
    Rejected(SessionErrorType),
}

impl EventDisposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Buffered => "buffered",
            Self::Duplicate => "duplicate",
            Self::Ignored(_) => "ignored",
            Self::Rejected(_) => "rejected",
        }
    }
}

/// Result of processing one event.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionOutcome {
    /// State after the event; `None` if the event did not create a session.
    pub state: Option<SessionState>,
    /// Events for the counterparty: our sends, acks and errors.
    pub to_counterparty: Vec<SessionEvent>,
    /// Events for the local flow, in sequence order.
    pub to_flow: Vec<SessionEvent>,
    pub disposition: EventDisposition,
}

impl SessionOutcome {
    fn unchanged(state: Option<&SessionState>, disposition: EventDisposition) -> Self {
        Self {
            state: state.cloned(),
            to_counterparty: Vec::new(),
            to_flow: Vec::new(),
            disposition,
        }
    }

    fn quiet(state: SessionState, disposition: EventDisposition) -> Self {
        Self {
            state: Some(state),
            to_counterparty: Vec::new(),
            to_flow: Vec::new(),
            disposition,
        }
    }
}

/// Applies session events to session state.
#[derive(Clone, Debug, Default)]
pub struct SessionEventProcessor {
    config: SessionConfig,
}

impl SessionEventProcessor {
    pub fn new(config: SessionConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Applies one event.
    pub fn process(&self, state: Option<&SessionState>, event: &SessionEvent) -> SessionOutcome {
        match state {
            None => self.process_new(event),
            Some(current) if current.status.is_terminal() => self.process_terminated(current, event),
            Some(current) => self.process_live(current, event),
        }
    }

    /// Resends unacknowledged events and a fresh ack once the resend window
    /// has passed since the last send.
    pub fn heartbeat_due(
        &self,
        state: &SessionState,
        now: Timestamp,
    ) -> Option<(SessionState, Vec<SessionEvent>)> {
        if state.status.is_terminal() || !has_pending_output(state) {
            return None;
        }
        let due = state
            .send_events_state
            .last_send_time
            .saturating_add(self.config.resend_window_ms);
        if now < due {
            return None;
        }

        let mut next = state.clone();
        let mut messages = next.send_events_state.unacked.clone();
        if has_received_anything(&next) {
            messages.push(ack_event(&next, now));
        }
        next.send_events_state.last_send_time = now;
        debug!(
            session_id = %next.session_id,
            resent = next.send_events_state.unacked.len(),
            "Heartbeat due"
        );
        Some((next, messages))
    }

    /// Earliest time the session needs attention: expiry or the next resend.
    pub fn next_wakeup(&self, state: &SessionState) -> Option<Timestamp> {
        if state.status.is_terminal() {
            return None;
        }
        let mut wake = state.expiry_time;
        if has_pending_output(state) {
            wake = wake.min(
                state
                    .send_events_state
                    .last_send_time
                    .saturating_add(self.config.resend_window_ms),
            );
        }
        Some(wake)
    }

    /// A closed session answers resent events with its final ack so a
    /// counterparty still waiting for it can finish. Nothing else changes.
    fn process_terminated(&self, current: &SessionState, event: &SessionEvent) -> SessionOutcome {
        let inbound_sequenced =
            event.direction == MessageDirection::Inbound && event.is_sequenced();
        let resent = inbound_sequenced
            && current.status == SessionStatus::Closed
            && current.identities_match(event)
            && event
                .sequence_num
                .is_some_and(|seq| seq <= current.received_events_state.last_processed_sequence_num);
        if resent {
            debug!(
                session_id = %current.session_id,
                seq = ?event.sequence_num,
                "Resent event for closed session, final ack repeated"
            );
            return SessionOutcome {
                state: Some(current.clone()),
                to_counterparty: vec![ack_event(current, event.timestamp)],
                to_flow: Vec::new(),
                disposition: EventDisposition::Duplicate,
            };
        }

        if inbound_sequenced {
            warn!(
                session_id = %event.session_id,
                kind = event.payload.kind(),
                seq = ?event.sequence_num,
                status = current.status.label(),
                "Late event for terminated session dropped"
            );
        }
        SessionOutcome::unchanged(Some(current), EventDisposition::Ignored("session terminated"))
    }

    fn process_new(&self, event: &SessionEvent) -> SessionOutcome {
        match (event.direction, &event.payload) {
            (MessageDirection::Inbound, SessionPayload::Close(_)) => acknowledge_unknown_close(event),
            (MessageDirection::Inbound, payload) if payload.is_sequenced() => {
                match validate_sequence(event, SessionRole::Initiated) {
                    Ok(seq) => {
                        let state = SessionState::initiated(event, &self.config);
                        self.receive(state, event, seq)
                    }
                    Err(reason) => reject_without_state(event, reason),
                }
            }
            (MessageDirection::Outbound, SessionPayload::Init(_)) => {
                if event.sequence_num != Some(1) {
                    warn!(session_id = %event.session_id, seq = ?event.sequence_num, "Outbound init without sequence number 1");
                    return SessionOutcome::unchanged(
                        None,
                        EventDisposition::Rejected(SessionErrorType::ProtocolViolation),
                    );
                }
                let state = SessionState::initiating(event, &self.config);
                self.send(state, event)
            }
            _ => {
                debug!(
                    session_id = %event.session_id,
                    kind = event.payload.kind(),
                    "Event for unknown session ignored"
                );
                SessionOutcome::unchanged(None, EventDisposition::Ignored("unknown session"))
            }
        }
    }

    fn process_live(&self, current: &SessionState, event: &SessionEvent) -> SessionOutcome {
        let state = current.clone();
        if !state.identities_match(event) {
            return self.fail(state, event, "session identities do not match");
        }

        match (event.direction, &event.payload) {
            (MessageDirection::Inbound, SessionPayload::Error(_)) => {
                self.counterparty_error(state, event)
            }
            (MessageDirection::Outbound, SessionPayload::Error(error)) => {
                self.local_error(state, event, error)
            }
            (MessageDirection::Inbound, SessionPayload::Ack(ack)) => {
                self.acknowledge(state, event, ack)
            }
            (MessageDirection::Outbound, SessionPayload::Ack(_)) => {
                SessionOutcome::quiet(state, EventDisposition::Ignored("acks are generated locally"))
            }
            (MessageDirection::Inbound, _) => match validate_sequence(event, state.role) {
                Ok(seq) => self.receive(state, event, seq),
                Err(reason) => self.fail(state, event, reason),
            },
            (MessageDirection::Outbound, _) => self.send(state, event),
        }
    }

    fn receive(&self, mut state: SessionState, event: &SessionEvent, seq: u64) -> SessionOutcome {
        let received = &state.received_events_state;
        if seq <= received.last_processed_sequence_num || received.contains(seq) {
            debug!(session_id = %state.session_id, seq, "Duplicate session event dropped");
            return SessionOutcome::quiet(state, EventDisposition::Duplicate);
        }
        if seq > received.last_processed_sequence_num + self.config.max_out_of_order_window {
            return self.fail(state, event, "sequence number beyond out-of-order window");
        }
        // The next expected event drains the buffer; only a gap grows it.
        let opens_gap = seq > received.last_processed_sequence_num + 1;
        if opens_gap && received.buffered.len() >= self.config.max_buffered_events {
            return self.fail(state, event, "out-of-order buffer exhausted");
        }
        if received.close_sequence_num.is_some_and(|close| seq > close) {
            return self.fail(state, event, "event sequenced after counterparty close");
        }
        if matches!(event.payload, SessionPayload::Close(_)) {
            if received.buffered.iter().any(|e| e.sequence_num > Some(seq)) {
                return self.fail(state, event, "close sequenced before buffered events");
            }
            state.received_events_state.close_sequence_num = Some(seq);
        }

        state.received_events_state.insert(event.clone());
        state.touch(event.timestamp, &self.config);
        let to_flow = self.drain(&mut state);

        let disposition = if state.received_events_state.last_processed_sequence_num >= seq {
            EventDisposition::Applied
        } else {
            debug!(
                session_id = %state.session_id,
                seq,
                expected = state.received_events_state.last_processed_sequence_num + 1,
                "Out-of-order event buffered"
            );
            EventDisposition::Buffered
        };

        let ack = ack_event(&state, event.timestamp);
        SessionOutcome {
            state: Some(state),
            to_counterparty: vec![ack],
            to_flow,
            disposition,
        }
    }

    /// Applies buffered events while they continue the applied prefix.
    fn drain(&self, state: &mut SessionState) -> Vec<SessionEvent> {
        let mut forwarded = Vec::new();
        while let Some(next) = state.received_events_state.peek_next() {
            if matches!(next.payload, SessionPayload::Close(_))
                && state.send_events_state.has_unacked_data()
            {
                debug!(session_id = %state.session_id, "Counterparty close held until our data is acknowledged");
                break;
            }
            let Some(event) = state.received_events_state.pop_next() else {
                break;
            };
            match event.payload {
                SessionPayload::Data(_) if state.role == SessionRole::Initiating => {
                    state.advance(SessionStatus::Confirmed);
                }
                SessionPayload::Close(_) => {
                    state.counterparty_close_received = true;
                    if state.local_close_sent {
                        state.advance(SessionStatus::WaitForFinalAck);
                    } else {
                        state.advance(SessionStatus::Closing);
                    }
                }
                _ => {}
            }
            forwarded.push(event);
        }
        finish_close(state);
        forwarded
    }

    fn send(&self, mut state: SessionState, event: &SessionEvent) -> SessionOutcome {
        let Some(seq) = event.sequence_num else {
            warn!(session_id = %state.session_id, kind = event.payload.kind(), "Outbound event without sequence number");
            return refuse_send(
                state,
                event,
                SessionErrorType::ProtocolViolation,
                "send refused: missing sequence number",
            );
        };
        let last_sent = state.send_events_state.last_sent_sequence_num;
        if seq <= last_sent {
            debug!(session_id = %state.session_id, seq, "Duplicate outbound event dropped");
            return SessionOutcome::quiet(state, EventDisposition::Duplicate);
        }
        if seq != last_sent + 1 {
            warn!(session_id = %state.session_id, seq, expected = last_sent + 1, "Outbound sequence gap");
            return refuse_send(
                state,
                event,
                SessionErrorType::ProtocolViolation,
                "send refused: sequence number gap",
            );
        }

        let refusal = match event.payload {
            SessionPayload::Init(_) if state.role == SessionRole::Initiated => {
                Some(SessionErrorType::ProtocolViolation)
            }
            SessionPayload::Data(_) | SessionPayload::Close(_)
                if state.local_close_sent
                    || (state.counterparty_close_received
                        && matches!(event.payload, SessionPayload::Data(_))) =>
            {
                Some(SessionErrorType::SessionClosed)
            }
            _ => None,
        };
        if let Some(error_type) = refusal {
            warn!(session_id = %state.session_id, seq, %error_type, "Outbound event refused");
            return refuse_send(state, event, error_type, "send refused: session is closing");
        }

        let mut outgoing = event.clone();
        outgoing.direction = MessageDirection::Outbound;

        let send_state = &mut state.send_events_state;
        send_state.last_sent_sequence_num = seq;
        send_state.unacked.push(outgoing.clone());
        send_state.last_send_time = send_state.last_send_time.max(event.timestamp);

        match event.payload {
            SessionPayload::Data(_) if state.role == SessionRole::Initiated => {
                state.advance(SessionStatus::Confirmed);
            }
            SessionPayload::Close(_) => {
                state.local_close_sent = true;
                if state.counterparty_close_received {
                    state.advance(SessionStatus::WaitForFinalAck);
                } else {
                    state.advance(SessionStatus::Closing);
                }
            }
            _ => {}
        }

        SessionOutcome {
            state: Some(state),
            to_counterparty: vec![outgoing],
            to_flow: Vec::new(),
            disposition: EventDisposition::Applied,
        }
    }

    fn acknowledge(
        &self,
        mut state: SessionState,
        event: &SessionEvent,
        ack: &SessionAck,
    ) -> SessionOutcome {
        let removed = state.send_events_state.apply_ack(ack);
        state.touch(event.timestamp, &self.config);
        if state.role == SessionRole::Initiating {
            state.advance(SessionStatus::Confirmed);
        }
        let to_flow = self.drain(&mut state);
        debug!(
            session_id = %state.session_id,
            removed,
            acked = ack.received_sequence_num,
            status = state.status.label(),
            "Ack applied"
        );
        SessionOutcome {
            state: Some(state),
            to_counterparty: Vec::new(),
            to_flow,
            disposition: EventDisposition::Applied,
        }
    }

    fn counterparty_error(&self, mut state: SessionState, event: &SessionEvent) -> SessionOutcome {
        warn!(session_id = %state.session_id, "Session errored by counterparty");
        state.fail();
        SessionOutcome {
            state: Some(state),
            to_counterparty: Vec::new(),
            to_flow: vec![event.clone()],
            disposition: EventDisposition::Applied,
        }
    }

    fn local_error(
        &self,
        mut state: SessionState,
        event: &SessionEvent,
        error: &SessionError,
    ) -> SessionOutcome {
        let timeout = error.error_type == SessionErrorType::SessionTimeout;
        if timeout && event.timestamp < state.expiry_time {
            debug!(
                session_id = %state.session_id,
                fired_at = event.timestamp,
                expiry = state.expiry_time,
                "Session timer fired before expiry, ignored"
            );
            return SessionOutcome::quiet(state, EventDisposition::Ignored("session not yet expired"));
        }

        warn!(session_id = %state.session_id, error_type = %error.error_type, message = %error.message, "Session errored locally");
        state.fail();
        let outgoing = error_event(&state, event.timestamp, error.error_type, &error.message);
        let to_flow = if timeout { vec![outgoing.clone()] } else { Vec::new() };
        SessionOutcome {
            state: Some(state),
            to_counterparty: vec![outgoing],
            to_flow,
            disposition: EventDisposition::Applied,
        }
    }

    /// Protocol violation: the session errors and both sides are told.
    fn fail(&self, mut state: SessionState, event: &SessionEvent, reason: &str) -> SessionOutcome {
        warn!(session_id = %state.session_id, seq = ?event.sequence_num, reason, "Protocol violation");
        state.fail();
        let error = error_event(
            &state,
            event.timestamp,
            SessionErrorType::ProtocolViolation,
            reason,
        );
        SessionOutcome {
            state: Some(state),
            to_counterparty: vec![error.clone()],
            to_flow: vec![error],
            disposition: EventDisposition::Rejected(SessionErrorType::ProtocolViolation),
        }
    }
}

/// Checks an inbound sequence number against the receiving side's role.
///
/// The initiator numbers its init as 1; the initiated side never sends an
/// init and starts its own numbering at 1 with its first reply.
fn validate_sequence(event: &SessionEvent, role: SessionRole) -> Result<u64, &'static str> {
    let seq = match event.sequence_num {
        Some(seq) if seq >= 1 => seq,
        _ => return Err("missing sequence number"),
    };
    match (role, &event.payload) {
        (SessionRole::Initiating, SessionPayload::Init(_)) => Err("init sent by initiated side"),
        (SessionRole::Initiated, SessionPayload::Init(_)) if seq != 1 => {
            Err("init must carry sequence number 1")
        }
        (SessionRole::Initiated, SessionPayload::Data(_) | SessionPayload::Close(_))
            if seq == 1 =>
        {
            Err("sequence number 1 is reserved for init")
        }
        _ => Ok(seq),
    }
}

fn reject_without_state(event: &SessionEvent, reason: &str) -> SessionOutcome {
    warn!(session_id = %event.session_id, reason, "Protocol violation on unknown session");
    let error = event.reply(
        SessionPayload::error(SessionErrorType::ProtocolViolation, reason),
        event.timestamp,
    );
    SessionOutcome {
        state: None,
        to_counterparty: vec![error],
        to_flow: Vec::new(),
        disposition: EventDisposition::Rejected(SessionErrorType::ProtocolViolation),
    }
}

/// The session is unchanged; the local flow learns its send was dropped.
fn refuse_send(
    state: SessionState,
    event: &SessionEvent,
    error_type: SessionErrorType,
    message: &str,
) -> SessionOutcome {
    let notice = error_event(&state, event.timestamp, error_type, message);
    SessionOutcome {
        state: Some(state),
        to_counterparty: Vec::new(),
        to_flow: vec![notice],
        disposition: EventDisposition::Rejected(error_type),
    }
}

/// A close for a session with no state is acknowledged, never stored.
///
/// Usually the session was closed and cleaned up here and the counterparty
/// is resending its close because our final ack was lost. Storing it would
/// reopen a finished session under the same id.
fn acknowledge_unknown_close(event: &SessionEvent) -> SessionOutcome {
    let Some(seq) = event.sequence_num else {
        return SessionOutcome::unchanged(None, EventDisposition::Ignored("unknown session"));
    };
    debug!(session_id = %event.session_id, seq, "Close for unknown session acknowledged");
    let ack = event.reply(
        SessionPayload::Ack(SessionAck {
            received_sequence_num: 0,
            out_of_order_sequence_nums: vec![seq],
        }),
        event.timestamp,
    );
    SessionOutcome {
        state: None,
        to_counterparty: vec![ack],
        to_flow: Vec::new(),
        disposition: EventDisposition::Ignored("unknown session"),
    }
}

fn finish_close(state: &mut SessionState) {
    if state.local_close_sent
        && state.counterparty_close_received
        && state.send_events_state.unacked.is_empty()
    {
        state.advance(SessionStatus::Closed);
        state.discard_buffers();
    }
}

fn has_received_anything(state: &SessionState) -> bool {
    state.received_events_state.last_processed_sequence_num > 0
        || !state.received_events_state.buffered.is_empty()
}

fn has_pending_output(state: &SessionState) -> bool {
    !state.send_events_state.unacked.is_empty() || has_received_anything(state)
}

fn ack_event(state: &SessionState, timestamp: Timestamp) -> SessionEvent {
    SessionEvent::new(
        state.session_id.clone(),
        MessageDirection::Outbound,
        timestamp,
        state.initiating_identity.clone(),
        state.initiated_identity.clone(),
        SessionPayload::Ack(state.current_ack()),
    )
}

fn error_event(
    state: &SessionState,
    timestamp: Timestamp,
    error_type: SessionErrorType,
    message: &str,
) -> SessionEvent {
    SessionEvent::new(
        state.session_id.clone(),
        MessageDirection::Outbound,
        timestamp,
        state.initiating_identity.clone(),
        state.initiated_identity.clone(),
        SessionPayload::error(error_type, message),
    )
}
