//! Persisted per-session state.

use crate::domain::config::SessionConfig;
use crate::error::{SessionManagerError, SessionResult};
use serde::{Deserialize, Serialize};
use shared_types::{
    HoldingIdentity, SessionAck, SessionEvent, SessionId, SessionPayload, Timestamp,
};

/// Session lifecycle.
///
/// ```text
/// [CREATED] ──first ack / first reply──→ [CONFIRMED]
///     │                                      │
///     └──────────── close (either side) ─────┴──→ [CLOSING]
///                                                    │
///                      both closes, ours unacked ────┼──→ [WAIT_FOR_FINAL_ACK]
///                                                    │            │
///                      both closes, all acked ───────┴────────────┴──→ [CLOSED]
///
/// any non-terminal ──error / protocol violation / timeout──→ [ERROR]
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionStatus {
    Created,
    Confirmed,
    Closing,
    WaitForFinalAck,
    Closed,
    Error,
}

impl SessionStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Error)
    }

    /// Position in the lifecycle; transitions never decrease it.
    pub fn rank(self) -> u8 {
        match self {
            Self::Created => 0,
            Self::Confirmed => 1,
            Self::Closing => 2,
            Self::WaitForFinalAck => 3,
            Self::Closed | Self::Error => 4,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::Created => "CREATED",
            Self::Confirmed => "CONFIRMED",
            Self::Closing => "CLOSING",
            Self::WaitForFinalAck => "WAIT_FOR_FINAL_ACK",
            Self::Closed => "CLOSED",
            Self::Error => "ERROR",
        }
    }
}

/// Which side of the session this party is.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionRole {
    Initiating,
    Initiated,
}

/// Outgoing half: what we sent and what the counterparty has acknowledged.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendEventsState {
    /// Sequence number of the last sequenced event we sent.
    pub last_sent_sequence_num: u64,
    /// Highest contiguous sequence number acknowledged by the counterparty.
    pub last_acked_sequence_num: u64,
    /// Sent but not yet acknowledged, in sequence order.
    pub unacked: Vec<SessionEvent>,
    /// Last time anything was sent; drives resends and heartbeats.
    pub last_send_time: Timestamp,
}

impl SendEventsState {
    /// True while a non-close event is waiting for its ack.
    pub fn has_unacked_data(&self) -> bool {
        self.unacked
            .iter()
            .any(|event| !matches!(event.payload, SessionPayload::Close(_)))
    }

    /// Drops everything the ack covers. Returns how many events were removed.
    pub fn apply_ack(&mut self, ack: &SessionAck) -> usize {
        let before = self.unacked.len();
        self.unacked
            .retain(|event| !event.sequence_num.is_some_and(|seq| ack.covers(seq)));
        self.last_acked_sequence_num = self
            .last_acked_sequence_num
            .max(ack.received_sequence_num.min(self.last_sent_sequence_num));
        before - self.unacked.len()
    }
}

/// Incoming half: the applied prefix and the out-of-order buffer.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedEventsState {
    /// Highest sequence number applied; everything at or below it is done.
    pub last_processed_sequence_num: u64,
    /// Received but not yet applied, sorted by sequence number.
    pub buffered: Vec<SessionEvent>,
    /// Sequence number of the counterparty's close once it has been seen.
    pub close_sequence_num: Option<u64>,
}

impl ReceivedEventsState {
    pub fn contains(&self, sequence_num: u64) -> bool {
        self.buffered
            .iter()
            .any(|event| event.sequence_num == Some(sequence_num))
    }

    pub fn insert(&mut self, event: SessionEvent) {
        let seq = event.sequence_num.unwrap_or_default();
        let idx = self
            .buffered
            .partition_point(|e| e.sequence_num.unwrap_or_default() < seq);
        self.buffered.insert(idx, event);
    }

    /// Next event if it continues the applied prefix.
    pub fn peek_next(&self) -> Option<&SessionEvent> {
        self.buffered
            .first()
            .filter(|e| e.sequence_num == Some(self.last_processed_sequence_num + 1))
    }

    pub fn pop_next(&mut self) -> Option<SessionEvent> {
        self.peek_next()?;
        let event = self.buffered.remove(0);
        self.last_processed_sequence_num += 1;
        Some(event)
    }

    pub fn buffered_sequence_nums(&self) -> Vec<u64> {
        self.buffered.iter().filter_map(|e| e.sequence_num).collect()
    }
}

/// Everything known about one session on this side.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionState {
    pub session_id: SessionId,
    pub role: SessionRole,
    pub status: SessionStatus,
    pub initiating_identity: HoldingIdentity,
    pub initiated_identity: HoldingIdentity,
    pub send_events_state: SendEventsState,
    pub received_events_state: ReceivedEventsState,
    pub local_close_sent: bool,
    pub counterparty_close_received: bool,
    pub last_received_time: Timestamp,
    /// When the session expires if the counterparty stays silent.
    pub expiry_time: Timestamp,
}

impl SessionState {
    /// New state for a session opened by a local flow.
    pub fn initiating(event: &SessionEvent, config: &SessionConfig) -> Self {
        Self::new(SessionRole::Initiating, event, config)
    }

    /// New state for a session opened by the counterparty.
    pub fn initiated(event: &SessionEvent, config: &SessionConfig) -> Self {
        Self::new(SessionRole::Initiated, event, config)
    }

    fn new(role: SessionRole, event: &SessionEvent, config: &SessionConfig) -> Self {
        Self {
            session_id: event.session_id.clone(),
            role,
            status: SessionStatus::Created,
            initiating_identity: event.initiating_identity.clone(),
            initiated_identity: event.initiated_identity.clone(),
            send_events_state: SendEventsState {
                last_send_time: event.timestamp,
                ..SendEventsState::default()
            },
            received_events_state: ReceivedEventsState::default(),
            local_close_sent: false,
            counterparty_close_received: false,
            last_received_time: event.timestamp,
            expiry_time: event.timestamp.saturating_add(config.session_timeout_ms),
        }
    }

    pub fn counterparty(&self) -> &HoldingIdentity {
        match self.role {
            SessionRole::Initiating => &self.initiated_identity,
            SessionRole::Initiated => &self.initiating_identity,
        }
    }

    /// Whether the session's init has been applied on this side.
    ///
    /// False only for an initiated session that has buffered traffic ahead
    /// of its init.
    pub fn init_applied(&self) -> bool {
        match self.role {
            SessionRole::Initiating => true,
            SessionRole::Initiated => self.received_events_state.last_processed_sequence_num >= 1,
        }
    }

    pub fn identities_match(&self, event: &SessionEvent) -> bool {
        self.initiating_identity == event.initiating_identity
            && self.initiated_identity == event.initiated_identity
    }

    /// Records counterparty activity, pushing the expiry out.
    pub fn touch(&mut self, now: Timestamp, config: &SessionConfig) {
        self.last_received_time = self.last_received_time.max(now);
        self.expiry_time = self
            .expiry_time
            .max(self.last_received_time.saturating_add(config.session_timeout_ms));
    }

    /// Moves the status forward; a transition backwards is ignored.
    pub fn advance(&mut self, status: SessionStatus) {
        if !self.status.is_terminal() && status.rank() >= self.status.rank() {
            self.status = status;
        }
    }

    /// Terminal transition to `ERROR`; every buffer is discarded.
    pub fn fail(&mut self) {
        self.status = SessionStatus::Error;
        self.discard_buffers();
    }

    pub fn discard_buffers(&mut self) {
        self.send_events_state.unacked.clear();
        self.received_events_state.buffered.clear();
    }

    /// Ack describing everything received so far.
    pub fn current_ack(&self) -> SessionAck {
        SessionAck {
            received_sequence_num: self.received_events_state.last_processed_sequence_num,
            out_of_order_sequence_nums: self.received_events_state.buffered_sequence_nums(),
        }
    }

    /// Structural checks on a state loaded from storage.
    pub fn check_invariants(&self) -> SessionResult<()> {
        let received = &self.received_events_state;
        let mut previous = received.last_processed_sequence_num;
        for event in &received.buffered {
            let seq = event.sequence_num.ok_or_else(|| self.corrupted("unsequenced buffered event"))?;
            if seq <= previous {
                return Err(self.corrupted("buffered events out of order"));
            }
            previous = seq;
        }

        let send = &self.send_events_state;
        if send.last_acked_sequence_num > send.last_sent_sequence_num {
            return Err(self.corrupted("ack watermark ahead of sent watermark"));
        }
        if send
            .unacked
            .iter()
            .any(|e| e.sequence_num.map_or(true, |seq| seq > send.last_sent_sequence_num))
        {
            return Err(self.corrupted("unacked event beyond sent watermark"));
        }

        if self.status.is_terminal() && (!send.unacked.is_empty() || !received.buffered.is_empty()) {
            return Err(self.corrupted("terminal session still holds buffered events"));
        }
        if self.status == SessionStatus::Closed
            && !(self.local_close_sent && self.counterparty_close_received)
        {
            return Err(self.corrupted("closed without both closes"));
        }
        Ok(())
    }

    fn corrupted(&self, reason: &str) -> SessionManagerError {
        SessionManagerError::StateCorrupted {
            session_id: self.session_id.to_string(),
            reason: reason.to_string(),
        }
    }
}
