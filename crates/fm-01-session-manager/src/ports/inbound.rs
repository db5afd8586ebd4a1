//! Inbound port: the API the flow mapper drives sessions through.

use crate::domain::{SessionEventProcessor, SessionOutcome, SessionState};
use shared_types::{SessionEvent, Timestamp};

/// Session transition API.
///
/// Implementations must be pure: no I/O and no clock reads.
pub trait SessionEventHandler: Send + Sync {
    /// Applies one session event to the (possibly absent) state.
    fn process(&self, state: Option<&SessionState>, event: &SessionEvent) -> SessionOutcome;

    /// Messages to resend at `now`, with the state updated to record the send.
    fn heartbeat_due(
        &self,
        state: &SessionState,
        now: Timestamp,
    ) -> Option<(SessionState, Vec<SessionEvent>)>;

    /// Next time the session needs a wake-up; `None` once terminal.
    fn next_wakeup(&self, state: &SessionState) -> Option<Timestamp>;
}

impl SessionEventHandler for SessionEventProcessor {
    fn process(&self, state: Option<&SessionState>, event: &SessionEvent) -> SessionOutcome {
        SessionEventProcessor::process(self, state, event)
    }

    fn heartbeat_due(
        &self,
        state: &SessionState,
        now: Timestamp,
    ) -> Option<(SessionState, Vec<SessionEvent>)> {
        SessionEventProcessor::heartbeat_due(self, state, now)
    }

    fn next_wakeup(&self, state: &SessionState) -> Option<Timestamp> {
        SessionEventProcessor::next_wakeup(self, state)
    }
}
