//! Inbound port: the timer API used by the worker runtime.

use crate::error::SchedulerResult;
use shared_types::{ScheduleRequest, SessionId, Timestamp, WakeupKind};
use std::time::Duration;

/// At most one live timer per `(session, kind)`.
pub trait TaskScheduler: Send + Sync {
    /// Arms a timer, replacing any existing one for the same key. Arming the
    /// same deadline twice is a no-op.
    fn schedule(&self, session_id: &SessionId, kind: WakeupKind, fire_at: Timestamp)
        -> SchedulerResult<()>;

    /// Returns whether a timer was cancelled.
    fn cancel(&self, session_id: &SessionId, kind: WakeupKind) -> bool;

    /// Cancels every timer of a session; returns how many.
    fn cancel_session(&self, session_id: &SessionId) -> usize;

    /// Publishes a sweep to each partition every `interval`.
    fn start_sweep(&self, interval: Duration, partitions: Vec<u32>) -> SchedulerResult<()>;

    /// Aborts all timers and refuses new ones.
    fn shutdown(&self);

    fn pending_count(&self) -> usize;

    /// Applies requests produced by a committed transition, in order.
    fn apply(&self, requests: &[ScheduleRequest]) -> SchedulerResult<()> {
        for request in requests {
            match request {
                ScheduleRequest::Schedule {
                    session_id,
                    kind,
                    fire_at,
                } => self.schedule(session_id, *kind, *fire_at)?,
                ScheduleRequest::Cancel { session_id, kind } => {
                    self.cancel(session_id, *kind);
                }
                ScheduleRequest::CancelAll { session_id } => {
                    self.cancel_session(session_id);
                }
            }
        }
        Ok(())
    }
}
