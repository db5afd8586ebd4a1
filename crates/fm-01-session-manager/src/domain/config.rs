//! Session manager configuration.

use crate::error::{SessionManagerError, SessionResult};

/// Tunables for the session event processor.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Silence from the counterparty after which the session errors out.
    pub session_timeout_ms: u64,
    /// Interval between resends of unacknowledged events; also the
    /// heartbeat interval for live sessions.
    pub resend_window_ms: u64,
    /// Largest gap ahead of the applied prefix that may be buffered.
    pub max_out_of_order_window: u64,
    /// Most events held in the out-of-order buffer at once. The window
    /// leaves room for `max_out_of_order_window - 1` buffered events, so
    /// this must be smaller than the window to have any effect.
    pub max_buffered_events: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_ms: 600_000,
            resend_window_ms: 5_000,
            max_out_of_order_window: 128,
            max_buffered_events: 64,
        }
    }
}

impl SessionConfig {
    pub fn validate(&self) -> SessionResult<()> {
        if self.session_timeout_ms == 0 {
            return Err(SessionManagerError::InvalidConfig {
                reason: "session_timeout_ms must be positive".into(),
            });
        }
        if self.resend_window_ms == 0 || self.resend_window_ms >= self.session_timeout_ms {
            return Err(SessionManagerError::InvalidConfig {
                reason: "resend_window_ms must be positive and below session_timeout_ms".into(),
            });
        }
        if self.max_out_of_order_window == 0 || self.max_buffered_events == 0 {
            return Err(SessionManagerError::InvalidConfig {
                reason: "out-of-order limits must be positive".into(),
            });
        }
        if self.max_buffered_events as u64 >= self.max_out_of_order_window {
            return Err(SessionManagerError::InvalidConfig {
                reason: format!(
                    "max_buffered_events ({}) must be below max_out_of_order_window ({})",
                    self.max_buffered_events, self.max_out_of_order_window
                ),
            });
        }
        Ok(())
    }
}
