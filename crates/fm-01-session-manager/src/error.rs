//! Error types for the session manager.
//!
//! Protocol problems are not errors here: they move the session to
//! `ERROR` and are reported to the counterparty. These variants cover
//! configuration and storage problems only.

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SessionManagerError {
    /// Configuration rejected on load or reload.
    #[error("Invalid session config: {reason}")]
    InvalidConfig { reason: String },

    /// Persisted state breaks a structural invariant.
    #[error("Corrupted state for session {session_id}: {reason}")]
    StateCorrupted { session_id: String, reason: String },
}

/// Result type for session manager operations.
pub type SessionResult<T> = Result<T, SessionManagerError>;
