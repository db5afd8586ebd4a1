//! Error types for the flow mapper.
//!
//! Every variant is fatal for the record being processed: the runtime
//! dead-letters it and halts the key.

use fm_01_session_manager::SessionManagerError;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FlowMapperError {
    /// A local flow opened a session without saying who it is.
    #[error("Outbound init for session {session_id} carries no flow id")]
    MissingFlowId { session_id: String },

    /// Persisted state breaks a structural invariant.
    #[error("Corrupted mapper state for session {session_id}: {reason}")]
    StateCorrupted { session_id: String, reason: String },

    /// Session state failed its own checks.
    #[error(transparent)]
    Session(#[from] SessionManagerError),

    /// Configuration rejected on load or reload.
    #[error("Invalid flow mapper config: {reason}")]
    InvalidConfig { reason: String },
}

/// Result type for flow mapper operations.
pub type FlowMapperResult<T> = Result<T, FlowMapperError>;
