//! Domain layer for the session manager.

pub mod config;
pub mod processor;
pub mod state;

pub use config::SessionConfig;
pub use processor::{EventDisposition, SessionEventProcessor, SessionOutcome};
pub use state::{ReceivedEventsState, SendEventsState, SessionRole, SessionState, SessionStatus};
