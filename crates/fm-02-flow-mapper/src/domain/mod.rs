//! Domain layer for the flow mapper.

pub mod config;
pub mod state;
pub mod state_machine;

pub use config::{FlowMapperConfig, RetryPolicy};
pub use state::{FlowMapperState, FlowMapperStatus, MapperKeyState, StartContext};
pub use state_machine::{FlowMapperStateMachine, MapperDisposition, MapperOutcome};
