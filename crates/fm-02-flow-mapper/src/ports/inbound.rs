//! # Inbound Port - FlowMapperApi
//!
//! Driving port used by the worker runtime. One call per record, applied to
//! the state stored under the record's key.

use crate::domain::{FlowMapperStateMachine, MapperKeyState, MapperOutcome};
use crate::error::FlowMapperResult;
use fm_01_session_manager::SessionEventHandler;
use shared_types::{FlowMapperEvent, ScheduleRequest, Timestamp};

/// Primary API of the flow mapper.
///
/// # Example
///
/// ```rust,ignore
/// use fm_02_flow_mapper::ports::FlowMapperApi;
///
/// fn handle(mapper: &impl FlowMapperApi, state: &MapperKeyState, event: &FlowMapperEvent) {
///     let outcome = mapper.process(state, event)?;
///     // Commit outcome.state and outcome.records together, then
///     // hand outcome.schedule to the scheduler.
/// }
/// ```
pub trait FlowMapperApi: Send + Sync {
    /// Applies one input to a key's state.
    ///
    /// # Errors
    /// - `MissingFlowId`: a local flow opened a session anonymously
    /// - `StateCorrupted`: the stored state or the routing is inconsistent
    fn process(
        &self,
        current: &MapperKeyState,
        event: &FlowMapperEvent,
    ) -> FlowMapperResult<MapperOutcome>;

    /// Whether a sweep at `now` should remove the key.
    fn is_expired(&self, current: &MapperKeyState, now: Timestamp) -> bool;

    /// Timers to restore for a key loaded from storage.
    fn wakeups_for(&self, current: &MapperKeyState) -> Vec<ScheduleRequest>;
}

impl<S: SessionEventHandler> FlowMapperApi for FlowMapperStateMachine<S> {
    fn process(
        &self,
        current: &MapperKeyState,
        event: &FlowMapperEvent,
    ) -> FlowMapperResult<MapperOutcome> {
        FlowMapperStateMachine::process(self, current, event)
    }

    fn is_expired(&self, current: &MapperKeyState, now: Timestamp) -> bool {
        FlowMapperStateMachine::is_expired(self, current, now)
    }

    fn wakeups_for(&self, current: &MapperKeyState) -> Vec<ScheduleRequest> {
        FlowMapperStateMachine::wakeups_for(self, current)
    }
}
