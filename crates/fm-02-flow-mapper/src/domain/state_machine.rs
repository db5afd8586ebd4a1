//! Flow mapper state machine.
//!
//! Routes one key's traffic between the session layer and the
//! flow-execution layer. Like the session processor it is pure: it reads
//! "now" from the event, returns the records to publish and the timers to
//! set, and leaves persistence and scheduling to the runtime.

use crate::domain::config::FlowMapperConfig;
use crate::domain::state::{FlowMapperState, FlowMapperStatus, MapperKeyState};
use crate::error::{FlowMapperError, FlowMapperResult};
use fm_01_session_manager::{EventDisposition, SessionEventHandler, SessionEventProcessor};
use shared_types::{
    topics, FlowEvent, FlowId, FlowMapperEvent, FlowStatus, MessageDirection, Record,
    RecordValue, ScheduleRequest, SessionErrorType, SessionEvent, SessionId, SessionPayload,
    Timestamp, WakeupKind,
};
use tracing::{debug, info, warn};

/// What the state machine did with an input.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MapperDisposition {
    /// A session event went through the session processor.
    Session(EventDisposition),
    /// The flow confirmed it is running; queued events were released.
    FlowStarted,
    /// A flow start was (re)scheduled or re-sent.
    FlowRetry,
    /// Unacknowledged events were resent.
    Heartbeat,
    /// The key was removed.
    Cleaned,
    Ignored(&'static str),
}

impl MapperDisposition {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Session(disposition) => disposition.label(),
            Self::FlowStarted => "flow_started",
            Self::FlowRetry => "flow_retry",
            Self::Heartbeat => "heartbeat",
            Self::Cleaned => "cleaned",
            Self::Ignored(_) => "ignored",
        }
    }
}

/// Result of one transition.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MapperOutcome {
    /// State to persist; empty means the key is removed.
    pub state: MapperKeyState,
    pub records: Vec<Record>,
    /// Applied to the scheduler after the transition is committed.
    pub schedule: Vec<ScheduleRequest>,
    pub disposition: MapperDisposition,
}

impl MapperOutcome {
    fn ignored(current: &MapperKeyState, reason: &'static str) -> Self {
        Self {
            state: current.clone(),
            records: Vec::new(),
            schedule: Vec::new(),
            disposition: MapperDisposition::Ignored(reason),
        }
    }
}

struct Transition {
    state: MapperKeyState,
    records: Vec<Record>,
    schedule: Vec<ScheduleRequest>,
}

impl Transition {
    fn new(state: MapperKeyState) -> Self {
        Self {
            state,
            records: Vec::new(),
            schedule: Vec::new(),
        }
    }

    fn send_to_counterparty(&mut self, events: Vec<SessionEvent>) {
        for event in events {
            let key = event.session_id.to_string();
            self.records
                .push(Record::new(topics::P2P_OUT, key, RecordValue::Session(event)));
        }
    }

    fn deliver(&mut self, event: SessionEvent) {
        match self.state.mapper.as_mut() {
            Some(mapper) if mapper.flow_ready => {
                self.records.push(deliver_record(&mapper.flow_id, event));
            }
            Some(mapper) => {
                debug!(session_id = %mapper.session_id, "Flow not ready, event queued");
                mapper.undelivered.push(event);
            }
            None => {
                debug!(session_id = %event.session_id, kind = event.payload.kind(), "No flow mapped, event not delivered");
            }
        }
    }

    fn finish(self, disposition: MapperDisposition) -> MapperOutcome {
        MapperOutcome {
            state: self.state,
            records: self.records,
            schedule: self.schedule,
            disposition,
        }
    }
}

/// Maps sessions to flows and drives the session processor.
#[derive(Clone, Debug, Default)]
pub struct FlowMapperStateMachine<S = SessionEventProcessor> {
    config: FlowMapperConfig,
    sessions: S,
}

impl<S: SessionEventHandler> FlowMapperStateMachine<S> {
    pub fn new(config: FlowMapperConfig, sessions: S) -> Self {
        Self { config, sessions }
    }

    pub fn config(&self) -> &FlowMapperConfig {
        &self.config
    }

    /// Applies one input to the state stored under its key.
    pub fn process(
        &self,
        current: &MapperKeyState,
        event: &FlowMapperEvent,
    ) -> FlowMapperResult<MapperOutcome> {
        current.check_invariants()?;
        if let (Some(event_session), Some(session)) = (event.session_id(), &current.session) {
            if *event_session != session.session_id {
                return Err(FlowMapperError::StateCorrupted {
                    session_id: session.session_id.to_string(),
                    reason: format!("received event for session {event_session}"),
                });
            }
        }

        match event {
            FlowMapperEvent::Session(session_event) => {
                self.on_session_event(current, session_event)
            }
            FlowMapperEvent::FlowStatusChanged {
                flow_id,
                status,
                timestamp,
                ..
            } => self.on_flow_status(current, flow_id, status, *timestamp),
            FlowMapperEvent::Wakeup { kind, fired_at, .. } => match kind {
                WakeupKind::SessionTimer => self.on_session_timer(current, *fired_at),
                WakeupKind::Cleanup => Ok(self.on_cleanup(current, *fired_at)),
                WakeupKind::RetryStart => Ok(self.on_retry_start(current, *fired_at)),
            },
            FlowMapperEvent::Sweep { .. } => {
                Ok(MapperOutcome::ignored(current, "sweeps are expanded per key"))
            }
        }
    }

    /// Whether a sweep at `now` should clean this key up.
    pub fn is_expired(&self, current: &MapperKeyState, now: Timestamp) -> bool {
        current.mapper.as_ref().is_some_and(|mapper| {
            mapper.status == FlowMapperStatus::Closing && now >= mapper.expiry_time
        })
    }

    /// Timers a freshly loaded key needs, e.g. after a partition is assigned.
    pub fn wakeups_for(&self, current: &MapperKeyState) -> Vec<ScheduleRequest> {
        let mut requests = Vec::new();
        if let Some(mapper) = &current.mapper {
            if mapper.status == FlowMapperStatus::Closing {
                requests.push(ScheduleRequest::Schedule {
                    session_id: mapper.session_id.clone(),
                    kind: WakeupKind::Cleanup,
                    fire_at: mapper.expiry_time,
                });
                return requests;
            }
            if let Some(fire_at) = mapper.retry_at {
                requests.push(ScheduleRequest::Schedule {
                    session_id: mapper.session_id.clone(),
                    kind: WakeupKind::RetryStart,
                    fire_at,
                });
            }
        }
        if let Some(session) = &current.session {
            if let Some(fire_at) = self.sessions.next_wakeup(session) {
                requests.push(ScheduleRequest::Schedule {
                    session_id: session.session_id.clone(),
                    kind: WakeupKind::SessionTimer,
                    fire_at,
                });
            }
        }
        requests
    }

    fn on_session_event(
        &self,
        current: &MapperKeyState,
        event: &SessionEvent,
    ) -> FlowMapperResult<MapperOutcome> {
        let outcome = self.sessions.process(current.session.as_ref(), event);
        if matches!(
            outcome.disposition,
            EventDisposition::Duplicate | EventDisposition::Ignored(_)
        ) {
            // State and timers stay as they are; a repeated ack may still go out.
            let mut t = Transition::new(current.clone());
            t.send_to_counterparty(outcome.to_counterparty);
            return Ok(t.finish(MapperDisposition::Session(outcome.disposition)));
        }

        let mut t = Transition::new(MapperKeyState {
            session: outcome.state,
            mapper: current.mapper.clone(),
        });
        let session_expiry = t
            .state
            .session
            .as_ref()
            .map_or(event.timestamp, |session| session.expiry_time);

        if t.state.mapper.is_none() && outcome.disposition == EventDisposition::Applied {
            if let (MessageDirection::Outbound, SessionPayload::Init(init)) =
                (event.direction, &event.payload)
            {
                let flow_id = init
                    .flow_id
                    .clone()
                    .ok_or_else(|| FlowMapperError::MissingFlowId {
                        session_id: event.session_id.to_string(),
                    })?;
                info!(session_id = %event.session_id, %flow_id, "Session opened by local flow");
                t.state.mapper = Some(FlowMapperState::initiating(
                    event.session_id.clone(),
                    flow_id,
                    session_expiry,
                ));
            }
        }

        for forwarded in outcome.to_flow {
            if t.state.mapper.is_none() {
                if let SessionPayload::Init(init) = &forwarded.payload {
                    let mapper = FlowMapperState::initiated(&forwarded, init, session_expiry);
                    info!(
                        session_id = %mapper.session_id,
                        flow_id = %mapper.flow_id,
                        protocol = %init.protocol,
                        "Starting flow for inbound session"
                    );
                    t.records.extend(start_flow_record(&mapper, 0));
                    t.state.mapper = Some(mapper);
                    continue;
                }
            }
            t.deliver(forwarded);
        }

        t.send_to_counterparty(outcome.to_counterparty);
        self.settle(&mut t, event.timestamp);
        Ok(t.finish(MapperDisposition::Session(outcome.disposition)))
    }

    fn on_flow_status(
        &self,
        current: &MapperKeyState,
        flow_id: &FlowId,
        status: &FlowStatus,
        now: Timestamp,
    ) -> FlowMapperResult<MapperOutcome> {
        let Some(mapper) = current.mapper.as_ref() else {
            return Ok(MapperOutcome::ignored(current, "no mapping"));
        };
        if mapper.flow_id != *flow_id {
            warn!(session_id = %mapper.session_id, expected = %mapper.flow_id, reported = %flow_id, "Flow report for another flow ignored");
            return Ok(MapperOutcome::ignored(current, "report for another flow"));
        }

        match status {
            FlowStatus::Started => {
                let mut t = Transition::new(current.clone());
                if let Some(mapper) = t.state.mapper.as_mut() {
                    mapper.flow_ready = true;
                    mapper.retry_at = None;
                    let queued = std::mem::take(&mut mapper.undelivered);
                    debug!(session_id = %mapper.session_id, released = queued.len(), "Flow started");
                    for event in queued {
                        t.records.push(deliver_record(&mapper.flow_id, event));
                    }
                    t.schedule.push(ScheduleRequest::Cancel {
                        session_id: mapper.session_id.clone(),
                        kind: WakeupKind::RetryStart,
                    });
                }
                Ok(t.finish(MapperDisposition::FlowStarted))
            }
            FlowStatus::Completed => self.fail_session(
                current,
                SessionErrorType::FlowFailed,
                "flow completed with the session still open",
                now,
            ),
            FlowStatus::Failed { reason } => {
                self.fail_session(current, SessionErrorType::FlowFailed, reason, now)
            }
            FlowStatus::NotFound => {
                let policy = &self.config.flow_start_retry;
                let retryable = mapper.status == FlowMapperStatus::Open
                    && !mapper.flow_ready
                    && mapper.start_context.is_some()
                    && mapper.start_attempts < policy.max_attempts;
                if !retryable {
                    return self.fail_session(
                        current,
                        SessionErrorType::FlowNotFound,
                        "destination flow not found",
                        now,
                    );
                }

                let mut t = Transition::new(current.clone());
                if let Some(mapper) = t.state.mapper.as_mut() {
                    mapper.start_attempts += 1;
                    let fire_at = now.saturating_add(policy.backoff(mapper.start_attempts));
                    mapper.retry_at = Some(fire_at);
                    warn!(
                        session_id = %mapper.session_id,
                        attempt = mapper.start_attempts,
                        fire_at,
                        "Flow not found, start retry scheduled"
                    );
                    t.schedule.push(ScheduleRequest::Schedule {
                        session_id: mapper.session_id.clone(),
                        kind: WakeupKind::RetryStart,
                        fire_at,
                    });
                }
                Ok(t.finish(MapperDisposition::FlowRetry))
            }
        }
    }

    fn on_session_timer(
        &self,
        current: &MapperKeyState,
        fired_at: Timestamp,
    ) -> FlowMapperResult<MapperOutcome> {
        let Some(session) = current.session.as_ref() else {
            return Ok(MapperOutcome::ignored(current, "no session"));
        };
        if session.status.is_terminal() {
            return Ok(MapperOutcome::ignored(current, "session already ended"));
        }
        if fired_at >= session.expiry_time {
            return self.fail_session(
                current,
                SessionErrorType::SessionTimeout,
                "no activity from counterparty before expiry",
                fired_at,
            );
        }

        let mut t = Transition::new(current.clone());
        let disposition = match self.sessions.heartbeat_due(session, fired_at) {
            Some((next, messages)) => {
                t.state.session = Some(next);
                t.send_to_counterparty(messages);
                MapperDisposition::Heartbeat
            }
            None => MapperDisposition::Ignored("timer not yet due"),
        };
        self.settle(&mut t, fired_at);
        Ok(t.finish(disposition))
    }

    fn on_cleanup(&self, current: &MapperKeyState, fired_at: Timestamp) -> MapperOutcome {
        match current.mapper.as_ref() {
            Some(mapper)
                if mapper.status == FlowMapperStatus::Closing && fired_at >= mapper.expiry_time =>
            {
                info!(session_id = %mapper.session_id, flow_id = %mapper.flow_id, "Mapping cleaned up");
                MapperOutcome {
                    state: MapperKeyState::default(),
                    records: Vec::new(),
                    schedule: vec![ScheduleRequest::CancelAll {
                        session_id: mapper.session_id.clone(),
                    }],
                    disposition: MapperDisposition::Cleaned,
                }
            }
            Some(_) => MapperOutcome::ignored(current, "mapping not expired"),
            None => MapperOutcome::ignored(current, "no mapping"),
        }
    }

    fn on_retry_start(&self, current: &MapperKeyState, fired_at: Timestamp) -> MapperOutcome {
        let Some(mapper) = current.mapper.as_ref() else {
            return MapperOutcome::ignored(current, "no mapping");
        };
        if mapper.status != FlowMapperStatus::Open || mapper.flow_ready {
            return MapperOutcome::ignored(current, "flow already started");
        }
        match mapper.retry_at {
            None => return MapperOutcome::ignored(current, "no retry pending"),
            Some(at) if fired_at < at => return MapperOutcome::ignored(current, "retry not yet due"),
            Some(_) => {}
        }
        let Some(record) = start_flow_record(mapper, mapper.start_attempts) else {
            return MapperOutcome::ignored(current, "nothing to restart");
        };

        let mut t = Transition::new(current.clone());
        if let Some(mapper) = t.state.mapper.as_mut() {
            mapper.retry_at = None;
            info!(session_id = %mapper.session_id, attempt = mapper.start_attempts, "Retrying flow start");
        }
        t.records.push(record);
        t.finish(MapperDisposition::FlowRetry)
    }

    /// Feeds a locally raised error through the session processor.
    fn fail_session(
        &self,
        current: &MapperKeyState,
        error_type: SessionErrorType,
        message: &str,
        now: Timestamp,
    ) -> FlowMapperResult<MapperOutcome> {
        let Some(session) = current.session.as_ref() else {
            return Ok(MapperOutcome::ignored(current, "no session"));
        };
        if session.status.is_terminal() {
            return Ok(MapperOutcome::ignored(current, "session already ended"));
        }
        let event = SessionEvent::new(
            session.session_id.clone(),
            MessageDirection::Outbound,
            now,
            session.initiating_identity.clone(),
            session.initiated_identity.clone(),
            SessionPayload::error(error_type, message),
        );
        self.on_session_event(current, &event)
    }

    /// Reconciles mapping and timers with the session after a transition.
    fn settle(&self, t: &mut Transition, now: Timestamp) {
        let Some(session) = t.state.session.as_ref() else {
            return;
        };
        let session_id = session.session_id.clone();

        if session.status.is_terminal() {
            match t.state.mapper.as_mut() {
                Some(mapper) if mapper.status == FlowMapperStatus::Open => {
                    mapper.status = FlowMapperStatus::Closing;
                    mapper.expiry_time = now.saturating_add(self.config.cleanup_delay_ms);
                    mapper.retry_at = None;
                    info!(session_id = %session_id, cleanup_at = mapper.expiry_time, "Session ended, mapping closing");
                    let fire_at = mapper.expiry_time;
                    t.schedule.extend(closing_requests(&session_id, fire_at));
                }
                Some(_) => {}
                None => {
                    debug!(session_id = %session_id, "Session ended before a flow was mapped, state dropped");
                    t.state.session = None;
                    t.schedule.push(ScheduleRequest::CancelAll { session_id });
                }
            }
            return;
        }

        let expiry = session.expiry_time;
        if let Some(fire_at) = self.sessions.next_wakeup(session) {
            t.schedule.push(ScheduleRequest::Schedule {
                session_id,
                kind: WakeupKind::SessionTimer,
                fire_at,
            });
        }
        if let Some(mapper) = t.state.mapper.as_mut() {
            mapper.expiry_time = expiry;
        }
    }
}

fn closing_requests(session_id: &SessionId, cleanup_at: Timestamp) -> [ScheduleRequest; 3] {
    [
        ScheduleRequest::Cancel {
            session_id: session_id.clone(),
            kind: WakeupKind::SessionTimer,
        },
        ScheduleRequest::Cancel {
            session_id: session_id.clone(),
            kind: WakeupKind::RetryStart,
        },
        ScheduleRequest::Schedule {
            session_id: session_id.clone(),
            kind: WakeupKind::Cleanup,
            fire_at: cleanup_at,
        },
    ]
}

fn deliver_record(flow_id: &FlowId, event: SessionEvent) -> Record {
    Record::new(
        topics::FLOW_EVENT,
        flow_id.to_string(),
        RecordValue::Flow(FlowEvent::DeliverSessionEvent {
            flow_id: flow_id.clone(),
            event,
        }),
    )
}

fn start_flow_record(mapper: &FlowMapperState, attempt: u32) -> Option<Record> {
    let context = mapper.start_context.as_ref()?;
    Some(Record::new(
        topics::FLOW_EVENT,
        mapper.flow_id.to_string(),
        RecordValue::Flow(FlowEvent::StartFlow {
            flow_id: mapper.flow_id.clone(),
            session_id: mapper.session_id.clone(),
            initiator: context.initiator.clone(),
            protocol: context.protocol.clone(),
            context: context.context.clone(),
            payload: context.payload.clone(),
            attempt,
        }),
    ))
}
