//! # Session Scenarios
//!
//! The reference scenarios for a session, checked first against the bare
//! session processor and then through the flow mapper, where the same
//! behaviour has to show up as records on `p2p.out` and `flow.event`.
//!
//! | # | Input                                         | Expected                         |
//! |---|-----------------------------------------------|----------------------------------|
//! | 1 | `Init(1)`                                     | `CREATED`, one ack               |
//! | 2 | `Data(3)`, `Data(2)`                          | 3 buffered, then 2 and 3 in order|
//! | 3 | `Data(2)` again                               | dropped, nothing emitted         |
//! | 4 | `Close` while our seq 5 is unacked            | buffered until the ack           |
//! | 5 | expiry timer twice for a removed session      | second firing is a no-op         |
//! | 6 | `Close` resent after the session was removed  | acked, no session recreated      |

#[cfg(test)]
mod tests {
    use crate::fixtures::{ack, close, data, flow_status, init, wakeup};
    use fm_01_session_manager::{
        EventDisposition, SessionConfig, SessionEventProcessor, SessionOutcome, SessionState,
        SessionStatus,
    };
    use fm_02_flow_mapper::{
        FlowMapperConfig, FlowMapperStateMachine, FlowMapperStatus, MapperDisposition,
        MapperKeyState, MapperOutcome,
    };
    use shared_types::{
        topics, FlowEvent, FlowMapperEvent, FlowStatus, MessageDirection, RecordValue,
        SessionAck, SessionErrorType, SessionEvent, SessionPayload, WakeupKind,
    };

    const S: &str = "session-1";

    // =========================================================================
    // Fixtures
    // =========================================================================

    fn processor() -> SessionEventProcessor {
        SessionEventProcessor::new(SessionConfig::default())
    }

    fn machine() -> FlowMapperStateMachine {
        FlowMapperStateMachine::new(FlowMapperConfig::default(), processor())
    }

    fn apply(p: &SessionEventProcessor, state: Option<SessionState>, event: &SessionEvent) -> SessionOutcome {
        p.process(state.as_ref(), event)
    }

    fn step(m: &FlowMapperStateMachine, state: &MapperKeyState, event: FlowMapperEvent) -> MapperOutcome {
        m.process(state, &event).unwrap()
    }

    fn acks(events: &[SessionEvent]) -> Vec<SessionAck> {
        events
            .iter()
            .filter_map(|event| match &event.payload {
                SessionPayload::Ack(ack) => Some(ack.clone()),
                _ => None,
            })
            .collect()
    }

    fn forwarded(outcome: &SessionOutcome) -> Vec<u64> {
        outcome.to_flow.iter().filter_map(|e| e.sequence_num).collect()
    }

    fn sent(outcome: &MapperOutcome) -> Vec<SessionEvent> {
        outcome
            .records
            .iter()
            .filter(|r| r.topic == topics::P2P_OUT)
            .filter_map(|r| match &r.value {
                Some(RecordValue::Session(event)) => Some(event.clone()),
                _ => None,
            })
            .collect()
    }

    fn delivered(outcome: &MapperOutcome) -> Vec<u64> {
        outcome
            .records
            .iter()
            .filter_map(|r| match &r.value {
                Some(RecordValue::Flow(FlowEvent::DeliverSessionEvent { event, .. })) => {
                    event.sequence_num
                }
                _ => None,
            })
            .collect()
    }

    /// Bob's side: inbound init at 1000 and the flow running.
    fn bob_running(m: &FlowMapperStateMachine) -> MapperKeyState {
        let opened = step(
            m,
            &MapperKeyState::default(),
            FlowMapperEvent::Session(init(S, MessageDirection::Inbound, 1_000)),
        );
        step(m, &opened.state, flow_status(S, FlowStatus::Started, 1_050)).state
    }

    // =========================================================================
    // Scenario 1: init
    // =========================================================================

    #[test]
    fn test_init_creates_session_with_one_ack() {
        let outcome = apply(&processor(), None, &init(S, MessageDirection::Inbound, 1_000));

        assert_eq!(outcome.state.as_ref().unwrap().status, SessionStatus::Created);
        assert_eq!(outcome.disposition, EventDisposition::Applied);
        assert_eq!(outcome.to_counterparty.len(), 1);
        assert_eq!(acks(&outcome.to_counterparty)[0].received_sequence_num, 1);
    }

    #[test]
    fn test_init_through_mapper_starts_flow_and_sends_one_ack() {
        let m = machine();
        let outcome = step(
            &m,
            &MapperKeyState::default(),
            FlowMapperEvent::Session(init(S, MessageDirection::Inbound, 1_000)),
        );

        let p2p = sent(&outcome);
        assert_eq!(p2p.len(), 1);
        assert_eq!(acks(&p2p).len(), 1);
        assert!(outcome.records.iter().any(|r| matches!(
            r.value,
            Some(RecordValue::Flow(FlowEvent::StartFlow { attempt: 0, .. }))
        )));
        assert_eq!(
            outcome.state.session.as_ref().unwrap().status,
            SessionStatus::Created
        );
    }

    // =========================================================================
    // Scenario 2: reordering
    // =========================================================================

    #[test]
    fn test_reversed_data_is_forwarded_in_order() {
        let p = processor();
        let created = apply(&p, None, &init(S, MessageDirection::Inbound, 1_000)).state;

        let third = apply(&p, created, &data(S, MessageDirection::Inbound, 3, 1_100));
        assert_eq!(third.disposition, EventDisposition::Buffered);
        assert!(third.to_flow.is_empty());

        let second = apply(&p, third.state, &data(S, MessageDirection::Inbound, 2, 1_200));
        assert_eq!(forwarded(&second), vec![2, 3]);
        assert_eq!(
            acks(&second.to_counterparty),
            vec![SessionAck {
                received_sequence_num: 3,
                out_of_order_sequence_nums: vec![],
            }]
        );
    }

    #[test]
    fn test_reversed_data_reaches_flow_in_order() {
        let m = machine();
        let state = bob_running(&m);

        let third = step(&m, &state, FlowMapperEvent::Session(data(S, MessageDirection::Inbound, 3, 1_100)));
        assert!(delivered(&third).is_empty());

        let second = step(
            &m,
            &third.state,
            FlowMapperEvent::Session(data(S, MessageDirection::Inbound, 2, 1_200)),
        );
        assert_eq!(delivered(&second), vec![2, 3]);
    }

    #[test]
    fn test_out_of_order_end_state_matches_in_order() {
        let p = processor();
        let created = apply(&p, None, &init(S, MessageDirection::Inbound, 1_000)).state;

        let mut in_order = created.clone();
        for seq in 2..=5 {
            in_order = apply(&p, in_order, &data(S, MessageDirection::Inbound, seq, 1_100)).state;
        }
        let mut shuffled = created;
        for seq in [4, 2, 5, 3] {
            shuffled = apply(&p, shuffled, &data(S, MessageDirection::Inbound, seq, 1_100)).state;
        }

        let (a, b) = (in_order.unwrap(), shuffled.unwrap());
        assert_eq!(a.received_events_state, b.received_events_state);
        assert_eq!(a.status, b.status);
    }

    // =========================================================================
    // Scenario 3: duplicates
    // =========================================================================

    #[test]
    fn test_duplicate_data_is_dropped_silently() {
        let p = processor();
        let created = apply(&p, None, &init(S, MessageDirection::Inbound, 1_000)).state;
        let applied = apply(&p, created, &data(S, MessageDirection::Inbound, 2, 1_100));

        let duplicate = apply(&p, applied.state.clone(), &data(S, MessageDirection::Inbound, 2, 1_100));
        assert_eq!(duplicate.disposition, EventDisposition::Duplicate);
        assert_eq!(duplicate.state, applied.state);
        assert!(duplicate.to_counterparty.is_empty());
        assert!(duplicate.to_flow.is_empty());
    }

    #[test]
    fn test_replayed_mapper_input_changes_nothing() {
        let m = machine();
        let state = bob_running(&m);
        let event = FlowMapperEvent::Session(data(S, MessageDirection::Inbound, 2, 1_100));

        let first = step(&m, &state, event.clone());
        let replay = step(&m, &first.state, event);
        assert_eq!(replay.state, first.state);
        assert!(replay.records.is_empty());
        assert_eq!(
            replay.disposition,
            MapperDisposition::Session(EventDisposition::Duplicate)
        );
    }

    // =========================================================================
    // Scenario 4: close with data outstanding
    // =========================================================================

    #[test]
    fn test_close_waits_for_outstanding_ack() {
        let p = processor();
        let created = apply(&p, None, &init(S, MessageDirection::Outbound, 1_000)).state;
        let mut state = apply(&p, created, &ack(S, 1, vec![], 1_100)).state;
        for seq in 2..=5 {
            state = apply(&p, state, &data(S, MessageDirection::Outbound, seq, 1_200)).state;
        }
        state = apply(&p, state, &ack(S, 4, vec![], 1_300)).state;

        let remote_close = apply(&p, state, &close(S, MessageDirection::Inbound, 1, 1_400));
        assert_eq!(remote_close.disposition, EventDisposition::Buffered);
        assert!(remote_close.to_flow.is_empty());
        assert_eq!(remote_close.state.as_ref().unwrap().status, SessionStatus::Confirmed);

        let acked = apply(&p, remote_close.state, &ack(S, 5, vec![], 1_500));
        assert_eq!(acked.state.as_ref().unwrap().status, SessionStatus::Closing);
        assert_eq!(forwarded(&acked), vec![1]);

        let local_close = apply(&p, acked.state, &close(S, MessageDirection::Outbound, 6, 1_600));
        let closed = apply(&p, local_close.state, &ack(S, 6, vec![], 1_700));
        assert_eq!(closed.state.as_ref().unwrap().status, SessionStatus::Closed);

        // Nothing mutates a closed session.
        let late = apply(&p, closed.state.clone(), &data(S, MessageDirection::Inbound, 2, 1_800));
        assert_eq!(late.state, closed.state);
        assert!(late.to_counterparty.is_empty() && late.to_flow.is_empty());
    }

    // =========================================================================
    // Scenario 5: timers on removed sessions
    // =========================================================================

    #[test]
    fn test_expiry_timer_twice_on_removed_session() {
        let m = machine();
        let running = bob_running(&m);
        let remote_close = step(&m, &running, FlowMapperEvent::Session(close(S, MessageDirection::Inbound, 2, 2_000)));
        let local_close = step(
            &m,
            &remote_close.state,
            FlowMapperEvent::Session(close(S, MessageDirection::Outbound, 1, 2_100)),
        );
        let closed = step(&m, &local_close.state, FlowMapperEvent::Session(ack(S, 1, vec![], 2_200)));
        let mapper = closed.state.mapper.as_ref().unwrap();
        assert_eq!(mapper.status, FlowMapperStatus::Closing);

        let cleanup_at = mapper.expiry_time;
        let removed = step(&m, &closed.state, wakeup(S, WakeupKind::Cleanup, cleanup_at));
        assert_eq!(removed.disposition, MapperDisposition::Cleaned);
        assert!(removed.state.is_empty());

        for kind in [WakeupKind::Cleanup, WakeupKind::SessionTimer] {
            for _ in 0..2 {
                let again = step(&m, &removed.state, wakeup(S, kind, cleanup_at + 600_000));
                assert!(matches!(again.disposition, MapperDisposition::Ignored(_)));
                assert!(again.state.is_empty());
                assert!(again.records.is_empty());
                assert!(again.schedule.is_empty());
            }
        }
    }

    #[test]
    fn test_expiry_on_closed_session_is_noop() {
        let p = processor();
        let created = apply(&p, None, &init(S, MessageDirection::Inbound, 1_000)).state;
        let closing = apply(&p, created, &close(S, MessageDirection::Inbound, 2, 1_100)).state;
        let waiting = apply(&p, closing, &close(S, MessageDirection::Outbound, 1, 1_200)).state;
        let closed = apply(&p, waiting, &ack(S, 1, vec![], 1_300)).state;
        assert_eq!(closed.as_ref().unwrap().status, SessionStatus::Closed);

        let timeout = SessionEvent::new(
            closed.as_ref().unwrap().session_id.clone(),
            MessageDirection::Outbound,
            u64::MAX,
            crate::fixtures::alice(),
            crate::fixtures::bob(),
            SessionPayload::error(SessionErrorType::SessionTimeout, "expired"),
        );
        for _ in 0..2 {
            let outcome = apply(&p, closed.clone(), &timeout);
            assert_eq!(outcome.state, closed);
            assert!(outcome.to_counterparty.is_empty());
            assert!(outcome.to_flow.is_empty());
        }
    }

    // =========================================================================
    // Scenario 6: close resent after cleanup
    // =========================================================================

    #[test]
    fn test_resent_close_after_cleanup_lets_counterparty_finish() {
        // Alice closed second and never saw Bob's final ack.
        let p = processor();
        let created = apply(&p, None, &init(S, MessageDirection::Outbound, 1_000)).state;
        let confirmed = apply(&p, created, &ack(S, 1, vec![], 1_100)).state;
        let closing = apply(&p, confirmed, &close(S, MessageDirection::Inbound, 1, 2_000)).state;
        let alice = apply(&p, closing, &close(S, MessageDirection::Outbound, 2, 2_100)).state;
        assert_eq!(alice.as_ref().unwrap().status, SessionStatus::WaitForFinalAck);

        // Bob closed, then cleaned the session up.
        let m = machine();
        let running = bob_running(&m);
        let state = step(&m, &running, FlowMapperEvent::Session(close(S, MessageDirection::Inbound, 2, 2_000))).state;
        let state = step(&m, &state, FlowMapperEvent::Session(close(S, MessageDirection::Outbound, 1, 2_100))).state;
        let state = step(&m, &state, FlowMapperEvent::Session(ack(S, 1, vec![], 2_200))).state;
        let cleanup_at = state.mapper.as_ref().unwrap().expiry_time;
        let removed = step(&m, &state, wakeup(S, WakeupKind::Cleanup, cleanup_at)).state;
        assert!(removed.is_empty());

        // Alice resends her close.
        let resent = step(&m, &removed, FlowMapperEvent::Session(close(S, MessageDirection::Inbound, 2, cleanup_at + 1_000)));
        assert!(resent.state.is_empty());
        assert!(resent.schedule.is_empty());
        assert!(delivered(&resent).is_empty());
        let replies = sent(&resent);
        assert_eq!(
            acks(&replies),
            vec![SessionAck {
                received_sequence_num: 0,
                out_of_order_sequence_nums: vec![2]
            }]
        );

        // No placeholder means no session timer to fire later.
        let timer = step(&m, &resent.state, wakeup(S, WakeupKind::SessionTimer, cleanup_at + 700_000));
        assert!(timer.records.is_empty());

        let mut reply = replies[0].clone();
        reply.direction = MessageDirection::Inbound;
        let finished = apply(&p, alice, &reply);
        assert_eq!(finished.state.unwrap().status, SessionStatus::Closed);
    }

    // =========================================================================
    // Error short-circuit
    // =========================================================================

    #[test]
    fn test_counterparty_error_discards_buffers() {
        let p = processor();
        let created = apply(&p, None, &init(S, MessageDirection::Inbound, 1_000)).state;
        let buffered = apply(&p, created, &data(S, MessageDirection::Inbound, 4, 1_100)).state;
        assert!(!buffered
            .as_ref()
            .unwrap()
            .received_events_state
            .buffered_sequence_nums()
            .is_empty());

        let error = crate::fixtures::session_event(
            S,
            MessageDirection::Inbound,
            None,
            1_200,
            SessionPayload::error(SessionErrorType::ProtocolViolation, "bad frame"),
        );
        let outcome = apply(&p, buffered, &error);
        let state = outcome.state.unwrap();
        assert_eq!(state.status, SessionStatus::Error);
        assert!(state.received_events_state.buffered_sequence_nums().is_empty());
        assert!(outcome.to_counterparty.is_empty());
    }
}
