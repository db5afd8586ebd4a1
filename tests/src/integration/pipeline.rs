//! # Full Pipeline Tests
//!
//! Two nodes, each with its own log, partition worker and wake-up
//! scheduler. A relay plays the p2p link: whatever one node commits to
//! `p2p.out` is published, inbound, on the other node's input topic.
//!
//! ```text
//! Alice: flow.mapper.event → Worker → p2p.out ──relay──┐
//!                                                      ↓
//! Bob:   flow.mapper.event ←───────────────────────────┘
//!              ↑  └→ Worker → p2p.out ──relay──→ Alice
//!        Wakeup (real scheduler, paused tokio time)
//! ```
//!
//! Timers are real tokio tasks, so tests run with paused time and a fixed
//! `ManualTimeSource`; the delay of a timer is its deadline minus that
//! fixed "now".

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use crate::fixtures::{as_received, close, data, flow_status, init, input, wakeup};
    use fm_01_session_manager::SessionStatus;
    use fm_02_flow_mapper::{FlowMapperStatus, MapperKeyState};
    use fm_03_scheduler::{LogWakeupPublisher, SchedulerConfig, TaskScheduler, WakeupScheduler};
    use shared_bus::{EventLog, InMemoryEventLog};
    use shared_types::{
        topics, FlowEvent, FlowId, FlowMapperEvent, FlowStatus, ManualTimeSource, MessageDirection,
        Record, RecordValue, SessionId, Timestamp, WakeupKind,
    };
    use worker_runtime::adapters::decode_state;
    use worker_runtime::{CommitRetryConfig, ConfigWatcher, LogConfig, PartitionWorker, RuntimeSettings};

    const S: &str = "session-1";
    const NOW: Timestamp = 1_000;

    type Scheduler = WakeupScheduler<LogWakeupPublisher<InMemoryEventLog>>;

    // =========================================================================
    // Fixtures
    // =========================================================================

    /// One party: log, worker and scheduler over a single partition.
    struct Node {
        log: Arc<InMemoryEventLog>,
        scheduler: Arc<Scheduler>,
        worker: PartitionWorker<InMemoryEventLog>,
        _settings: ConfigWatcher,
        consumed: u64,
        relayed: u64,
    }

    impl Node {
        async fn new() -> Self {
            let log = Arc::new(InMemoryEventLog::with_partitions(1));
            let scheduler = Arc::new(
                WakeupScheduler::new(
                    SchedulerConfig::default(),
                    LogWakeupPublisher::new(Arc::clone(&log)),
                    Arc::new(ManualTimeSource::new(NOW)),
                )
                .unwrap(),
            );
            let settings = ConfigWatcher::new(RuntimeSettings::default());
            let timers: Arc<dyn TaskScheduler> = scheduler.clone();
            let mut worker = PartitionWorker::new(
                0,
                Arc::clone(&log),
                timers,
                settings.subscribe(),
                &LogConfig {
                    partitions: 1,
                    ..LogConfig::default()
                },
                CommitRetryConfig::default(),
            )
            .unwrap();
            worker.restore().await.unwrap();
            Self {
                log,
                scheduler,
                worker,
                _settings: settings,
                consumed: 0,
                relayed: 0,
            }
        }

        async fn send(&self, event: FlowMapperEvent) {
            self.log.publish(vec![input(event)]).await.unwrap();
        }

        /// Processes everything on the input topic. Returns whether anything
        /// was consumed.
        async fn drain(&mut self) -> bool {
            let mut progressed = false;
            while self.log.end_offset(topics::FLOW_MAPPER_EVENT, 0) > self.consumed {
                let consumed = tokio::time::timeout(Duration::from_secs(5), self.worker.run_once())
                    .await
                    .expect("records are waiting")
                    .unwrap();
                self.consumed += consumed as u64;
                progressed = true;
            }
            progressed
        }

        fn state(&self) -> Option<&MapperKeyState> {
            self.worker.state(S)
        }

        fn session_status(&self) -> Option<SessionStatus> {
            self.state()?.session.as_ref().map(|s| s.status)
        }

        fn stored(&self) -> Option<MapperKeyState> {
            self.log
                .compacted(topics::FLOW_MAPPER_STATE, 0)
                .into_iter()
                .find(|(key, _)| key == S)
                .and_then(|(_, value)| match value {
                    RecordValue::State(bytes) => decode_state(&bytes).ok(),
                    _ => None,
                })
        }

        /// Session events delivered to local flows, by payload kind.
        fn delivered_kinds(&self) -> Vec<&'static str> {
            self.log
                .read_all(topics::FLOW_EVENT)
                .into_iter()
                .filter_map(|record| match record.value {
                    Some(RecordValue::Flow(FlowEvent::DeliverSessionEvent { event, .. })) => {
                        Some(event.payload.kind())
                    }
                    _ => None,
                })
                .collect()
        }

        fn output_count(&self) -> usize {
            self.log.read_all(topics::P2P_OUT).len() + self.log.read_all(topics::FLOW_EVENT).len()
        }
    }

    /// Moves what `from` committed to `p2p.out` onto `to`'s input topic.
    async fn relay(from: &mut Node, to: &Node) -> bool {
        let sent = from.log.read(topics::P2P_OUT, 0, from.relayed, usize::MAX);
        from.relayed += sent.len() as u64;
        let records: Vec<Record> = sent
            .into_iter()
            .filter_map(|record| match record.value {
                Some(RecordValue::Session(event)) => Some(input(as_received(event))),
                _ => None,
            })
            .collect();
        if records.is_empty() {
            return false;
        }
        to.log.publish(records).await.unwrap();
        true
    }

    /// Runs both nodes and the link until nothing moves.
    async fn converse(alice: &mut Node, bob: &mut Node) {
        loop {
            let mut progressed = alice.drain().await;
            progressed |= relay(alice, bob).await;
            progressed |= bob.drain().await;
            progressed |= relay(bob, alice).await;
            if !progressed {
                break;
            }
        }
    }

    // =========================================================================
    // Tests
    // =========================================================================

    #[tokio::test(start_paused = true)]
    async fn test_two_nodes_talk_close_and_clean_up() {
        let mut alice = Node::new().await;
        let mut bob = Node::new().await;

        alice.send(FlowMapperEvent::Session(init(S, MessageDirection::Outbound, 1_000))).await;
        converse(&mut alice, &mut bob).await;
        assert_eq!(alice.session_status(), Some(SessionStatus::Confirmed));
        assert_eq!(bob.session_status(), Some(SessionStatus::Created));
        let started = bob.log.read_all(topics::FLOW_EVENT);
        assert!(matches!(
            started[0].value,
            Some(RecordValue::Flow(FlowEvent::StartFlow { attempt: 0, .. }))
        ));

        bob.send(flow_status(S, FlowStatus::Started, 1_100)).await;
        alice.send(FlowMapperEvent::Session(data(S, MessageDirection::Outbound, 2, 1_200))).await;
        converse(&mut alice, &mut bob).await;
        assert_eq!(bob.delivered_kinds(), vec!["data"]);

        alice.send(FlowMapperEvent::Session(close(S, MessageDirection::Outbound, 3, 1_300))).await;
        converse(&mut alice, &mut bob).await;
        bob.send(FlowMapperEvent::Session(close(S, MessageDirection::Outbound, 1, 1_400))).await;
        converse(&mut alice, &mut bob).await;

        for node in [&alice, &bob] {
            assert_eq!(node.session_status(), Some(SessionStatus::Closed));
            let mapper = node.state().and_then(|s| s.mapper.as_ref()).unwrap();
            assert_eq!(mapper.status, FlowMapperStatus::Closing);
            assert_eq!(node.stored().as_ref(), node.state());
            assert!(!node.scheduler.is_scheduled(&SessionId::from(S), WakeupKind::SessionTimer));
            assert_eq!(
                node.scheduler.deadline(&SessionId::from(S), WakeupKind::Cleanup),
                Some(mapper.expiry_time)
            );
        }
        assert_eq!(bob.delivered_kinds(), vec!["data", "close"]);
        assert_eq!(alice.delivered_kinds(), vec!["close"]);
        assert!(alice
            .log
            .read_all(topics::FLOW_EVENT)
            .iter()
            .all(|r| r.key == FlowId::from("alice-flow").to_string()));

        // Cleanup deadlines sit 30s after the last transition.
        tokio::time::sleep(Duration::from_millis(31_000)).await;
        converse(&mut alice, &mut bob).await;

        for node in [&alice, &bob] {
            assert!(node.state().is_none());
            assert!(node.stored().is_none());
            assert_eq!(node.scheduler.pending_count(), 0);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cleanup_timer_replay_is_noop() {
        let mut bob = Node::new().await;
        for event in [
            FlowMapperEvent::Session(init(S, MessageDirection::Inbound, 1_000)),
            flow_status(S, FlowStatus::Started, 1_050),
            FlowMapperEvent::Session(close(S, MessageDirection::Inbound, 2, 1_100)),
            FlowMapperEvent::Session(close(S, MessageDirection::Outbound, 1, 1_150)),
            FlowMapperEvent::Session(crate::fixtures::ack(S, 1, vec![], 1_200)),
        ] {
            bob.send(event).await;
        }
        bob.drain().await;
        assert_eq!(bob.session_status(), Some(SessionStatus::Closed));
        let cleanup_at = bob
            .scheduler
            .deadline(&SessionId::from(S), WakeupKind::Cleanup)
            .unwrap();
        assert_eq!(cleanup_at, 1_200 + 30_000);

        tokio::time::sleep(Duration::from_millis(cleanup_at - NOW + 1)).await;
        assert!(bob.drain().await, "the timer published its wake-up");
        assert!(bob.state().is_none());
        assert!(bob.stored().is_none());

        // The same wake-up again, as after a redelivery.
        let outputs = bob.output_count();
        bob.send(wakeup(S, WakeupKind::Cleanup, cleanup_at)).await;
        bob.send(wakeup(S, WakeupKind::SessionTimer, cleanup_at)).await;
        bob.drain().await;

        assert_eq!(bob.output_count(), outputs);
        assert!(bob.state().is_none());
        assert!(bob.stored().is_none());
        assert_eq!(
            bob.log
                .committed_offset("flow-mapper", topics::FLOW_MAPPER_EVENT, 0),
            bob.consumed
        );
        assert_eq!(bob.scheduler.pending_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_restarted_node_rearms_timers() {
        let mut bob = Node::new().await;
        bob.send(FlowMapperEvent::Session(init(S, MessageDirection::Inbound, 1_000))).await;
        bob.drain().await;
        let stored = bob.stored().unwrap();
        let deadline = bob
            .scheduler
            .deadline(&SessionId::from(S), WakeupKind::SessionTimer);
        assert!(deadline.is_some());

        // Same log, fresh worker and scheduler.
        bob.scheduler.shutdown();
        let scheduler = Arc::new(
            WakeupScheduler::new(
                SchedulerConfig::default(),
                LogWakeupPublisher::new(Arc::clone(&bob.log)),
                Arc::new(ManualTimeSource::new(NOW)),
            )
            .unwrap(),
        );
        let settings = ConfigWatcher::new(RuntimeSettings::default());
        let timers: Arc<dyn TaskScheduler> = scheduler.clone();
        let mut worker = PartitionWorker::new(
            0,
            Arc::clone(&bob.log),
            timers,
            settings.subscribe(),
            &LogConfig {
                partitions: 1,
                ..LogConfig::default()
            },
            CommitRetryConfig::default(),
        )
        .unwrap();

        assert_eq!(worker.restore().await.unwrap(), 1);
        assert_eq!(worker.state(S), Some(&stored));
        assert_eq!(
            scheduler.deadline(&SessionId::from(S), WakeupKind::SessionTimer),
            deadline
        );
        assert_eq!(scheduler.pending_count(), 1);
    }
}
