//! # Flow Mapper Benchmarks
//!
//! | Group               | What is measured                                   |
//! |---------------------|----------------------------------------------------|
//! | `session-processor` | in-order and reversed data through one session     |
//! | `flow-mapper`       | full mapper transitions, including record building |
//! | `state-store`       | bincode encoding of a key's state                  |
//! | `partition-worker`  | one committed batch against the in-memory log      |

use std::sync::Arc;
use std::time::Duration;

use criterion::{black_box, criterion_group, criterion_main, BatchSize, BenchmarkId, Criterion, Throughput};
use fm_01_session_manager::{SessionConfig, SessionEventProcessor, SessionState};
use fm_02_flow_mapper::{FlowMapperConfig, FlowMapperStateMachine, MapperKeyState};
use fm_03_scheduler::{LogWakeupPublisher, SchedulerConfig, TaskScheduler, WakeupScheduler};
use fm_tests::fixtures::{data, flow_status, init, input};
use shared_bus::{EventLog, InMemoryEventLog};
use shared_types::{FlowMapperEvent, FlowStatus, ManualTimeSource, MessageDirection};
use worker_runtime::adapters::encode_state;
use worker_runtime::{CommitRetryConfig, ConfigWatcher, LogConfig, PartitionWorker, RuntimeSettings};

const S: &str = "bench-session";

fn opened_session(p: &SessionEventProcessor) -> Option<SessionState> {
    p.process(None, &init(S, MessageDirection::Inbound, 1_000)).state
}

fn running_key(m: &FlowMapperStateMachine) -> MapperKeyState {
    let opened = m
        .process(
            &MapperKeyState::default(),
            &FlowMapperEvent::Session(init(S, MessageDirection::Inbound, 1_000)),
        )
        .map(|outcome| outcome.state)
        .unwrap_or_default();
    m.process(&opened, &flow_status(S, FlowStatus::Started, 1_050))
        .map(|outcome| outcome.state)
        .unwrap_or_default()
}

// ============================================================================
// Session processor
// ============================================================================

fn bench_session_processor(c: &mut Criterion) {
    let mut group = c.benchmark_group("session-processor");
    let p = SessionEventProcessor::new(SessionConfig::default());

    for count in [16u64, 32, 64] {
        let in_order: Vec<_> = (2..count + 2)
            .map(|seq| data(S, MessageDirection::Inbound, seq, 1_100))
            .collect();
        let reversed: Vec<_> = in_order.iter().rev().cloned().collect();

        group.throughput(Throughput::Elements(count));
        group.bench_with_input(BenchmarkId::new("in_order", count), &in_order, |b, events| {
            b.iter(|| {
                let mut state = opened_session(&p);
                for event in events {
                    state = p.process(state.as_ref(), event).state;
                }
                black_box(state)
            })
        });
        group.bench_with_input(BenchmarkId::new("reversed", count), &reversed, |b, events| {
            b.iter(|| {
                let mut state = opened_session(&p);
                for event in events {
                    state = p.process(state.as_ref(), event).state;
                }
                black_box(state)
            })
        });
    }

    let duplicate = data(S, MessageDirection::Inbound, 2, 1_100);
    let state = p.process(opened_session(&p).as_ref(), &duplicate).state;
    group.bench_function("duplicate_drop", |b| {
        b.iter(|| black_box(p.process(state.as_ref(), &duplicate)))
    });

    group.finish();
}

// ============================================================================
// Flow mapper
// ============================================================================

fn bench_flow_mapper(c: &mut Criterion) {
    let mut group = c.benchmark_group("flow-mapper");
    let m = FlowMapperStateMachine::new(FlowMapperConfig::default(), SessionEventProcessor::default());

    group.bench_function("open_session", |b| {
        let event = FlowMapperEvent::Session(init(S, MessageDirection::Inbound, 1_000));
        b.iter(|| black_box(m.process(&MapperKeyState::default(), &event)))
    });

    let running = running_key(&m);
    let events: Vec<_> = (2..102)
        .map(|seq| FlowMapperEvent::Session(data(S, MessageDirection::Inbound, seq, 1_100)))
        .collect();
    group.throughput(Throughput::Elements(events.len() as u64));
    group.bench_function("deliver_100", |b| {
        b.iter(|| {
            let mut state = running.clone();
            for event in &events {
                if let Ok(outcome) = m.process(&state, event) {
                    state = outcome.state;
                }
            }
            black_box(state)
        })
    });

    group.finish();
}

// ============================================================================
// State store
// ============================================================================

fn bench_state_encoding(c: &mut Criterion) {
    let mut group = c.benchmark_group("state-store");
    let m = FlowMapperStateMachine::new(FlowMapperConfig::default(), SessionEventProcessor::default());

    // A state with a full out-of-order buffer is the worst case to encode.
    let mut buffered = running_key(&m);
    for seq in (3..66).rev() {
        let event = FlowMapperEvent::Session(data(S, MessageDirection::Inbound, seq, 1_100));
        if let Ok(outcome) = m.process(&buffered, &event) {
            buffered = outcome.state;
        }
    }

    group.bench_function("encode_running", |b| {
        let state = running_key(&m);
        b.iter(|| black_box(encode_state(S, &state)))
    });
    group.bench_function("encode_buffered", |b| {
        b.iter(|| black_box(encode_state(S, &buffered)))
    });

    group.finish();
}

// ============================================================================
// Partition worker
// ============================================================================

fn bench_partition_worker(c: &mut Criterion) {
    let mut group = c.benchmark_group("partition-worker");
    group.measurement_time(Duration::from_secs(10));
    let runtime = tokio::runtime::Runtime::new().expect("tokio runtime");

    for sessions in [10usize, 50] {
        group.throughput(Throughput::Elements(sessions as u64));
        group.bench_with_input(BenchmarkId::new("open_sessions", sessions), &sessions, |b, &sessions| {
            b.iter_batched(
                || {
                    let log = Arc::new(InMemoryEventLog::with_partitions(1));
                    let scheduler: Arc<dyn TaskScheduler> = {
                        let _guard = runtime.enter();
                        Arc::new(
                            WakeupScheduler::new(
                                SchedulerConfig::default(),
                                LogWakeupPublisher::new(Arc::clone(&log)),
                                Arc::new(ManualTimeSource::new(0)),
                            )
                            .expect("scheduler inside runtime"),
                        )
                    };
                    let settings = ConfigWatcher::new(RuntimeSettings::default());
                    let config = LogConfig {
                        partitions: 1,
                        poll_batch: sessions,
                        ..LogConfig::default()
                    };
                    let worker = PartitionWorker::new(
                        0,
                        Arc::clone(&log),
                        scheduler,
                        settings.subscribe(),
                        &config,
                        CommitRetryConfig::default(),
                    )
                    .expect("worker joins its partition");
                    let records: Vec<_> = (0..sessions)
                        .map(|i| {
                            let session = format!("session-{i}");
                            input(FlowMapperEvent::Session(init(
                                &session,
                                MessageDirection::Inbound,
                                1_000,
                            )))
                        })
                        .collect();
                    runtime
                        .block_on(log.publish(records))
                        .expect("in-memory publish");
                    (worker, settings)
                },
                |(mut worker, _settings)| {
                    runtime.block_on(async { black_box(worker.run_once().await.ok()) })
                },
                BatchSize::SmallInput,
            )
        });
    }

    group.finish();
}

criterion_group!(
    benches,
    bench_session_processor,
    bench_flow_mapper,
    bench_state_encoding,
    bench_partition_worker
);

criterion_main!(benches);
