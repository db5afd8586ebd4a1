//! # Partition Worker
//!
//! Owns one partition of `flow.mapper.event` and the state of every key on
//! it. Records are processed strictly in log order, a batch at a time:
//!
//! 1. Poll up to `poll_batch` records.
//! 2. Run each through the flow mapper against the in-memory state.
//! 3. Commit output records, dead letters, state upserts/tombstones and the
//!    consumer offset in one transaction.
//! 4. Only then apply the batch's timer requests and update memory.
//!
//! A batch that fails to commit is retried from a freshly loaded snapshot.
//! Replaying it is safe because every transition is idempotent in the
//! persisted watermark.

use crate::adapters::{load_snapshot, state_record};
use crate::container::{CommitRetryConfig, LogConfig, RuntimeSettings, WorkerContainer};
use crate::error::{WorkerError, WorkerResult};
use crate::wiring::dead_letter::{corrupted_state_letter, dead_letter, load_halted, DeadLetterReason};
use flow_telemetry::{
    BatchTimer, COMMIT_RETRIES, DEAD_LETTERS, EVENTS_PROCESSED,
    MAPPER_CLEANUPS, SCHEDULED_TASKS, SESSIONS_ERRORED,
};
use fm_01_session_manager::{SessionEventProcessor, SessionStatus};
use fm_02_flow_mapper::{FlowMapperApi, FlowMapperStateMachine, MapperDisposition, MapperKeyState};
use fm_03_scheduler::TaskScheduler;
use shared_bus::{ConsumerRecord, EventLog, LogError, LogTransaction, OffsetCommit, PartitionConsumer};
use shared_types::{topics, FlowMapperEvent, Record, RecordValue, ScheduleRequest, SessionId, WakeupKind};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Everything a batch changes, computed before anything is written.
#[derive(Debug, Default)]
struct BatchPlan {
    records: Vec<Record>,
    /// Final state of every key the batch touched.
    dirty: BTreeMap<String, MapperKeyState>,
    newly_halted: BTreeSet<String>,
    schedule: Vec<ScheduleRequest>,
    processed: Vec<(&'static str, &'static str)>,
    dead_letters: Vec<&'static str>,
    sessions_errored: u64,
    cleanups: u64,
}

pub struct PartitionWorker<L: EventLog> {
    partition: u32,
    log: Arc<L>,
    consumer: L::Consumer,
    scheduler: Arc<dyn TaskScheduler>,
    settings: watch::Receiver<RuntimeSettings>,
    group: String,
    poll_batch: usize,
    commit_retry: CommitRetryConfig,
    states: HashMap<String, MapperKeyState>,
    halted: HashSet<String>,
}

impl<L: EventLog> PartitionWorker<L> {
    /// Joins the consumer group for `partition`. State is empty until
    /// [`restore`](Self::restore) runs.
    pub fn new(
        partition: u32,
        log: Arc<L>,
        scheduler: Arc<dyn TaskScheduler>,
        settings: watch::Receiver<RuntimeSettings>,
        log_config: &LogConfig,
        commit_retry: CommitRetryConfig,
    ) -> WorkerResult<Self> {
        let consumer = log.subscribe(topics::FLOW_MAPPER_EVENT, &log_config.consumer_group, partition)?;
        Ok(Self {
            partition,
            log,
            consumer,
            scheduler,
            settings,
            group: log_config.consumer_group.clone(),
            poll_batch: log_config.poll_batch,
            commit_retry,
            states: HashMap::new(),
            halted: HashSet::new(),
        })
    }

    pub fn from_container(container: &WorkerContainer<L>, partition: u32) -> WorkerResult<Self> {
        let scheduler: Arc<dyn TaskScheduler> = container.scheduler.clone();
        Self::new(
            partition,
            Arc::clone(&container.log),
            scheduler,
            container.settings.subscribe(),
            &container.config.log,
            container.config.commit_retry.clone(),
        )
    }

    pub fn partition(&self) -> u32 {
        self.partition
    }

    pub fn state(&self, key: &str) -> Option<&MapperKeyState> {
        self.states.get(key)
    }

    pub fn key_count(&self) -> usize {
        self.states.len()
    }

    pub fn is_halted(&self, key: &str) -> bool {
        self.halted.contains(key)
    }

    /// Loads the partition's state and halted keys from the log and re-arms
    /// the timers the stored state needs. Unreadable stored state is
    /// dead-lettered once and its key halted. Returns the number of live keys.
    pub async fn restore(&mut self) -> WorkerResult<usize> {
        self.reload().await?;
        let machine = self.machine(&self.settings.borrow().clone());
        for state in self.states.values() {
            if let Err(err) = self.scheduler.apply(&machine.wakeups_for(state)) {
                warn!(partition = self.partition, error = %err, "Failed to re-arm timers");
                return Err(err.into());
            }
        }
        SCHEDULED_TASKS.set(self.scheduler.pending_count() as i64);
        info!(
            partition = self.partition,
            keys = self.states.len(),
            halted = self.halted.len(),
            "Partition restored"
        );
        Ok(self.states.len())
    }

    async fn reload(&mut self) -> WorkerResult<()> {
        let snapshot = load_snapshot(&*self.log, self.partition);
        self.halted = load_halted(&*self.log, self.partition);

        // Keys already on the DLQ were reported by an earlier restore.
        let letters: Vec<Record> = snapshot
            .corrupted
            .iter()
            .filter(|(key, _)| !self.halted.contains(key))
            .map(|(key, reason)| {
                corrupted_state_letter(
                    self.partition,
                    key,
                    &DeadLetterReason::CorruptedState(reason.clone()),
                )
            })
            .collect();
        if !letters.is_empty() {
            let count = letters.len() as u64;
            self.log.publish(letters).await?;
            DEAD_LETTERS.with_label_values(&["corrupted_state"]).inc_by(count);
        }

        self.halted
            .extend(snapshot.corrupted.into_iter().map(|(key, _)| key));
        self.states = snapshot.states;
        Ok(())
    }

    fn machine(&self, settings: &RuntimeSettings) -> FlowMapperStateMachine {
        FlowMapperStateMachine::new(
            settings.mapper.clone(),
            SessionEventProcessor::new(settings.session.clone()),
        )
    }

    /// Restores, then processes batches until `shutdown` flips to `true`
    /// or the log closes.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WorkerResult<()> {
        self.restore().await?;
        loop {
            if *shutdown.borrow() {
                break;
            }
            let polled = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                polled = self.consumer.poll(self.poll_batch) => polled,
            };
            let result = match polled {
                Ok(records) => self.process_batch(records).await,
                Err(err) => Err(err.into()),
            };
            match result {
                Ok(_) => {}
                Err(WorkerError::Log(LogError::Closed)) => {
                    info!(partition = self.partition, "Log closed, worker stopping");
                    break;
                }
                Err(WorkerError::Log(err)) => {
                    warn!(partition = self.partition, error = %err, "Poll failed, retrying");
                    tokio::time::sleep(self.commit_retry.backoff(1)).await;
                }
                Err(err) => return Err(err),
            }
        }
        debug!(partition = self.partition, "Partition worker stopped");
        Ok(())
    }

    /// Waits for the next batch and processes it. Returns the number of
    /// records consumed.
    pub async fn run_once(&mut self) -> WorkerResult<usize> {
        let records = self.consumer.poll(self.poll_batch).await?;
        self.process_batch(records).await
    }

    async fn process_batch(&mut self, records: Vec<ConsumerRecord>) -> WorkerResult<usize> {
        let Some(last) = records.last() else {
            return Ok(0);
        };
        let _timer = BatchTimer::start();
        let next_offset = last.offset + 1;
        let settings = self.settings.borrow_and_update().clone();
        let machine = self.machine(&settings);

        let mut attempt = 0;
        let plan = loop {
            attempt += 1;
            let plan = self.plan(&machine, &records);
            let transaction = self.transaction(&plan, next_offset)?;
            match self.log.commit_transaction(transaction).await {
                Ok(_) => break plan,
                Err(LogError::Closed) => return Err(LogError::Closed.into()),
                Err(err) if attempt < self.commit_retry.max_attempts => {
                    COMMIT_RETRIES.inc();
                    warn!(
                        partition = self.partition,
                        attempt,
                        error = %err,
                        "Batch commit failed, reloading state and retrying"
                    );
                    tokio::time::sleep(self.commit_retry.backoff(attempt)).await;
                    self.reload().await?;
                }
                Err(source) => {
                    return Err(WorkerError::CommitFailed {
                        partition: self.partition,
                        attempts: attempt,
                        source,
                    });
                }
            }
        };

        self.apply(plan);
        debug!(partition = self.partition, records = records.len(), next_offset, "Batch committed");
        Ok(records.len())
    }

    /// Runs the batch through the state machine without touching `self`.
    fn plan(&self, machine: &impl FlowMapperApi, records: &[ConsumerRecord]) -> BatchPlan {
        let mut plan = BatchPlan::default();

        for record in records {
            let event = match &record.value {
                Some(RecordValue::FlowMapper(event)) => event,
                Some(other) => {
                    let reason = DeadLetterReason::Undecodable(format!("unexpected {} value", other.kind()));
                    plan.dead_letter(record, &record.key, reason);
                    continue;
                }
                None => {
                    plan.dead_letter(record, &record.key, DeadLetterReason::Undecodable("tombstone".into()));
                    continue;
                }
            };

            let Some(session_id) = event.session_id() else {
                // Sweep: expire every closing key on the partition.
                for key in self.expired_keys(machine, &plan, event.timestamp()) {
                    let cleanup = FlowMapperEvent::Wakeup {
                        session_id: SessionId::from(key.as_str()),
                        kind: WakeupKind::Cleanup,
                        fired_at: event.timestamp(),
                    };
                    self.step(machine, &mut plan, record, &key, &cleanup);
                }
                plan.processed.push((event.kind(), "swept"));
                continue;
            };

            if session_id.as_str() != record.key {
                let reason = DeadLetterReason::Undecodable(format!("record key differs from session {session_id}"));
                plan.dead_letter(record, &record.key, reason);
                continue;
            }
            if self.halted.contains(&record.key) || plan.newly_halted.contains(&record.key) {
                plan.dead_letter(record, &record.key, DeadLetterReason::HaltedKey);
                continue;
            }
            self.step(machine, &mut plan, record, &record.key, event);
        }
        plan
    }

    fn step(
        &self,
        machine: &impl FlowMapperApi,
        plan: &mut BatchPlan,
        record: &ConsumerRecord,
        key: &str,
        event: &FlowMapperEvent,
    ) {
        let current = self.current(plan, key);
        let was_error = current
            .session
            .as_ref()
            .is_some_and(|session| session.status == SessionStatus::Error);
        match machine.process(current, event) {
            Ok(outcome) => {
                let is_error = outcome
                    .state
                    .session
                    .as_ref()
                    .is_some_and(|session| session.status == SessionStatus::Error);
                if is_error && !was_error {
                    plan.sessions_errored += 1;
                }
                if outcome.disposition == MapperDisposition::Cleaned {
                    plan.cleanups += 1;
                }
                plan.processed.push((event.kind(), outcome.disposition.label()));
                plan.records.extend(outcome.records);
                plan.schedule.extend(outcome.schedule);
                plan.dirty.insert(key.to_string(), outcome.state);
            }
            Err(err) => plan.dead_letter(record, key, DeadLetterReason::Processing(err)),
        }
    }

    fn current<'a>(&'a self, plan: &'a BatchPlan, key: &str) -> &'a MapperKeyState {
        static EMPTY: MapperKeyState = MapperKeyState {
            session: None,
            mapper: None,
        };
        plan.dirty
            .get(key)
            .or_else(|| self.states.get(key))
            .unwrap_or(&EMPTY)
    }

    fn expired_keys(&self, machine: &impl FlowMapperApi, plan: &BatchPlan, now: u64) -> Vec<String> {
        let keys: BTreeSet<&String> = self.states.keys().chain(plan.dirty.keys()).collect();
        keys.into_iter()
            .filter(|key| !self.halted.contains(*key) && !plan.newly_halted.contains(*key))
            .filter(|key| machine.is_expired(self.current(plan, key), now))
            .cloned()
            .collect()
    }

    fn transaction(&self, plan: &BatchPlan, next_offset: u64) -> WorkerResult<LogTransaction> {
        let mut transaction = LogTransaction::new();
        transaction.records.extend(plan.records.iter().cloned());
        for (key, state) in &plan.dirty {
            let unchanged = match self.states.get(key) {
                Some(stored) => stored == state,
                None => state.is_empty(),
            };
            if !unchanged {
                transaction
                    .records
                    .push(state_record(key, state, self.partition)?);
            }
        }
        transaction.offsets.push(OffsetCommit {
            group: self.group.clone(),
            topic: topics::FLOW_MAPPER_EVENT.to_string(),
            partition: self.partition,
            next_offset,
        });
        Ok(transaction)
    }

    /// Makes a committed plan visible in memory and on the scheduler.
    fn apply(&mut self, plan: BatchPlan) {
        for (key, state) in plan.dirty {
            if state.is_empty() {
                self.states.remove(&key);
            } else {
                self.states.insert(key, state);
            }
        }
        self.halted.extend(plan.newly_halted);

        // Timers lost here are re-armed from state on the next restore.
        if let Err(err) = self.scheduler.apply(&plan.schedule) {
            warn!(partition = self.partition, error = %err, "Timer requests not applied");
        }

        for (kind, disposition) in plan.processed {
            EVENTS_PROCESSED.with_label_values(&[kind, disposition]).inc();
        }
        for reason in plan.dead_letters {
            DEAD_LETTERS.with_label_values(&[reason]).inc();
        }
        SESSIONS_ERRORED.inc_by(plan.sessions_errored);
        MAPPER_CLEANUPS.inc_by(plan.cleanups);
        SCHEDULED_TASKS.set(self.scheduler.pending_count() as i64);
    }
}

impl BatchPlan {
    fn dead_letter(&mut self, record: &ConsumerRecord, key: &str, reason: DeadLetterReason) {
        self.dead_letters.push(reason.label());
        self.records.push(dead_letter(record, key, &reason));
        self.newly_halted.insert(key.to_string());
    }
}
