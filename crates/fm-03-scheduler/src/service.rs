//! Wake-up scheduler backed by tokio tasks.

use crate::domain::SchedulerConfig;
use crate::error::{SchedulerError, SchedulerResult};
use crate::ports::{TaskScheduler, WakeupPublisher};
use parking_lot::{Mutex, RwLock};
use shared_types::{FlowMapperEvent, SessionId, TimeSource, Timestamp, WakeupKind};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

type TaskKey = (SessionId, WakeupKind);

struct TaskEntry {
    generation: u64,
    fire_at: Timestamp,
    handle: JoinHandle<()>,
}

struct Shared<P> {
    config: SchedulerConfig,
    time: Arc<dyn TimeSource>,
    /// Released on shutdown so in-flight tasks cannot publish.
    publisher: RwLock<Option<Arc<P>>>,
    tasks: Mutex<HashMap<TaskKey, TaskEntry>>,
    sweep: Mutex<Option<JoinHandle<()>>>,
    next_generation: AtomicU64,
    shut_down: AtomicBool,
}

impl<P: WakeupPublisher> Shared<P> {
    /// Publishes with a fixed pause between attempts. Returns false if the
    /// event was dropped.
    async fn publish_with_retry(&self, event: FlowMapperEvent, partition: Option<u32>) -> bool {
        for attempt in 1..=self.config.max_publish_attempts {
            let publisher = self.publisher.read().clone();
            let Some(publisher) = publisher else {
                debug!(kind = event.kind(), "Scheduler shut down, wake-up dropped");
                return false;
            };
            match publisher.publish(event.clone(), partition).await {
                Ok(()) => return true,
                Err(e) => {
                    warn!(kind = event.kind(), attempt, error = %e, "Wake-up publish failed");
                    tokio::time::sleep(self.config.publish_retry()).await;
                }
            }
        }
        error!(
            kind = event.kind(),
            session_id = ?event.session_id(),
            attempts = self.config.max_publish_attempts,
            "Wake-up dropped after repeated publish failures"
        );
        false
    }

    /// Forgets a fired timer unless it has been replaced meanwhile.
    fn complete(&self, key: &TaskKey, generation: u64) {
        let mut tasks = self.tasks.lock();
        if tasks.get(key).is_some_and(|entry| entry.generation == generation) {
            tasks.remove(key);
        }
    }
}

/// Per-session timers that publish [`FlowMapperEvent::Wakeup`] when due.
///
/// Deadlines are absolute timestamps from the injected [`TimeSource`]; the
/// delay is computed when the timer is armed. A fired wake-up carries
/// `fired_at >= fire_at`, so the state machine sees it as due.
pub struct WakeupScheduler<P: WakeupPublisher> {
    shared: Arc<Shared<P>>,
    runtime: Handle,
}

impl<P: WakeupPublisher> WakeupScheduler<P> {
    /// Must be called from within a tokio runtime.
    pub fn new(
        config: SchedulerConfig,
        publisher: P,
        time: Arc<dyn TimeSource>,
    ) -> SchedulerResult<Self> {
        config.validate()?;
        let runtime = Handle::try_current().map_err(|_| SchedulerError::NoRuntime)?;
        Ok(Self {
            shared: Arc::new(Shared {
                config,
                time,
                publisher: RwLock::new(Some(Arc::new(publisher))),
                tasks: Mutex::new(HashMap::new()),
                sweep: Mutex::new(None),
                next_generation: AtomicU64::new(0),
                shut_down: AtomicBool::new(false),
            }),
            runtime,
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn is_scheduled(&self, session_id: &SessionId, kind: WakeupKind) -> bool {
        self.shared
            .tasks
            .lock()
            .contains_key(&(session_id.clone(), kind))
    }

    /// Deadline of the armed timer, if any.
    pub fn deadline(&self, session_id: &SessionId, kind: WakeupKind) -> Option<Timestamp> {
        self.shared
            .tasks
            .lock()
            .get(&(session_id.clone(), kind))
            .map(|entry| entry.fire_at)
    }

    pub fn is_shut_down(&self) -> bool {
        self.shared.shut_down.load(Ordering::SeqCst)
    }

    fn ensure_running(&self) -> SchedulerResult<()> {
        if self.is_shut_down() {
            return Err(SchedulerError::ShutDown);
        }
        Ok(())
    }
}

impl<P: WakeupPublisher> TaskScheduler for WakeupScheduler<P> {
    fn schedule(
        &self,
        session_id: &SessionId,
        kind: WakeupKind,
        fire_at: Timestamp,
    ) -> SchedulerResult<()> {
        self.ensure_running()?;
        let key = (session_id.clone(), kind);

        // Held across spawn and insert so a zero-delay task cannot complete
        // before its entry exists.
        let mut tasks = self.shared.tasks.lock();
        if let Some(existing) = tasks.get(&key) {
            if existing.fire_at == fire_at && !existing.handle.is_finished() {
                return Ok(());
            }
        }

        let generation = self.shared.next_generation.fetch_add(1, Ordering::Relaxed);
        let delay = Duration::from_millis(fire_at.saturating_sub(self.shared.time.now()));
        let shared = self.shared.clone();
        let task_key = key.clone();
        let handle = self.runtime.spawn(async move {
            tokio::time::sleep(delay).await;
            let fired_at = shared.time.now().max(fire_at);
            let event = FlowMapperEvent::Wakeup {
                session_id: task_key.0.clone(),
                kind: task_key.1,
                fired_at,
            };
            shared.publish_with_retry(event, None).await;
            shared.complete(&task_key, generation);
        });

        if let Some(previous) = tasks.insert(
            key,
            TaskEntry {
                generation,
                fire_at,
                handle,
            },
        ) {
            previous.handle.abort();
        }
        debug!(session_id = %session_id, %kind, fire_at, delay_ms = delay.as_millis() as u64, "Timer armed");
        Ok(())
    }

    fn cancel(&self, session_id: &SessionId, kind: WakeupKind) -> bool {
        let removed = self.shared.tasks.lock().remove(&(session_id.clone(), kind));
        match removed {
            Some(entry) => {
                entry.handle.abort();
                debug!(session_id = %session_id, %kind, "Timer cancelled");
                true
            }
            None => false,
        }
    }

    fn cancel_session(&self, session_id: &SessionId) -> usize {
        let mut cancelled = 0;
        self.shared.tasks.lock().retain(|(id, _), entry| {
            if id == session_id {
                entry.handle.abort();
                cancelled += 1;
                false
            } else {
                true
            }
        });
        if cancelled > 0 {
            debug!(session_id = %session_id, cancelled, "Session timers cancelled");
        }
        cancelled
    }

    fn start_sweep(&self, interval: Duration, partitions: Vec<u32>) -> SchedulerResult<()> {
        self.ensure_running()?;
        if interval.is_zero() {
            return Err(SchedulerError::InvalidConfig {
                reason: "sweep interval must be positive".into(),
            });
        }

        let shared = self.shared.clone();
        let handle = self.runtime.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let fired_at = shared.time.now();
                for partition in &partitions {
                    let event = FlowMapperEvent::Sweep { fired_at };
                    if !shared.publish_with_retry(event, Some(*partition)).await
                        && shared.shut_down.load(Ordering::SeqCst)
                    {
                        return;
                    }
                }
                debug!(fired_at, partitions = partitions.len(), "Sweep published");
            }
        });

        if let Some(previous) = self.shared.sweep.lock().replace(handle) {
            previous.abort();
        }
        info!(interval_ms = interval.as_millis() as u64, "Cleanup sweep started");
        Ok(())
    }

    fn shutdown(&self) {
        if self.shared.shut_down.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shared.publisher.write().take();
        let aborted: Vec<TaskEntry> = self
            .shared
            .tasks
            .lock()
            .drain()
            .map(|(_, entry)| entry)
            .collect();
        for entry in &aborted {
            entry.handle.abort();
        }
        if let Some(sweep) = self.shared.sweep.lock().take() {
            sweep.abort();
        }
        info!(aborted = aborted.len(), "Scheduler shut down");
    }

    fn pending_count(&self) -> usize {
        self.shared.tasks.lock().len()
    }
}

impl<P: WakeupPublisher> Drop for WakeupScheduler<P> {
    fn drop(&mut self) {
        self.shutdown();
    }
}
