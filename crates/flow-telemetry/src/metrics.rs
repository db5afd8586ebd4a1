//! Prometheus metrics for the flow mapper workers.
//!
//! Names are `fm_<component>_<what>[_<unit>]`. Everything lives in one
//! process-wide [`REGISTRY`] so the worker and its tests share the same view.

use std::time::Instant;

use lazy_static::lazy_static;
use prometheus::core::Collector;
use prometheus::{
    exponential_buckets, Encoder, Histogram, HistogramOpts, IntCounter, IntCounterVec, IntGauge,
    Opts, Registry, TextEncoder,
};

use crate::TelemetryError;

// Panics only on a malformed static definition.
fn counter(name: &str, help: &str) -> IntCounter {
    IntCounter::new(name, help).expect("static counter definition")
}

fn counter_vec(name: &str, help: &str, labels: &[&str]) -> IntCounterVec {
    IntCounterVec::new(Opts::new(name, help), labels).expect("static counter definition")
}

lazy_static! {
    pub static ref REGISTRY: Registry = Registry::new();

    /// Mapper inputs by `event` (session, flow_status, wakeup, sweep) and
    /// `disposition` (applied, ignored, dead_lettered).
    pub static ref EVENTS_PROCESSED: IntCounterVec = counter_vec(
        "fm_mapper_events_processed_total",
        "Flow mapper inputs processed",
        &["event", "disposition"],
    );

    pub static ref SESSIONS_ERRORED: IntCounter =
        counter("fm_sessions_errored_total", "Sessions moved to ERROR");

    pub static ref MAPPER_CLEANUPS: IntCounter = counter(
        "fm_mapper_cleanups_total",
        "Mapper states removed after their cleanup delay",
    );

    /// Dead letters by `reason` (processing_error, halted_key, undecodable).
    pub static ref DEAD_LETTERS: IntCounterVec = counter_vec(
        "fm_worker_dead_letters_total",
        "Records routed to the dead-letter topic",
        &["reason"],
    );

    pub static ref COMMIT_RETRIES: IntCounter = counter(
        "fm_worker_commit_retries_total",
        "Batch commits retried after a transient failure",
    );

    /// 100us up to roughly 1.6s.
    pub static ref BATCH_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "fm_worker_batch_duration_seconds",
            "Time spent processing and committing one batch",
        )
        .buckets(exponential_buckets(0.0001, 2.0, 15).expect("static bucket layout")),
    )
    .expect("static histogram definition");

    pub static ref SCHEDULED_TASKS: IntGauge = IntGauge::new(
        "fm_scheduler_tasks_pending",
        "Timers currently armed",
    )
    .expect("static gauge definition");
}

fn collectors() -> [Box<dyn Collector>; 7] {
    [
        Box::new(EVENTS_PROCESSED.clone()),
        Box::new(SESSIONS_ERRORED.clone()),
        Box::new(MAPPER_CLEANUPS.clone()),
        Box::new(DEAD_LETTERS.clone()),
        Box::new(COMMIT_RETRIES.clone()),
        Box::new(BATCH_DURATION.clone()),
        Box::new(SCHEDULED_TASKS.clone()),
    ]
}

/// Adds every worker metric to [`REGISTRY`]. Idempotent.
pub fn register_metrics() -> Result<(), TelemetryError> {
    collectors()
        .into_iter()
        .try_for_each(|collector| match REGISTRY.register(collector) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => Ok(()),
            Err(e) => Err(TelemetryError::MetricsInit(e.to_string())),
        })
}

/// Renders the registry in the Prometheus text exposition format.
pub fn render() -> Result<String, TelemetryError> {
    let mut out = Vec::new();
    TextEncoder::new()
        .encode(&REGISTRY.gather(), &mut out)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(out).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Observes the elapsed time of one batch into [`BATCH_DURATION`] when dropped.
#[must_use = "the batch is timed until this guard is dropped"]
pub struct BatchTimer {
    started: Instant,
}

impl BatchTimer {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl Drop for BatchTimer {
    fn drop(&mut self) {
        BATCH_DURATION.observe(self.started.elapsed().as_secs_f64());
    }
}
