//! # Partition Consumer
//!
//! The read side of the log. A consumer belongs to a consumer group and
//! reads one partition in order, starting from the group's committed offset.

use crate::error::{LogError, LogResult};
use crate::publisher::{ConsumerRecord, LogShared};
use async_trait::async_trait;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tracing::debug;

/// Ordered reader over a single partition.
#[async_trait]
pub trait PartitionConsumer: Send + 'static {
    /// Waits for at least one record and returns up to `max_records`.
    ///
    /// Advances the local position only; progress becomes durable when the
    /// offset is committed through the log.
    async fn poll(&mut self, max_records: usize) -> LogResult<Vec<ConsumerRecord>>;

    /// Next offset this consumer will read.
    fn position(&self) -> u64;

    /// Moves the read position, e.g. back to the committed offset after a
    /// failed batch.
    fn seek(&mut self, offset: u64);

    fn topic(&self) -> &str;

    fn group(&self) -> &str;

    fn partition(&self) -> u32;
}

/// Consumer handle for [`crate::InMemoryEventLog`].
///
/// When dropped, the group membership count is decremented.
pub struct InMemoryConsumer {
    shared: Arc<LogShared>,
    topic: String,
    group: String,
    partition: u32,
    position: u64,
}

impl InMemoryConsumer {
    pub(crate) fn new(
        shared: Arc<LogShared>,
        topic: String,
        group: String,
        partition: u32,
        position: u64,
    ) -> Self {
        Self {
            shared,
            topic,
            group,
            partition,
            position,
        }
    }

    /// Returns whatever is available without waiting.
    pub fn try_poll(&mut self, max_records: usize) -> LogResult<Vec<ConsumerRecord>> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed);
        }
        let records =
            self.shared
                .state
                .read()
                .read(&self.topic, self.partition, self.position, max_records);
        if let Some(last) = records.last() {
            self.position = last.offset + 1;
        }
        Ok(records)
    }

    /// Offset committed by this consumer's group.
    pub fn committed(&self) -> u64 {
        self.shared
            .state
            .read()
            .committed(&self.group, &self.topic, self.partition)
    }
}

#[async_trait]
impl PartitionConsumer for InMemoryConsumer {
    async fn poll(&mut self, max_records: usize) -> LogResult<Vec<ConsumerRecord>> {
        let shared = self.shared.clone();
        loop {
            // Register interest before checking so a publish in between is not missed.
            let notified = shared.notify.notified();
            let records = self.try_poll(max_records)?;
            if !records.is_empty() {
                return Ok(records);
            }
            notified.await;
        }
    }

    fn position(&self) -> u64 {
        self.position
    }

    fn seek(&mut self, offset: u64) {
        self.position = offset;
    }

    fn topic(&self) -> &str {
        &self.topic
    }

    fn group(&self) -> &str {
        &self.group
    }

    fn partition(&self) -> u32 {
        self.partition
    }
}

impl Drop for InMemoryConsumer {
    fn drop(&mut self) {
        let mut members = self.shared.members.lock();
        let key = (self.group.clone(), self.topic.clone());
        if let Some(count) = members.get_mut(&key) {
            *count = count.saturating_sub(1);
            if *count == 0 {
                members.remove(&key);
            }
        }
        debug!(topic = %self.topic, group = %self.group, partition = self.partition, "Consumer dropped");
    }
}
