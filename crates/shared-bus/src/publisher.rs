//! # Event Log
//!
//! The write side of the ordered, partitioned log and the in-memory
//! implementation used by the worker runtime and the test suites.

use crate::error::{LogError, LogResult};
use crate::subscriber::{InMemoryConsumer, PartitionConsumer};
use crate::DEFAULT_PARTITION_COUNT;
use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use shared_types::{Record, RecordValue};
use siphasher::sip::SipHasher13;
use std::collections::{BTreeMap, HashMap};
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Notify;
use tracing::debug;

/// Where a published record landed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordMetadata {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
}

/// Consumer-group offset to commit: the next offset the group will read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OffsetCommit {
    pub group: String,
    pub topic: String,
    pub partition: u32,
    pub next_offset: u64,
}

/// Records and offsets that become visible together or not at all.
#[derive(Debug, Clone, Default)]
pub struct LogTransaction {
    pub records: Vec<Record>,
    pub offsets: Vec<OffsetCommit>,
}

impl LogTransaction {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty() && self.offsets.is_empty()
    }
}

/// A record as read back from a partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumerRecord {
    pub topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub value: Option<RecordValue>,
}

/// Ordered, partitioned, replayable log.
///
/// Records with the same key always land on the same partition and are read
/// back in publish order. Delivery is at-least-once: a consumer group
/// resumes from its last committed offset, so anything processed but not
/// committed is delivered again.
#[async_trait]
pub trait EventLog: Send + Sync + 'static {
    type Consumer: PartitionConsumer;

    /// Appends records, each to the partition chosen by its key.
    async fn publish(&self, records: Vec<Record>) -> LogResult<Vec<RecordMetadata>>;

    /// Appends records and commits consumer offsets atomically.
    async fn commit_transaction(
        &self,
        transaction: LogTransaction,
    ) -> LogResult<Vec<RecordMetadata>>;

    /// Opens a consumer for one partition, positioned at the group's
    /// committed offset.
    fn subscribe(&self, topic: &str, group: &str, partition: u32) -> LogResult<Self::Consumer>;

    /// Latest value of every live key in a compacted partition.
    fn compacted(&self, topic: &str, partition: u32) -> Vec<(String, RecordValue)>;

    fn partition_count(&self) -> u32;

    fn partition_for(&self, key: &str) -> u32 {
        partition_for_key(key, self.partition_count())
    }
}

/// Stable key-to-partition mapping shared by every log implementation.
pub fn partition_for_key(key: &str, partitions: u32) -> u32 {
    let mut hasher = SipHasher13::new_with_keys(0, 0);
    hasher.write(key.as_bytes());
    (hasher.finish() % u64::from(partitions.max(1))) as u32
}

#[derive(Default)]
struct TopicLog {
    partitions: Vec<Vec<ConsumerRecord>>,
    latest: Vec<BTreeMap<String, RecordValue>>,
}

impl TopicLog {
    fn new(partitions: u32) -> Self {
        Self {
            partitions: (0..partitions).map(|_| Vec::new()).collect(),
            latest: (0..partitions).map(|_| BTreeMap::new()).collect(),
        }
    }
}

#[derive(Default)]
pub(crate) struct LogState {
    topics: HashMap<String, TopicLog>,
    offsets: HashMap<(String, String, u32), u64>,
}

impl LogState {
    pub(crate) fn read(
        &self,
        topic: &str,
        partition: u32,
        from: u64,
        max: usize,
    ) -> Vec<ConsumerRecord> {
        self.topics
            .get(topic)
            .and_then(|log| log.partitions.get(partition as usize))
            .map(|entries| {
                entries
                    .iter()
                    .skip(from as usize)
                    .take(max)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    pub(crate) fn committed(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.offsets
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
            .unwrap_or(0)
    }
}

/// State shared between the log and its consumers.
pub(crate) struct LogShared {
    pub(crate) state: RwLock<LogState>,
    pub(crate) notify: Notify,
    pub(crate) closed: AtomicBool,
    pub(crate) members: Mutex<HashMap<(String, String), usize>>,
}

/// In-memory implementation of the log.
///
/// Suitable for single-process operation and tests; a clustered deployment
/// would put a broker behind the same trait.
pub struct InMemoryEventLog {
    shared: Arc<LogShared>,
    partitions: u32,
    records_published: AtomicU64,
}

impl InMemoryEventLog {
    #[must_use]
    pub fn new() -> Self {
        Self::with_partitions(DEFAULT_PARTITION_COUNT)
    }

    #[must_use]
    pub fn with_partitions(partitions: u32) -> Self {
        Self {
            shared: Arc::new(LogShared {
                state: RwLock::new(LogState::default()),
                notify: Notify::new(),
                closed: AtomicBool::new(false),
                members: Mutex::new(HashMap::new()),
            }),
            partitions: partitions.max(1),
            records_published: AtomicU64::new(0),
        }
    }

    /// Reads a slice of a partition without joining a consumer group.
    pub fn read(&self, topic: &str, partition: u32, from: u64, max: usize) -> Vec<ConsumerRecord> {
        self.shared.state.read().read(topic, partition, from, max)
    }

    /// Every record ever appended to a topic, partition by partition.
    pub fn read_all(&self, topic: &str) -> Vec<ConsumerRecord> {
        let state = self.shared.state.read();
        (0..self.partitions)
            .flat_map(|partition| state.read(topic, partition, 0, usize::MAX))
            .collect()
    }

    pub fn end_offset(&self, topic: &str, partition: u32) -> u64 {
        self.shared
            .state
            .read()
            .topics
            .get(topic)
            .and_then(|log| log.partitions.get(partition as usize))
            .map_or(0, |entries| entries.len() as u64)
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: u32) -> u64 {
        self.shared.state.read().committed(group, topic, partition)
    }

    /// Number of live consumers for a group on a topic.
    pub fn consumer_count(&self, group: &str, topic: &str) -> usize {
        self.shared
            .members
            .lock()
            .get(&(group.to_string(), topic.to_string()))
            .copied()
            .unwrap_or(0)
    }

    pub fn records_published(&self) -> u64 {
        self.records_published.load(Ordering::Relaxed)
    }

    /// Closes the log and wakes every waiting consumer.
    pub fn close(&self) {
        self.shared.closed.store(true, Ordering::SeqCst);
        self.shared.notify.notify_waiters();
    }

    fn check_open(&self) -> LogResult<()> {
        if self.shared.closed.load(Ordering::SeqCst) {
            return Err(LogError::Closed);
        }
        Ok(())
    }

    fn resolve_partition(&self, record: &Record) -> LogResult<u32> {
        match record.partition {
            Some(partition) if partition >= self.partitions => Err(LogError::UnknownPartition {
                topic: record.topic.clone(),
                partition,
            }),
            Some(partition) => Ok(partition),
            None => Ok(partition_for_key(&record.key, self.partitions)),
        }
    }

    fn append(&self, state: &mut LogState, record: Record, partition: u32) -> RecordMetadata {
        let partitions = self.partitions;
        let log = state
            .topics
            .entry(record.topic.clone())
            .or_insert_with(|| TopicLog::new(partitions));
        let idx = partition as usize;

        match &record.value {
            Some(value) => {
                log.latest[idx].insert(record.key.clone(), value.clone());
            }
            None => {
                log.latest[idx].remove(&record.key);
            }
        }

        let offset = log.partitions[idx].len() as u64;
        log.partitions[idx].push(ConsumerRecord {
            topic: record.topic.clone(),
            partition,
            offset,
            key: record.key,
            value: record.value,
        });

        RecordMetadata {
            topic: record.topic,
            partition,
            offset,
        }
    }

    fn apply(&self, transaction: LogTransaction) -> LogResult<Vec<RecordMetadata>> {
        self.check_open()?;

        // Validate everything before touching state so a failure leaves no trace.
        let placed = transaction
            .records
            .into_iter()
            .map(|record| self.resolve_partition(&record).map(|p| (record, p)))
            .collect::<LogResult<Vec<_>>>()?;

        let mut state = self.shared.state.write();
        for commit in &transaction.offsets {
            if commit.partition >= self.partitions {
                return Err(LogError::UnknownPartition {
                    topic: commit.topic.clone(),
                    partition: commit.partition,
                });
            }
            let committed = state.committed(&commit.group, &commit.topic, commit.partition);
            if commit.next_offset < committed {
                return Err(LogError::OffsetRegression {
                    group: commit.group.clone(),
                    topic: commit.topic.clone(),
                    partition: commit.partition,
                    committed,
                    requested: commit.next_offset,
                });
            }
        }

        let metadata: Vec<RecordMetadata> = placed
            .into_iter()
            .map(|(record, partition)| self.append(&mut state, record, partition))
            .collect();

        for commit in transaction.offsets {
            state.offsets.insert(
                (commit.group, commit.topic, commit.partition),
                commit.next_offset,
            );
        }
        drop(state);

        self.records_published
            .fetch_add(metadata.len() as u64, Ordering::Relaxed);
        if !metadata.is_empty() {
            self.shared.notify.notify_waiters();
        }
        Ok(metadata)
    }
}

impl Default for InMemoryEventLog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventLog for InMemoryEventLog {
    type Consumer = InMemoryConsumer;

    async fn publish(&self, records: Vec<Record>) -> LogResult<Vec<RecordMetadata>> {
        let count = records.len();
        let metadata = self.apply(LogTransaction {
            records,
            offsets: Vec::new(),
        })?;
        debug!(records = count, "Records published");
        Ok(metadata)
    }

    async fn commit_transaction(
        &self,
        transaction: LogTransaction,
    ) -> LogResult<Vec<RecordMetadata>> {
        let records = transaction.records.len();
        let offsets = transaction.offsets.len();
        let metadata = self.apply(transaction)?;
        debug!(records, offsets, "Transaction committed");
        Ok(metadata)
    }

    fn subscribe(&self, topic: &str, group: &str, partition: u32) -> LogResult<InMemoryConsumer> {
        self.check_open()?;
        if partition >= self.partitions {
            return Err(LogError::UnknownPartition {
                topic: topic.to_string(),
                partition,
            });
        }
        let position = self.shared.state.read().committed(group, topic, partition);
        *self
            .shared
            .members
            .lock()
            .entry((group.to_string(), topic.to_string()))
            .or_insert(0) += 1;

        debug!(topic, group, partition, position, "Consumer subscribed");
        Ok(InMemoryConsumer::new(
            self.shared.clone(),
            topic.to_string(),
            group.to_string(),
            partition,
            position,
        ))
    }

    fn compacted(&self, topic: &str, partition: u32) -> Vec<(String, RecordValue)> {
        self.shared
            .state
            .read()
            .topics
            .get(topic)
            .and_then(|log| log.latest.get(partition as usize))
            .map(|latest| latest.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
            .unwrap_or_default()
    }

    fn partition_count(&self) -> u32 {
        self.partitions
    }
}
