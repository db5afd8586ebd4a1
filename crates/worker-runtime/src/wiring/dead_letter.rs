//! Dead-letter path.
//!
//! A record that fails with an unrecoverable error is copied to
//! `flow.mapper.dlq` together with the reason, and its key is halted: every
//! later record for the same key follows it there until an operator
//! remediates the stored state and tombstones the key on the DLQ.
//!
//! Dead letters are pinned to the source partition, so the DLQ's compacted
//! view doubles as the durable set of halted keys.

use fm_02_flow_mapper::FlowMapperError;
use shared_bus::{ConsumerRecord, EventLog};
use shared_types::{topics, DeadLetterRecord, Record, RecordValue};
use std::collections::HashSet;
use std::fmt;
use tracing::{error, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeadLetterReason {
    /// The state machine rejected the record.
    Processing(FlowMapperError),
    /// The key was halted by an earlier failure.
    HaltedKey,
    /// The record is not a flow mapper event.
    Undecodable(String),
    /// The key's stored state could not be read.
    CorruptedState(String),
}

impl DeadLetterReason {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Processing(_) => "processing_error",
            Self::HaltedKey => "halted_key",
            Self::Undecodable(_) => "undecodable",
            Self::CorruptedState(_) => "corrupted_state",
        }
    }
}

impl fmt::Display for DeadLetterReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Processing(err) => write!(f, "{err}"),
            Self::HaltedKey => f.write_str("key halted by an earlier failure"),
            Self::Undecodable(what) => write!(f, "undecodable record: {what}"),
            Self::CorruptedState(reason) => write!(f, "stored state unreadable: {reason}"),
        }
    }
}

/// Builds the DLQ record for `source` and logs it. `key` is the key being
/// halted, which differs from the record key for sweep-driven cleanups.
pub fn dead_letter(source: &ConsumerRecord, key: &str, reason: &DeadLetterReason) -> Record {
    let original = source
        .value
        .as_ref()
        .and_then(|value| serde_json::to_string(value).ok())
        .unwrap_or_else(|| "<tombstone>".to_string());
    error!(
        topic = %source.topic,
        partition = source.partition,
        offset = source.offset,
        key = %key,
        reason = %reason,
        original = %original,
        "Record dead-lettered"
    );

    Record::new(
        topics::FLOW_MAPPER_DLQ,
        key,
        RecordValue::DeadLetter(DeadLetterRecord {
            source_topic: source.topic.clone(),
            partition: source.partition,
            offset: source.offset,
            key: key.to_string(),
            reason: reason.to_string(),
            original: source.value.clone().map(Box::new),
        }),
    )
    .to_partition(source.partition)
}

/// The DLQ record for a key whose stored state could not be read. Compacted
/// reads carry no position, so the offset is left at 0.
pub fn corrupted_state_letter(partition: u32, key: &str, reason: &DeadLetterReason) -> Record {
    error!(
        topic = topics::FLOW_MAPPER_STATE,
        partition,
        key = %key,
        reason = %reason,
        "Stored state dead-lettered"
    );

    Record::new(
        topics::FLOW_MAPPER_DLQ,
        key,
        RecordValue::DeadLetter(DeadLetterRecord {
            source_topic: topics::FLOW_MAPPER_STATE.to_string(),
            partition,
            offset: 0,
            key: key.to_string(),
            reason: reason.to_string(),
            original: None,
        }),
    )
    .to_partition(partition)
}

/// Keys of `partition` that still have a dead letter outstanding.
pub fn load_halted<L: EventLog>(log: &L, partition: u32) -> HashSet<String> {
    let halted: HashSet<String> = log
        .compacted(topics::FLOW_MAPPER_DLQ, partition)
        .into_iter()
        .filter_map(|(key, value)| match value {
            RecordValue::DeadLetter(letter)
                if letter.source_topic == topics::FLOW_MAPPER_EVENT
                    || letter.source_topic == topics::FLOW_MAPPER_STATE =>
            {
                Some(key)
            }
            _ => None,
        })
        .collect();
    if !halted.is_empty() {
        info!(partition, halted = halted.len(), "Halted keys restored from dead-letter topic");
    }
    halted
}
