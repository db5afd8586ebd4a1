//! # Log Records
//!
//! The unit of exchange with the ordered, partitioned log. A record with no
//! value is a tombstone: compacted topics drop the key when they see one.

use crate::mapper::{FlowEvent, FlowMapperEvent};
use crate::session::SessionEvent;
use serde::{Deserialize, Serialize};

/// Topic names used by the flow mapper worker.
pub mod topics {
    /// Input of the flow mapper: session traffic, flow reports, wake-ups.
    pub const FLOW_MAPPER_EVENT: &str = "flow.mapper.event";
    /// Session events for the counterparty, picked up by the link layer.
    pub const P2P_OUT: &str = "p2p.out";
    /// Start and delivery instructions for the flow-execution layer.
    pub const FLOW_EVENT: &str = "flow.event";
    /// Compacted per-session state.
    pub const FLOW_MAPPER_STATE: &str = "flow.mapper.state";
    /// Records that failed with an unrecoverable error.
    pub const FLOW_MAPPER_DLQ: &str = "flow.mapper.dlq";
}

/// Value stored in a log record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RecordValue {
    Session(SessionEvent),
    FlowMapper(FlowMapperEvent),
    Flow(FlowEvent),
    /// Serialized state snapshot, opaque to the log.
    State(Vec<u8>),
    DeadLetter(DeadLetterRecord),
}

impl RecordValue {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Session(_) => "session",
            Self::FlowMapper(_) => "flow_mapper",
            Self::Flow(_) => "flow",
            Self::State(_) => "state",
            Self::DeadLetter(_) => "dead_letter",
        }
    }
}

/// A record to be published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Record {
    pub topic: String,
    pub key: String,
    /// Explicit partition; derived from the key when absent.
    pub partition: Option<u32>,
    /// `None` marks a tombstone.
    pub value: Option<RecordValue>,
}

impl Record {
    pub fn new(topic: impl Into<String>, key: impl Into<String>, value: RecordValue) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            partition: None,
            value: Some(value),
        }
    }

    pub fn tombstone(topic: impl Into<String>, key: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            key: key.into(),
            partition: None,
            value: None,
        }
    }

    pub fn to_partition(mut self, partition: u32) -> Self {
        self.partition = Some(partition);
        self
    }

    pub fn is_tombstone(&self) -> bool {
        self.value.is_none()
    }
}

/// A record diverted to the dead-letter topic.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub source_topic: String,
    pub partition: u32,
    pub offset: u64,
    pub key: String,
    pub reason: String,
    pub original: Option<Box<RecordValue>>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tombstone_has_no_value() {
        let record = Record::tombstone(topics::FLOW_MAPPER_STATE, "s1");
        assert!(record.is_tombstone());
        assert_eq!(record.partition, None);
    }

    #[test]
    fn test_explicit_partition() {
        let record = Record::new(topics::FLOW_MAPPER_EVENT, "sweep", RecordValue::State(vec![]))
            .to_partition(3);
        assert_eq!(record.partition, Some(3));
        assert!(!record.is_tombstone());
    }
}
