//! Publishes wake-ups onto `flow.mapper.event`.

use crate::ports::WakeupPublisher;
use async_trait::async_trait;
use shared_bus::{EventLog, LogResult};
use shared_types::{topics, FlowMapperEvent, Record, RecordValue};
use std::sync::Arc;

/// Key used for records that are routed by explicit partition.
pub const SWEEP_KEY: &str = "__sweep__";

pub struct LogWakeupPublisher<L: EventLog> {
    log: Arc<L>,
}

impl<L: EventLog> LogWakeupPublisher<L> {
    pub fn new(log: Arc<L>) -> Self {
        Self { log }
    }
}

#[async_trait]
impl<L: EventLog> WakeupPublisher for LogWakeupPublisher<L> {
    async fn publish(&self, event: FlowMapperEvent, partition: Option<u32>) -> LogResult<()> {
        let key = event
            .session_id()
            .map_or_else(|| SWEEP_KEY.to_string(), |id| id.to_string());
        let mut record = Record::new(topics::FLOW_MAPPER_EVENT, key, RecordValue::FlowMapper(event));
        if let Some(partition) = partition {
            record = record.to_partition(partition);
        }
        self.log.publish(vec![record]).await.map(|_| ())
    }
}
