//! Outbound port: where fired wake-ups go.

use async_trait::async_trait;
use shared_bus::LogResult;
use shared_types::FlowMapperEvent;

/// Delivers a fired wake-up back to the flow mapper's input topic.
#[async_trait]
pub trait WakeupPublisher: Send + Sync + 'static {
    /// Publishes `event`, to `partition` if given, otherwise by its key.
    async fn publish(&self, event: FlowMapperEvent, partition: Option<u32>) -> LogResult<()>;
}
