//! # State Store
//!
//! Per-key mapper state lives in the compacted `flow.mapper.state` topic as
//! bincode bytes. Writes go through the worker's batch transaction, so a
//! state change and the records it produced become visible together.
//!
//! An empty state is written as a tombstone, which removes the key.

use crate::error::{WorkerError, WorkerResult};
use fm_02_flow_mapper::MapperKeyState;
use shared_bus::EventLog;
use shared_types::{topics, Record, RecordValue};
use std::collections::HashMap;
use tracing::{debug, error};

pub fn encode_state(key: &str, state: &MapperKeyState) -> WorkerResult<Vec<u8>> {
    bincode::serialize(state).map_err(|e| WorkerError::StateEncode {
        key: key.to_string(),
        reason: e.to_string(),
    })
}

pub fn decode_state(bytes: &[u8]) -> Result<MapperKeyState, String> {
    bincode::deserialize(bytes).map_err(|e| e.to_string())
}

/// The state write for one key, pinned to the worker's partition.
pub fn state_record(key: &str, state: &MapperKeyState, partition: u32) -> WorkerResult<Record> {
    let record = if state.is_empty() {
        Record::tombstone(topics::FLOW_MAPPER_STATE, key)
    } else {
        Record::new(
            topics::FLOW_MAPPER_STATE,
            key,
            RecordValue::State(encode_state(key, state)?),
        )
    };
    Ok(record.to_partition(partition))
}

/// Live keys of one partition as read back from the log.
#[derive(Debug, Default)]
pub struct Snapshot {
    pub states: HashMap<String, MapperKeyState>,
    /// Keys whose stored bytes could not be read, with the reason.
    pub corrupted: Vec<(String, String)>,
}

/// Reads the latest state of every key on `partition`.
pub fn load_snapshot<L: EventLog>(log: &L, partition: u32) -> Snapshot {
    let mut snapshot = Snapshot::default();
    for (key, value) in log.compacted(topics::FLOW_MAPPER_STATE, partition) {
        let decoded = match value {
            RecordValue::State(bytes) => decode_state(&bytes),
            other => Err(format!("unexpected {} value in state topic", other.kind())),
        };
        match decoded {
            Ok(state) => {
                snapshot.states.insert(key, state);
            }
            Err(reason) => {
                error!(partition, key = %key, reason = %reason, "Stored state unreadable, key halted");
                snapshot.corrupted.push((key, reason));
            }
        }
    }
    debug!(
        partition,
        keys = snapshot.states.len(),
        corrupted = snapshot.corrupted.len(),
        "State snapshot loaded"
    );
    snapshot
}
