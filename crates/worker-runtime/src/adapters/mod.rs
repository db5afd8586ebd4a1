//! Adapters between the worker and the log.

pub mod state_store;

pub use state_store::{decode_state, encode_state, load_snapshot, state_record, Snapshot};
