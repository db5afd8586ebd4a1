//! # Shared Types Crate
//!
//! Data model shared by the session manager, the flow mapper, the scheduler
//! and the worker runtime.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: every type that crosses a crate or goes on
//!   the log is defined here.
//! - **Keyed by session**: all records about a session use the session id as
//!   their key, which pins them to one partition and one worker.
//! - **Tombstones**: a record without a value deletes its key from
//!   compacted topics.

pub mod entities;
pub mod mapper;
pub mod record;
pub mod session;
pub mod time;

pub use entities::*;
pub use mapper::*;
pub use record::*;
pub use session::*;
pub use time::*;
