//! Cross-crate tests: session scenarios and the full worker pipeline.

pub mod pipeline;
pub mod scenarios;
