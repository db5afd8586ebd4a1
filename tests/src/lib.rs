//! # Flow Mapper Test Suite
//!
//! Tests that span more than one crate, plus the benchmarks.
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── flow_mapper_benchmarks.rs  # criterion throughput benchmarks
//! └── src/
//!     ├── fixtures.rs                # event builders
//!     └── integration/
//!         ├── scenarios.rs           # session scenarios, processor and mapper
//!         └── pipeline.rs            # two nodes: log, worker, scheduler
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p fm-tests
//!
//! # By category
//! cargo test -p fm-tests integration::scenarios::
//! cargo test -p fm-tests integration::pipeline::
//!
//! # Benchmarks
//! cargo bench -p fm-tests
//! ```

pub mod fixtures;
pub mod integration;
