//! # Federated Consensus Test Suite
//!
//! ## Structure
//!
//! ```text
//! tests/
//! ├── benches/
//! │   └── consensus_benchmarks.rs   # Classification, ack matching, replay filter
//! └── src/
//!     └── integration/              # Multi-node federation flows
//!         ├── harness.rs
//!         └── flows.rs
//! ```
//!
//! ## Running Tests
//!
//! ```bash
//! # All tests
//! cargo test -p fc-tests
//!
//! # Benchmarks
//! cargo bench -p fc-tests
//! ```

pub mod integration;
