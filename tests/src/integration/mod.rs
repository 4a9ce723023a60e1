//! # Integration Tests
//!
//! Multi-node flows over in-process adapters, plus one flow through the node
//! runtime's channels.

#[cfg(test)]
pub(crate) mod harness;

pub mod flows;
