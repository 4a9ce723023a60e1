//! # Shared Types Crate
//!
//! Value types used across the consensus engine, the node runtime and the
//! integration suite.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: identities, hashes and entries are defined here
//!   once; the engine never redefines them.
//! - **Plain Values**: everything here is `Clone + Serialize`; no type carries
//!   locks or channels.

pub mod entities;
pub mod errors;
pub mod hashing;

pub use entities::*;
pub use errors::*;
pub use hashing::*;
