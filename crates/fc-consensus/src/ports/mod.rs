//! Ports layer (Hexagonal Architecture)
//!
//! - `inbound`: bounded queues feeding the engine
//! - `outbound`: collaborators the engine drives

pub mod inbound;
pub mod outbound;

pub use inbound::*;
pub use outbound::*;
