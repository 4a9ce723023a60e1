//! Adapters layer (Hexagonal Architecture)
//!
//! In-process implementations of the driven ports. The node runtime wires the
//! channel-backed ones; tests use the recording ones.

mod assembler;
mod channels;
mod clock;
mod memory_store;
mod recording;
mod signing;

pub use assembler::*;
pub use channels::*;
pub use clock::*;
pub use memory_store::*;
pub use recording::*;
pub use signing::*;
