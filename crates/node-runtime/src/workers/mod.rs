//! Node workers
//!
//! One task per role, connected by channels:
//!
//! ```text
//!  network ──► msg_order ──► inbound queues ──► validator (engine)
//!                                 ▲                  │
//!                 leader (EOMs) ──┘                  ├──► gossip / requests ──► network
//!                                                    └──► write_back ──► store ◄── entry_sync
//! ```

mod entry_sync;
mod leader;
mod msg_order;
mod validator;
mod write_back;

pub use entry_sync::*;
pub use leader::*;
pub use msg_order::*;
pub use validator::*;
pub use write_back::*;
