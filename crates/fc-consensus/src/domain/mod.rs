//! Domain layer for the consensus engine
//!
//! Pure state with no I/O: messages and acks, holding, the replay filter,
//! process lists, the authority set and round bookkeeping.

mod ack;
mod authority;
mod balances;
mod block;
mod commits;
mod error;
mod holding;
mod ledger;
mod matcher;
mod message;
mod process_list;
mod replay;
mod round;

pub use ack::*;
pub use authority::*;
pub use balances::*;
pub use block::*;
pub use commits::*;
pub use error::*;
pub use holding::*;
pub use ledger::*;
pub use matcher::*;
pub use message::*;
pub use process_list::*;
pub use replay::*;
pub use round::*;
