//! # fc-consensus
//!
//! Execution engine for a federated, leader-rotating consensus network.
//!
//! ## Architecture
//!
//! Every inbound message is classified into a send verdict and an execute
//! verdict, then executed as leader (acked and placed in our lane), executed
//! as follower (paired with the leader's ack), held, parked on a dependency or
//! rejected. Placed messages are processed lane by lane in slot order.
//!
//! Rounds advance through two barriers:
//!
//! ```text
//! minute 0      DBSig barrier: every lane leader signs the previous block
//! minute 0..9   EOM barrier: every lane leader closes the minute
//! minute 10     block sealed, move to minute 0 of the next height
//! ```
//!
//! The engine is a synchronous state machine owned by one task. I/O happens
//! behind the ports in [`ports`]; [`adapters`] has in-process implementations.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use fc_consensus::{ConsensusDependencies, ConsensusEngine};
//!
//! let mut engine = ConsensusEngine::new(deps);
//! let handles = engine.queue_handles();
//! handles.submit(msg)?;
//!
//! loop {
//!     engine.process()?;
//! }
//! ```

pub mod adapters;
pub mod config;
pub mod domain;
pub mod metrics;
pub mod ports;
pub mod service;

// Re-export main types
pub use config::{ConfigError, ConsensusConfig};
pub use domain::{ConsensusError, ConsensusResult, Message, Payload, RoundPosition, RoundStatus};
pub use ports::{QueueHandles, SubmitError};
pub use service::{ConsensusDependencies, ConsensusEngine, NodeIdentity};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = ConsensusConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.block_seconds, 600);
    }
}
