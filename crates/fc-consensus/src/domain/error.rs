//! Error types for the consensus engine

use shared_types::{OracleError, StoreError};

/// Consensus error types
///
/// Variants reported by [`ConsensusError::is_fatal`] are protocol violations:
/// the node's view of the round can no longer be trusted and it must stop.
/// Everything else is recoverable and the offending message is dropped or held.
#[derive(Debug, thiserror::Error)]
pub enum ConsensusError {
    #[error("EOM for height {height} minute {minute} while a DBSig round is open")]
    EomDuringDbSig { height: u32, minute: u8 },

    #[error("DBSig for height {height} while an EOM round is open")]
    DbSigDuringEom { height: u32 },

    #[error("EOM round started with {processed} EOMs already processed")]
    EomRoundNotReset { processed: usize },

    #[error("DBSig round started with {processed} DBSigs already processed")]
    DbSigRoundNotReset { processed: usize },

    #[error("EOM for height {got} while the EOM round for height {open} is open")]
    EomHeightMismatch { open: u32, got: u32 },

    #[error("EOM for minute {got} processed during minute {current}")]
    EomMinuteMismatch { current: u8, got: u8 },

    #[error("DBSig round started while the node is syncing an EOM")]
    DbSigWhileSyncing,

    #[error("Illegal round move from ({from_height}, {from_minute}) to ({to_height}, {to_minute})")]
    NonSequentialMove {
        from_height: u32,
        from_minute: u8,
        to_height: u32,
        to_minute: u8,
    },

    #[error("Recursive execution of message {0:?}")]
    RecursiveExecute([u8; 32]),

    #[error("Invalid final DBState at height {0} from the local database")]
    InvalidLastDbState(u32),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Authority oracle error: {0}")]
    Oracle(#[from] OracleError),

    #[error("Block assembly failed at height {height}: {reason}")]
    Assembly { height: u32, reason: String },
}

impl ConsensusError {
    /// True for protocol violations the node must not continue past.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ConsensusError::EomDuringDbSig { .. }
                | ConsensusError::DbSigDuringEom { .. }
                | ConsensusError::EomRoundNotReset { .. }
                | ConsensusError::DbSigRoundNotReset { .. }
                | ConsensusError::EomHeightMismatch { .. }
                | ConsensusError::EomMinuteMismatch { .. }
                | ConsensusError::DbSigWhileSyncing
                | ConsensusError::NonSequentialMove { .. }
                | ConsensusError::RecursiveExecute(_)
                | ConsensusError::InvalidLastDbState(_)
                | ConsensusError::Assembly { .. }
        )
    }
}

/// Result type for consensus operations
pub type ConsensusResult<T> = Result<T, ConsensusError>;
