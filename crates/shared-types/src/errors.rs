//! Errors raised by the collaborators the engine talks to.

use thiserror::Error;

/// Persistent store failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("I/O error: {message}")]
    Io { message: String },

    #[error("Corrupt record under key {key}: {message}")]
    Corrupt { key: String, message: String },

    #[error("Store is closed")]
    Closed,
}

/// Authority / signature oracle failures.
///
/// A signature that simply does not verify is `Ok(false)`, not an error.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OracleError {
    #[error("No authority set known for height {0}")]
    UnknownHeight(u32),

    #[error("Malformed public key")]
    MalformedKey,
}
