//! # Core Domain Entities
//!
//! ## Clusters
//!
//! - **Identity**: `ServerId`, `ChainId`, `Address`
//! - **Time**: `Timestamp` (milliseconds since the Unix epoch)
//! - **Authentication**: `FullSignature` (ed25519 public key + signature)
//! - **Chain data**: `Entry`

use crate::hashing::{canonical_bytes, sha256};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, Bytes};
use std::fmt;

/// A 32-byte SHA-256 digest.
pub type Hash = [u8; 32];

/// The all-zero hash, used as "no hash".
pub const ZERO_HASH: Hash = [0u8; 32];

/// Identity chain id of a federated or audit server.
pub type ServerId = [u8; 32];

/// Id of an entry chain.
pub type ChainId = [u8; 32];

/// Factoid or entry-credit address (hash of the owning public key).
pub type Address = [u8; 32];

/// A 32-byte Ed25519 public key.
pub type PublicKey = [u8; 32];

// =============================================================================
// TIME
// =============================================================================

/// Milliseconds since the Unix epoch.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Timestamp(u64);

impl Timestamp {
    #[must_use]
    pub const fn from_millis(millis: u64) -> Self {
        Self(millis)
    }

    #[must_use]
    pub const fn from_secs(secs: u64) -> Self {
        Self(secs.saturating_mul(1000))
    }

    pub const fn millis(self) -> u64 {
        self.0
    }

    pub const fn secs(self) -> u64 {
        self.0 / 1000
    }

    #[must_use]
    pub const fn saturating_add_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_add(millis))
    }

    #[must_use]
    pub const fn saturating_sub_millis(self, millis: u64) -> Self {
        Self(self.0.saturating_sub(millis))
    }

    /// Milliseconds elapsed from `earlier` to `self`, zero if `earlier` is later.
    pub const fn millis_since(self, earlier: Timestamp) -> u64 {
        self.0.saturating_sub(earlier.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{:03}", self.0 / 1000, self.0 % 1000)
    }
}

// =============================================================================
// AUTHENTICATION
// =============================================================================

/// An ed25519 signature together with the key that produced it.
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FullSignature {
    pub public_key: PublicKey,
    #[serde_as(as = "Bytes")]
    pub signature: [u8; 64],
}

impl FullSignature {
    pub fn new(public_key: PublicKey, signature: [u8; 64]) -> Self {
        Self {
            public_key,
            signature,
        }
    }
}

// =============================================================================
// CHAIN DATA
// =============================================================================

/// An application entry appended to an entry chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry {
    pub chain_id: ChainId,
    pub ext_ids: Vec<Vec<u8>>,
    pub content: Vec<u8>,
}

impl Entry {
    pub fn new(chain_id: ChainId, ext_ids: Vec<Vec<u8>>, content: Vec<u8>) -> Self {
        Self {
            chain_id,
            ext_ids,
            content,
        }
    }

    /// Content hash of the entry; the key commits and reveals are matched on.
    pub fn hash(&self) -> Hash {
        sha256(&canonical_bytes(self))
    }

    /// Payload size in bytes: external ids (with a two-byte length each) and content.
    pub fn size(&self) -> usize {
        self.ext_ids.iter().map(|id| id.len() + 2).sum::<usize>() + self.content.len()
    }

    /// Derives the chain id a first entry creates from its external ids.
    pub fn chain_id_for(ext_ids: &[Vec<u8>]) -> ChainId {
        let mut joined = Vec::new();
        for id in ext_ids {
            joined.extend_from_slice(&sha256(id));
        }
        sha256(&joined)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_arithmetic() {
        let t = Timestamp::from_secs(10);
        assert_eq!(t.millis(), 10_000);
        assert_eq!(t.saturating_sub_millis(20_000).millis(), 0);
        assert_eq!(t.saturating_add_millis(500).millis_since(t), 500);
        assert_eq!(t.millis_since(t.saturating_add_millis(1)), 0);
    }

    #[test]
    fn test_entry_hash_depends_on_content() {
        let a = Entry::new([1u8; 32], vec![], b"hello".to_vec());
        let b = Entry::new([1u8; 32], vec![], b"world".to_vec());
        assert_ne!(a.hash(), b.hash());
        assert_eq!(a.hash(), a.clone().hash());
    }

    #[test]
    fn test_signature_serde_roundtrip() {
        let sig = FullSignature::new([7u8; 32], [9u8; 64]);
        let json = serde_json::to_string(&sig).unwrap();
        let back: FullSignature = serde_json::from_str(&json).unwrap();
        assert_eq!(sig, back);
    }
}
