//! Ed25519 signer and authority oracle
//!
//! `Ed25519Signer` holds this node's key. `Ed25519AuthorityOracle` keeps the
//! authority set per height, mirrored from the engine, and accepts a signature
//! only if it verifies and its key is federated at that height.

use crate::domain::AuthoritySet;
use crate::ports::{AuthorityOracle, LocalSigner};
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};
use parking_lot::RwLock;
use shared_types::{FullSignature, OracleError, PublicKey};
use std::collections::BTreeMap;

/// Local ed25519 signing key.
pub struct Ed25519Signer {
    signing_key: SigningKey,
}

impl Ed25519Signer {
    /// Create from a 32-byte secret seed.
    pub fn from_seed(seed: [u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(&seed),
        }
    }

    /// Random key, for tests and throwaway nodes.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut rand::thread_rng()),
        }
    }
}

impl LocalSigner for Ed25519Signer {
    fn public_key(&self) -> PublicKey {
        self.signing_key.verifying_key().to_bytes()
    }

    fn sign(&self, data: &[u8]) -> FullSignature {
        FullSignature::new(self.public_key(), self.signing_key.sign(data).to_bytes())
    }
}

/// Checks an ed25519 signature against the key it carries.
pub fn verify_signature(data: &[u8], signature: &FullSignature) -> Result<bool, OracleError> {
    let key =
        VerifyingKey::from_bytes(&signature.public_key).map_err(|_| OracleError::MalformedKey)?;
    let sig = Signature::from_bytes(&signature.signature);
    Ok(key.verify(data, &sig).is_ok())
}

/// Authority sets by the height they take effect at.
pub struct Ed25519AuthorityOracle {
    sets: RwLock<BTreeMap<u32, AuthoritySet>>,
}

impl Ed25519AuthorityOracle {
    pub fn new() -> Self {
        Self {
            sets: RwLock::new(BTreeMap::new()),
        }
    }

    /// Authority set in force at `db_height`.
    pub fn authorities_at(&self, db_height: u32) -> Option<AuthoritySet> {
        self.sets
            .read()
            .range(..=db_height)
            .next_back()
            .map(|(_, set)| set.clone())
    }
}

impl Default for Ed25519AuthorityOracle {
    fn default() -> Self {
        Self::new()
    }
}

impl AuthorityOracle for Ed25519AuthorityOracle {
    fn verify_authority_signature(
        &self,
        data: &[u8],
        signature: &FullSignature,
        db_height: u32,
    ) -> Result<bool, OracleError> {
        let federated = {
            let sets = self.sets.read();
            let (_, set) = sets
                .range(..=db_height)
                .next_back()
                .ok_or(OracleError::UnknownHeight(db_height))?;
            set.is_federated_key(&signature.public_key)
        };
        if !federated {
            return Ok(false);
        }
        verify_signature(data, signature)
    }

    fn update_authorities(&self, db_height: u32, authorities: &AuthoritySet) {
        let mut sets = self.sets.write();
        if sets.get(&db_height) != Some(authorities) {
            sets.insert(db_height, authorities.clone());
        }
    }
}
