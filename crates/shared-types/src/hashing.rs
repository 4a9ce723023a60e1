//! SHA-256 helpers and the canonical byte encoding hashes are taken over.

use crate::entities::Hash;
use serde::Serialize;
use sha2::{Digest, Sha256};

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hasher.finalize().into()
}

/// SHA-256 over the concatenation `left || right`.
pub fn sha256_pair(left: &Hash, right: &Hash) -> Hash {
    let mut hasher = Sha256::new();
    hasher.update(left);
    hasher.update(right);
    hasher.finalize().into()
}

/// Canonical bincode encoding of `value`.
///
/// The types hashed in this workspace are plain structs and enums, for which
/// bincode cannot fail; an empty buffer is returned if it ever does.
pub fn canonical_bytes<T: Serialize + ?Sized>(value: &T) -> Vec<u8> {
    bincode::serialize(value).unwrap_or_default()
}

/// Hash of the canonical encoding of `value`.
pub fn hash_of<T: Serialize + ?Sized>(value: &T) -> Hash {
    sha256(&canonical_bytes(value))
}

/// First six bytes of a hash as hex, for log fields.
pub fn short_hex(hash: &Hash) -> String {
    hex::encode(&hash[..6])
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_known_vector() {
        let digest = sha256(b"abc");
        assert_eq!(
            hex::encode(digest),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_pair_is_order_sensitive() {
        let a = sha256(b"a");
        let b = sha256(b"b");
        assert_ne!(sha256_pair(&a, &b), sha256_pair(&b, &a));
    }

    #[test]
    fn test_short_hex_len() {
        assert_eq!(short_hex(&[0xab; 32]), "abababababab");
    }
}
