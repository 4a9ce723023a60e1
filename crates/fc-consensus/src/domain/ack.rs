//! Acknowledgments
//!
//! An acknowledgment is minted by the leader of a virtual server when it
//! leader-executes a message. It pins the message to slot `height` of lane
//! `vm_index` in the process list for `db_height`, and chains to the previous
//! acknowledgment of the same lane through `serial_hash`.

use serde::{Deserialize, Serialize};
use shared_types::{canonical_bytes, sha256_pair, FullSignature, Hash, ServerId, Timestamp};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ack {
    pub timestamp: Timestamp,
    /// First eight bytes of the issuing node's salt.
    pub salt: [u8; 8],
    /// Per-ack salt number derived from the node salt and the timestamp.
    pub salt_number: u32,
    pub db_height: u32,
    pub vm_index: usize,
    /// Minute of the lane (its leader minute) when the ack was issued.
    pub minute: u8,
    /// Slot of the acknowledged message in the lane.
    pub height: u32,
    pub serial_hash: Hash,
    /// Message hash of the acknowledged message.
    pub message_hash: Hash,
    pub leader_chain_id: ServerId,
    pub signature: Option<FullSignature>,
}

impl Ack {
    /// Bytes covered by the leader's signature (everything but the signature).
    pub fn signing_bytes(&self) -> Vec<u8> {
        canonical_bytes(&(
            self.timestamp,
            self.salt,
            self.salt_number,
            self.db_height,
            self.vm_index as u64,
            self.minute,
            self.height,
            self.serial_hash,
            self.message_hash,
            self.leader_chain_id,
        ))
    }

    /// Serial hash for an ack following `prev` in the same lane.
    ///
    /// The first ack of a lane uses the message hash itself.
    pub fn serial_after(prev: Option<&Ack>, message_hash: &Hash) -> Hash {
        match prev {
            None => *message_hash,
            Some(prev) => sha256_pair(&prev.serial_hash, message_hash),
        }
    }

    /// True if this ack correctly follows `prev` in its lane.
    pub fn follows(&self, prev: Option<&Ack>) -> bool {
        self.serial_hash == Self::serial_after(prev, &self.message_hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ack(height: u32, message_hash: Hash, prev: Option<&Ack>) -> Ack {
        Ack {
            timestamp: Timestamp::from_secs(1),
            salt: [0u8; 8],
            salt_number: 0,
            db_height: 1,
            vm_index: 0,
            minute: 0,
            height,
            serial_hash: Ack::serial_after(prev, &message_hash),
            message_hash,
            leader_chain_id: [1u8; 32],
            signature: None,
        }
    }

    #[test]
    fn test_serial_chain() {
        let first = ack(0, [1u8; 32], None);
        assert_eq!(first.serial_hash, [1u8; 32]);
        let second = ack(1, [2u8; 32], Some(&first));
        assert!(second.follows(Some(&first)));
        assert!(!second.follows(None));
    }

    #[test]
    fn test_signing_bytes_ignore_signature() {
        let mut a = ack(0, [1u8; 32], None);
        let before = a.signing_bytes();
        a.signature = Some(FullSignature::new([3u8; 32], [4u8; 64]));
        assert_eq!(before, a.signing_bytes());
    }
}
