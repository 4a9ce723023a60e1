//! Hash-chain block assembler
//!
//! Seals a block candidate into a directory block. The body merkle root is
//! taken over the entry blocks followed by the entry-credit, factoid and admin
//! sections, so nodes with identical process lists produce identical blocks.

use crate::domain::{BlockCandidate, DirectoryBlockHeader, SealedBlock};
use crate::ports::{AssemblyError, BlockAssembler};
use shared_types::{hash_of, sha256_pair, Hash, ZERO_HASH};

pub struct HashChainAssembler {
    version: u8,
    network_id: u32,
}

impl HashChainAssembler {
    pub fn new(network_id: u32) -> Self {
        Self {
            version: 0,
            network_id,
        }
    }
}

impl Default for HashChainAssembler {
    fn default() -> Self {
        Self::new(0)
    }
}

/// Pairwise SHA-256 merkle root; an odd node is paired with itself.
pub fn merkle_root(mut level: Vec<Hash>) -> Hash {
    if level.is_empty() {
        return ZERO_HASH;
    }
    while level.len() > 1 {
        level = level
            .chunks(2)
            .map(|pair| sha256_pair(&pair[0], pair.get(1).unwrap_or(&pair[0])))
            .collect();
    }
    level[0]
}

fn body_leaves(body: &BlockCandidate) -> Vec<Hash> {
    let mut leaves: Vec<Hash> = body.entry_blocks.iter().map(|eb| eb.key_mr()).collect();
    leaves.push(hash_of(&body.ec_records));
    leaves.push(hash_of(&(&body.factoid_transactions, &body.factoid_period_ends)));
    leaves.push(hash_of(&body.admin_changes));
    leaves
}

impl BlockAssembler for HashChainAssembler {
    fn seal(
        &self,
        candidate: BlockCandidate,
        previous: Option<&DirectoryBlockHeader>,
    ) -> Result<SealedBlock, AssemblyError> {
        let h = candidate.db_height;
        let prev_key_mr = match (h, previous) {
            (0, _) => ZERO_HASH,
            (_, None) => return Err(AssemblyError::MissingPrevious(h - 1)),
            (_, Some(prev)) if prev.db_height + 1 != h => {
                return Err(AssemblyError::Invalid(format!(
                    "previous block is height {}, sealing {}",
                    prev.db_height, h
                )));
            }
            (_, Some(prev)) => prev.key_mr(),
        };
        if candidate.prev_key_mr != prev_key_mr {
            return Err(AssemblyError::Invalid(format!(
                "candidate for height {h} links to a different previous block"
            )));
        }

        let header = DirectoryBlockHeader {
            version: self.version,
            network_id: self.network_id,
            db_height: h,
            body_mr: merkle_root(body_leaves(&candidate)),
            prev_key_mr,
            timestamp: candidate.timestamp,
            block_count: candidate.entry_blocks.len() as u32 + 3,
        };
        Ok(SealedBlock {
            header,
            body: candidate,
        })
    }
}
