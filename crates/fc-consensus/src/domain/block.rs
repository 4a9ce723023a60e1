//! Block-level records produced from a process list.
//!
//! The binary block formats are owned by the block assembler; this module only
//! carries the pieces the engine builds up minute by minute and the header the
//! assembler hands back.

use super::authority::AdminChange;
use super::message::FactoidTransaction;
use serde::{Deserialize, Serialize};
use shared_types::{canonical_bytes, hash_of, Address, ChainId, Entry, Hash, Timestamp};

/// Header of a sealed directory block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryBlockHeader {
    pub version: u8,
    pub network_id: u32,
    pub db_height: u32,
    /// Merkle root of the block body.
    pub body_mr: Hash,
    /// Key merkle root of the previous directory block.
    pub prev_key_mr: Hash,
    pub timestamp: Timestamp,
    pub block_count: u32,
}

impl DirectoryBlockHeader {
    /// Bytes DBSig signatures are taken over.
    pub fn marshal(&self) -> Vec<u8> {
        canonical_bytes(self)
    }

    /// Key merkle root identifying this block to its successor.
    pub fn key_mr(&self) -> Hash {
        hash_of(self)
    }
}

/// One record of an entry block: an entry hash or an end-of-minute marker.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryBlockItem {
    Entry(Hash),
    MinuteMarker(u8),
}

/// Entries appended to one chain during one directory block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBlock {
    pub chain_id: ChainId,
    pub db_height: u32,
    pub sequence: u32,
    pub prev_key_mr: Hash,
    pub items: Vec<EntryBlockItem>,
}

impl EntryBlock {
    pub fn new(chain_id: ChainId, db_height: u32) -> Self {
        Self {
            chain_id,
            db_height,
            sequence: 0,
            prev_key_mr: [0u8; 32],
            items: Vec::new(),
        }
    }

    /// Next block of a chain whose previous head is `prev`.
    pub fn following(prev_key_mr: Hash, prev_sequence: u32, chain_id: ChainId, db_height: u32) -> Self {
        Self {
            chain_id,
            db_height,
            sequence: prev_sequence + 1,
            prev_key_mr,
            items: Vec::new(),
        }
    }

    pub fn add_entry(&mut self, entry_hash: Hash) {
        self.items.push(EntryBlockItem::Entry(entry_hash));
    }

    /// Closes `minute` (1-based) unless the last record already does.
    pub fn add_end_of_minute(&mut self, minute: u8) {
        if self.items.last() != Some(&EntryBlockItem::MinuteMarker(minute)) {
            self.items.push(EntryBlockItem::MinuteMarker(minute));
        }
    }

    pub fn entry_hashes(&self) -> impl Iterator<Item = &Hash> {
        self.items.iter().filter_map(|item| match item {
            EntryBlockItem::Entry(hash) => Some(hash),
            EntryBlockItem::MinuteMarker(_) => None,
        })
    }

    pub fn key_mr(&self) -> Hash {
        hash_of(self)
    }
}

/// Head of an entry chain as stored.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryBlockHead {
    pub key_mr: Hash,
    pub sequence: u32,
}

/// Records of the entry-credit block.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EcRecord {
    CommitChain {
        entry_hash: Hash,
        chain_id: ChainId,
        ec_address: Address,
        credits: u8,
    },
    CommitEntry {
        entry_hash: Hash,
        ec_address: Address,
        credits: u8,
    },
    MinuteNumber(u8),
}

/// Everything a process list contributes to its directory block.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockCandidate {
    pub db_height: u32,
    pub prev_key_mr: Hash,
    /// Coinbase timestamp agreed in the DBSig round.
    pub timestamp: Timestamp,
    pub entry_blocks: Vec<EntryBlock>,
    pub ec_records: Vec<EcRecord>,
    pub factoid_transactions: Vec<FactoidTransaction>,
    /// Number of factoid transactions at the close of each minute.
    pub factoid_period_ends: Vec<usize>,
    pub admin_changes: Vec<AdminChange>,
}

/// A sealed directory block: the assembled header and its body.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedBlock {
    pub header: DirectoryBlockHeader,
    pub body: BlockCandidate,
}

impl SealedBlock {
    pub fn db_height(&self) -> u32 {
        self.header.db_height
    }

    /// Entry hashes referenced by every entry block of the body.
    pub fn entry_hashes(&self) -> Vec<Hash> {
        self.body
            .entry_blocks
            .iter()
            .flat_map(|eb| eb.entry_hashes().copied())
            .collect()
    }
}

/// A sealed block together with the entry payloads it references.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockWithEntries {
    pub block: SealedBlock,
    pub entries: Vec<Entry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_minute_marker_not_duplicated() {
        let mut eb = EntryBlock::new([1u8; 32], 5);
        eb.add_entry([2u8; 32]);
        eb.add_end_of_minute(1);
        eb.add_end_of_minute(1);
        eb.add_end_of_minute(2);
        assert_eq!(eb.items.len(), 3);
        assert_eq!(eb.entry_hashes().count(), 1);
    }

    #[test]
    fn test_following_block_links_to_head() {
        let first = EntryBlock::new([1u8; 32], 5);
        let next = EntryBlock::following(first.key_mr(), first.sequence, [1u8; 32], 6);
        assert_eq!(next.sequence, 1);
        assert_eq!(next.prev_key_mr, first.key_mr());
    }
}
