//! In-memory chain store
//!
//! Implements the ChainStore port over `parking_lot` maps. Used by tests and
//! by nodes started with the memory storage backend.

use crate::domain::{DirectoryBlockHeader, EntryBlockHead, SealedBlock};
use crate::ports::ChainStore;
use parking_lot::RwLock;
use shared_types::{ChainId, Entry, Hash, StoreError};
use std::collections::{BTreeMap, HashMap};

pub struct InMemoryChainStore {
    entries: RwLock<HashMap<Hash, Entry>>,
    blocks: RwLock<BTreeMap<u32, SealedBlock>>,
    eblock_heads: RwLock<HashMap<ChainId, EntryBlockHead>>,
}

impl InMemoryChainStore {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            blocks: RwLock::new(BTreeMap::new()),
            eblock_heads: RwLock::new(HashMap::new()),
        }
    }

    pub fn entry_count(&self) -> usize {
        self.entries.read().len()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.read().len()
    }

    /// Saved blocks in height order, e.g. to replay them as DBStates.
    pub fn blocks(&self) -> Vec<SealedBlock> {
        self.blocks.read().values().cloned().collect()
    }
}

impl Default for InMemoryChainStore {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainStore for InMemoryChainStore {
    fn fetch_entry(&self, entry_hash: &Hash) -> Result<Option<Entry>, StoreError> {
        Ok(self.entries.read().get(entry_hash).cloned())
    }

    fn insert_entry(&self, entry: &Entry) -> Result<(), StoreError> {
        self.entries.write().insert(entry.hash(), entry.clone());
        Ok(())
    }

    fn has_entry(&self, entry_hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.entries.read().contains_key(entry_hash))
    }

    fn fetch_dblock_header(
        &self,
        db_height: u32,
    ) -> Result<Option<DirectoryBlockHeader>, StoreError> {
        Ok(self
            .blocks
            .read()
            .get(&db_height)
            .map(|block| block.header.clone()))
    }

    fn fetch_dblock(&self, db_height: u32) -> Result<Option<SealedBlock>, StoreError> {
        Ok(self.blocks.read().get(&db_height).cloned())
    }

    fn save_dblock(&self, block: &SealedBlock) -> Result<(), StoreError> {
        let mut heads = self.eblock_heads.write();
        for eblock in &block.body.entry_blocks {
            heads.insert(
                eblock.chain_id,
                EntryBlockHead {
                    key_mr: eblock.key_mr(),
                    sequence: eblock.sequence,
                },
            );
        }
        self.blocks.write().insert(block.db_height(), block.clone());
        Ok(())
    }

    fn fetch_eblock_head(&self, chain_id: &ChainId) -> Result<Option<EntryBlockHead>, StoreError> {
        Ok(self.eblock_heads.read().get(chain_id).cloned())
    }

    fn highest_saved_height(&self) -> Result<Option<u32>, StoreError> {
        Ok(self.blocks.read().keys().next_back().copied())
    }
}
