//! Driven ports (outbound dependencies)
//!
//! The engine is a synchronous state machine driven by one task, so these
//! ports are plain `Send + Sync` traits. Best-effort sinks must not block:
//! adapters drop on a full channel.

use crate::domain::{
    AuthoritySet, BlockCandidate, BlockWithEntries, DirectoryBlockHeader, EntryBlockHead, Message,
    SealedBlock,
};
use shared_types::{
    ChainId, Entry, FullSignature, Hash, OracleError, PublicKey, StoreError, Timestamp,
};
use std::sync::Arc;
use thiserror::Error;

/// Fire-and-forget gossip of messages to peers.
pub trait BroadcastSink: Send + Sync {
    fn broadcast(&self, msg: &Arc<Message>);
}

/// Receives each definitively invalid message once.
pub trait InvalidMessageSink: Send + Sync {
    fn reject(&self, msg: &Arc<Message>);
}

/// Persistent chain database.
pub trait ChainStore: Send + Sync {
    fn fetch_entry(&self, entry_hash: &Hash) -> Result<Option<Entry>, StoreError>;

    fn insert_entry(&self, entry: &Entry) -> Result<(), StoreError>;

    fn has_entry(&self, entry_hash: &Hash) -> Result<bool, StoreError> {
        Ok(self.fetch_entry(entry_hash)?.is_some())
    }

    fn fetch_dblock_header(&self, db_height: u32)
        -> Result<Option<DirectoryBlockHeader>, StoreError>;

    fn fetch_dblock(&self, db_height: u32) -> Result<Option<SealedBlock>, StoreError>;

    /// Entry hashes referenced by the block at `db_height`.
    fn fetch_dblock_entries(&self, db_height: u32) -> Result<Vec<Hash>, StoreError> {
        Ok(self
            .fetch_dblock(db_height)?
            .map(|block| block.entry_hashes())
            .unwrap_or_default())
    }

    /// Saves a sealed block and advances the heads of its entry chains.
    fn save_dblock(&self, block: &SealedBlock) -> Result<(), StoreError>;

    fn fetch_eblock_head(&self, chain_id: &ChainId) -> Result<Option<EntryBlockHead>, StoreError>;

    fn highest_saved_height(&self) -> Result<Option<u32>, StoreError>;
}

/// Verifies that a signature was made by a federated server.
pub trait AuthorityOracle: Send + Sync {
    /// `Ok(false)` for a signature that does not verify or a key that is not
    /// federated at `db_height`.
    fn verify_authority_signature(
        &self,
        data: &[u8],
        signature: &FullSignature,
        db_height: u32,
    ) -> Result<bool, OracleError>;

    /// Mirrors the engine's authority set for `db_height`.
    fn update_authorities(&self, db_height: u32, authorities: &AuthoritySet);
}

/// This node's signing key.
pub trait LocalSigner: Send + Sync {
    fn public_key(&self) -> PublicKey;

    fn sign(&self, data: &[u8]) -> FullSignature;
}

/// What a missing-message request asks peers for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MissingRequest {
    Entry { entry_hash: Hash, db_height: u32 },
    Message { msg_hash: Hash, db_height: u32 },
    Slot { db_height: u32, vm_index: usize, height: usize },
}

/// Outbound missing-message / missing-data requests.
pub trait MissingMessageRequester: Send + Sync {
    fn request(&self, request: MissingRequest);
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AssemblyError {
    #[error("missing previous block header for height {0}")]
    MissingPrevious(u32),

    #[error("{0}")]
    Invalid(String),
}

/// Turns a process list's contents into a sealed directory block.
pub trait BlockAssembler: Send + Sync {
    fn seal(
        &self,
        candidate: BlockCandidate,
        previous: Option<&DirectoryBlockHeader>,
    ) -> Result<SealedBlock, AssemblyError>;
}

/// Hand-off to the write-back worker. Never blocks and never drops.
pub trait WriteBack: Send + Sync {
    fn write_entry(&self, entry: Entry);

    fn write_block(&self, block: BlockWithEntries);
}

/// Time source
pub trait TimeSource: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Default time source using system time
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
    fn now(&self) -> Timestamp {
        let millis = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis();
        Timestamp::from_millis(millis as u64)
    }
}
