//! # RocksDB Chain Store
//!
//! Persistent [`ChainStore`] on RocksDB.
//!
//! ## Column Families
//!
//! - `entries` - entry payloads by entry hash
//! - `dblocks` - sealed directory blocks by big-endian height
//! - `eblock_heads` - entry chain heads by chain id
//! - `metadata` - highest saved height
//!
//! Values are bincode. A sealed block, the chain heads it advances and the
//! highest saved height are written in one batch.

use fc_consensus::domain::{DirectoryBlockHeader, EntryBlockHead, SealedBlock};
use fc_consensus::ports::ChainStore;
use parking_lot::RwLock;
use rocksdb::{ColumnFamily, ColumnFamilyDescriptor, Options, WriteBatch, DB};
use serde::de::DeserializeOwned;
use serde::Serialize;
use shared_types::{ChainId, Entry, Hash, StoreError};
use std::sync::Arc;

pub const CF_ENTRIES: &str = "entries";
pub const CF_DBLOCKS: &str = "dblocks";
pub const CF_EBLOCK_HEADS: &str = "eblock_heads";
pub const CF_METADATA: &str = "metadata";

pub const COLUMN_FAMILIES: &[&str] = &[CF_ENTRIES, CF_DBLOCKS, CF_EBLOCK_HEADS, CF_METADATA];

const KEY_HIGHEST_SAVED: &[u8] = b"highest_saved";

/// RocksDB tuning.
#[derive(Debug, Clone)]
pub struct RocksDbConfig {
    pub path: String,
    /// Block cache size in bytes (default: 256MB)
    pub block_cache_size: usize,
    /// Write buffer size in bytes (default: 64MB)
    pub write_buffer_size: usize,
    pub max_write_buffer_number: i32,
    /// fsync after each write
    pub sync_writes: bool,
}

impl Default for RocksDbConfig {
    fn default() -> Self {
        Self {
            path: "./data/chain".to_string(),
            block_cache_size: 256 * 1024 * 1024,
            write_buffer_size: 64 * 1024 * 1024,
            max_write_buffer_number: 3,
            sync_writes: true,
        }
    }
}

impl RocksDbConfig {
    /// Small buffers, no fsync.
    pub fn for_testing(path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            block_cache_size: 8 * 1024 * 1024,
            write_buffer_size: 4 * 1024 * 1024,
            max_write_buffer_number: 2,
            sync_writes: false,
        }
    }
}

pub struct RocksDbChainStore {
    db: Arc<RwLock<DB>>,
    config: RocksDbConfig,
}

impl RocksDbChainStore {
    /// Open or create the database with all column families.
    pub fn open(config: RocksDbConfig) -> Result<Self, StoreError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.create_missing_column_families(true);
        opts.set_write_buffer_size(config.write_buffer_size);
        opts.set_max_write_buffer_number(config.max_write_buffer_number);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);

        let mut block_opts = rocksdb::BlockBasedOptions::default();
        block_opts.set_bloom_filter(10.0, false);
        block_opts.set_block_cache(&rocksdb::Cache::new_lru_cache(config.block_cache_size));
        opts.set_block_based_table_factory(&block_opts);

        let cf_descriptors: Vec<ColumnFamilyDescriptor> = COLUMN_FAMILIES
            .iter()
            .map(|name| {
                let mut cf_opts = Options::default();
                cf_opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
                ColumnFamilyDescriptor::new(*name, cf_opts)
            })
            .collect();

        let db = DB::open_cf_descriptors(&opts, &config.path, cf_descriptors).map_err(|e| {
            StoreError::Io {
                message: format!("Failed to open RocksDB: {}", e),
            }
        })?;

        Ok(Self {
            db: Arc::new(RwLock::new(db)),
            config,
        })
    }

    fn write_options(&self) -> rocksdb::WriteOptions {
        let mut write_opts = rocksdb::WriteOptions::default();
        write_opts.set_sync(self.config.sync_writes);
        write_opts
    }

    fn get<T: DeserializeOwned>(&self, cf: &str, key: &[u8]) -> Result<Option<T>, StoreError> {
        let db = self.db.read();
        let raw = db
            .get_cf(column(&db, cf)?, key)
            .map_err(|e| io_error("get", e))?;
        raw.map(|bytes| decode(cf, key, &bytes)).transpose()
    }
}

fn column<'a>(db: &'a DB, name: &str) -> Result<&'a ColumnFamily, StoreError> {
    db.cf_handle(name).ok_or_else(|| StoreError::Io {
        message: format!("Missing column family {}", name),
    })
}

fn io_error(op: &str, e: rocksdb::Error) -> StoreError {
    StoreError::Io {
        message: format!("RocksDB {} failed: {}", op, e),
    }
}

fn encode<T: Serialize>(cf: &str, key: &[u8], value: &T) -> Result<Vec<u8>, StoreError> {
    bincode::serialize(value).map_err(|e| StoreError::Corrupt {
        key: format!("{}/{}", cf, hex::encode(key)),
        message: e.to_string(),
    })
}

fn decode<T: DeserializeOwned>(cf: &str, key: &[u8], bytes: &[u8]) -> Result<T, StoreError> {
    bincode::deserialize(bytes).map_err(|e| StoreError::Corrupt {
        key: format!("{}/{}", cf, hex::encode(key)),
        message: e.to_string(),
    })
}

impl ChainStore for RocksDbChainStore {
    fn fetch_entry(&self, entry_hash: &Hash) -> Result<Option<Entry>, StoreError> {
        self.get(CF_ENTRIES, entry_hash)
    }

    fn insert_entry(&self, entry: &Entry) -> Result<(), StoreError> {
        let key = entry.hash();
        let value = encode(CF_ENTRIES, &key, entry)?;
        let db = self.db.write();
        db.put_cf_opt(column(&db, CF_ENTRIES)?, key, value, &self.write_options())
            .map_err(|e| io_error("put", e))
    }

    fn has_entry(&self, entry_hash: &Hash) -> Result<bool, StoreError> {
        let db = self.db.read();
        db.get_pinned_cf(column(&db, CF_ENTRIES)?, entry_hash)
            .map(|v| v.is_some())
            .map_err(|e| io_error("exists check", e))
    }

    fn fetch_dblock_header(
        &self,
        db_height: u32,
    ) -> Result<Option<DirectoryBlockHeader>, StoreError> {
        Ok(self.fetch_dblock(db_height)?.map(|block| block.header))
    }

    fn fetch_dblock(&self, db_height: u32) -> Result<Option<SealedBlock>, StoreError> {
        self.get(CF_DBLOCKS, &db_height.to_be_bytes())
    }

    fn save_dblock(&self, block: &SealedBlock) -> Result<(), StoreError> {
        let height_key = block.db_height().to_be_bytes();
        let db = self.db.write();
        let mut batch = WriteBatch::default();

        batch.put_cf(
            column(&db, CF_DBLOCKS)?,
            height_key,
            encode(CF_DBLOCKS, &height_key, block)?,
        );
        let heads = column(&db, CF_EBLOCK_HEADS)?;
        for eblock in &block.body.entry_blocks {
            let head = EntryBlockHead {
                key_mr: eblock.key_mr(),
                sequence: eblock.sequence,
            };
            batch.put_cf(heads, eblock.chain_id, encode(CF_EBLOCK_HEADS, &eblock.chain_id, &head)?);
        }

        let metadata = column(&db, CF_METADATA)?;
        let highest = db
            .get_cf(metadata, KEY_HIGHEST_SAVED)
            .map_err(|e| io_error("get", e))?
            .map(|bytes| decode::<u32>(CF_METADATA, KEY_HIGHEST_SAVED, &bytes))
            .transpose()?;
        if highest.map_or(true, |h| block.db_height() > h) {
            batch.put_cf(
                metadata,
                KEY_HIGHEST_SAVED,
                encode(CF_METADATA, KEY_HIGHEST_SAVED, &block.db_height())?,
            );
        }

        db.write_opt(batch, &self.write_options())
            .map_err(|e| io_error("batch write", e))
    }

    fn fetch_eblock_head(&self, chain_id: &ChainId) -> Result<Option<EntryBlockHead>, StoreError> {
        self.get(CF_EBLOCK_HEADS, chain_id)
    }

    fn highest_saved_height(&self) -> Result<Option<u32>, StoreError> {
        self.get(CF_METADATA, KEY_HIGHEST_SAVED)
    }
}
