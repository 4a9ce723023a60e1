//! Chain store selection.
//!
//! - `memory`: [`InMemoryChainStore`], lost on exit
//! - `rocksdb`: [`RocksDbChainStore`] under `<data_dir>/chain` (feature `rocksdb`)

#[cfg(feature = "rocksdb")]
mod rocksdb_store;

#[cfg(feature = "rocksdb")]
pub use rocksdb_store::*;

use crate::config::{StorageBackend, StorageConfig};
use fc_consensus::adapters::InMemoryChainStore;
use fc_consensus::ports::ChainStore;
use shared_types::StoreError;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};

/// Opens the configured backend.
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn ChainStore>, StoreError> {
    match config.backend {
        StorageBackend::Memory => {
            info!("Using in-memory chain store");
            Ok(Arc::new(InMemoryChainStore::new()))
        }
        StorageBackend::RocksDb => open_rocksdb(config),
    }
}

#[cfg(feature = "rocksdb")]
fn open_rocksdb(config: &StorageConfig) -> Result<Arc<dyn ChainStore>, StoreError> {
    std::fs::create_dir_all(&config.data_dir).map_err(|e| StoreError::Io {
        message: format!("Failed to create {}: {}", config.data_dir.display(), e),
    })?;
    check_disk_space(&config.data_dir, config.min_disk_space_percent)?;

    let path = config.data_dir.join("chain");
    info!(path = %path.display(), "Opening RocksDB chain store");
    let store = RocksDbChainStore::open(RocksDbConfig {
        path: path.to_string_lossy().to_string(),
        ..Default::default()
    })?;
    Ok(Arc::new(store))
}

#[cfg(not(feature = "rocksdb"))]
fn open_rocksdb(_config: &StorageConfig) -> Result<Arc<dyn ChainStore>, StoreError> {
    Err(StoreError::Io {
        message: "built without the rocksdb feature".to_string(),
    })
}

/// Free space under `path` as a percentage, warning below `min_percent`.
pub fn check_disk_space(path: &Path, min_percent: u8) -> Result<u8, StoreError> {
    let io_error = |e: std::io::Error| StoreError::Io {
        message: e.to_string(),
    };
    let available = fs2::available_space(path).map_err(io_error)?;
    let total = fs2::total_space(path).map_err(io_error)?;
    if total == 0 {
        return Err(StoreError::Io {
            message: "Unable to determine disk space".to_string(),
        });
    }

    let percent = ((available as f64 / total as f64) * 100.0) as u8;
    if percent < min_percent {
        warn!(
            path = %path.display(),
            percent,
            min_percent,
            "Low disk space under data directory"
        );
    }
    Ok(percent)
}
