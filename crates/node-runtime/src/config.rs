//! # Node Configuration
//!
//! Engine, identity, storage, runtime and logging settings. Defaults are
//! overlaid by a JSON file named in `FC_CONFIG` and then by `FC_*` variables.
//!
//! ## Environment Variables
//!
//! - `FC_BLOCK_SECONDS`, `FC_START_DELAY_MS`: engine timing
//! - `FC_IDENTITY`, `FC_SALT`, `FC_SIGNING_KEY`: hex, 32 bytes each
//! - `FC_NETWORK_ID`: network id stamped on sealed blocks
//! - `FC_FEDERATED`, `FC_AUDIT`: `id:pubkey,id:pubkey` hex pairs
//! - `FC_DATA_DIR`, `FC_STORAGE_BACKEND` (`memory` | `rocksdb`)
//! - `FC_TICK_INTERVAL_MS`
//! - `FC_LOG_LEVEL` or `RUST_LOG`, `FC_JSON_LOGS`

use crate::genesis::GenesisConfig;
use crate::telemetry::TelemetryConfig;
use fc_consensus::adapters::Ed25519Signer;
use fc_consensus::domain::{AuthoritySet, ServerEntry};
use fc_consensus::ports::LocalSigner;
use fc_consensus::{ConsensusConfig, NodeIdentity};
use serde::{Deserialize, Serialize};
use shared_types::{sha256, Hash};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tracing::warn;

/// Complete node configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeConfig {
    pub consensus: ConsensusConfig,
    pub identity: IdentityConfig,
    pub genesis: GenesisConfig,
    pub storage: StorageConfig,
    pub runtime: RuntimeConfig,
    pub telemetry: TelemetryConfig,
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(transparent)]
    Consensus(#[from] fc_consensus::ConfigError),

    #[error("{field} is not 32 bytes of hex: {reason}")]
    InvalidHex { field: String, reason: String },

    #[error("{var} has an invalid value {value:?}")]
    InvalidValue { var: &'static str, value: String },

    #[error("server list entry {0:?} is not of the form id:pubkey")]
    InvalidServer(String),

    #[error("storage backend rocksdb requires the `rocksdb` feature")]
    RocksDbUnavailable,

    #[error("{field} must be non-zero")]
    ZeroValue { field: &'static str },

    #[error("invalid genesis: {0}")]
    Genesis(String),

    #[error("failed to read {path}: {reason}")]
    Read { path: PathBuf, reason: String },
}

/// Server identity and the authority set at height 0.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// Identity chain id, hex. Derived from the signing key when empty.
    pub chain_id: String,
    /// Node salt, hex. Random when empty.
    pub salt: String,
    /// Ed25519 seed, hex. A throwaway key is generated when empty.
    pub signing_key: String,
    pub network_id: u32,
    /// Federated servers at height 0. Empty means this node alone.
    pub federated: Vec<ServerConfig>,
    pub audit: Vec<ServerConfig>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Identity chain id, hex.
    pub id: String,
    /// Ed25519 public key, hex.
    pub signing_key: String,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageBackend {
    #[default]
    Memory,
    RocksDb,
}

/// Storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub data_dir: PathBuf,
    pub backend: StorageBackend,
    /// Warn when free disk space under `data_dir` drops below this percentage.
    pub min_disk_space_percent: u8,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            backend: StorageBackend::Memory,
            min_disk_space_percent: 5,
        }
    }
}

/// Worker pacing and channel sizes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Period of the validator tick.
    pub tick_interval_ms: u64,
    /// Capacity of the network inbound, gossip and request channels.
    pub channel_capacity: usize,
    /// Base period of the entry-sync scan.
    pub entry_sync_interval_ms: u64,
    /// Ceiling of the entry-sync retry backoff.
    pub entry_sync_max_backoff_ms: u64,
    /// Time given to workers to finish after the shutdown signal.
    pub shutdown_grace_ms: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 10,
            channel_capacity: 10_000,
            entry_sync_interval_ms: 1_000,
            entry_sync_max_backoff_ms: 60_000,
            shutdown_grace_ms: 2_000,
        }
    }
}

impl RuntimeConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

/// Signer, identity and authorities resolved from [`IdentityConfig`].
pub struct ResolvedIdentity {
    pub signer: Ed25519Signer,
    pub identity: NodeIdentity,
    pub authorities: AuthoritySet,
}

impl NodeConfig {
    /// Defaults, then `FC_CONFIG`, then `FC_*` variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = match std::env::var("FC_CONFIG") {
            Ok(path) => Self::from_file(Path::new(&path))?,
            Err(_) => Self::default(),
        };
        config.apply_overrides(|var| std::env::var(var).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let read_error = |reason: String| ConfigError::Read {
            path: path.to_path_buf(),
            reason,
        };
        let raw = std::fs::read_to_string(path).map_err(|e| read_error(e.to_string()))?;
        serde_json::from_str(&raw).map_err(|e| read_error(e.to_string()))
    }

    /// Applies overrides from `lookup`, which maps a variable name to its value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(value) = lookup("FC_BLOCK_SECONDS") {
            self.consensus.block_seconds = parse_number("FC_BLOCK_SECONDS", &value)?;
        }
        if let Some(value) = lookup("FC_START_DELAY_MS") {
            self.consensus.start_delay_ms = parse_number("FC_START_DELAY_MS", &value)?;
        }
        if let Some(value) = lookup("FC_IDENTITY") {
            self.identity.chain_id = value;
        }
        if let Some(value) = lookup("FC_SALT") {
            self.identity.salt = value;
        }
        if let Some(value) = lookup("FC_SIGNING_KEY") {
            self.identity.signing_key = value;
        }
        if let Some(value) = lookup("FC_NETWORK_ID") {
            self.identity.network_id = parse_number("FC_NETWORK_ID", &value)?;
        }
        if let Some(value) = lookup("FC_FEDERATED") {
            self.identity.federated = parse_server_list(&value)?;
        }
        if let Some(value) = lookup("FC_AUDIT") {
            self.identity.audit = parse_server_list(&value)?;
        }
        if let Some(value) = lookup("FC_DATA_DIR") {
            self.storage.data_dir = PathBuf::from(value);
        }
        if let Some(value) = lookup("FC_STORAGE_BACKEND") {
            self.storage.backend = match value.to_lowercase().as_str() {
                "memory" => StorageBackend::Memory,
                "rocksdb" => StorageBackend::RocksDb,
                _ => {
                    return Err(ConfigError::InvalidValue {
                        var: "FC_STORAGE_BACKEND",
                        value,
                    })
                }
            };
        }
        if let Some(value) = lookup("FC_TICK_INTERVAL_MS") {
            self.runtime.tick_interval_ms = parse_number("FC_TICK_INTERVAL_MS", &value)?;
        }
        self.telemetry.apply_overrides(&lookup);
        Ok(())
    }

    /// Checks the engine settings, every hex field and the storage backend.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.consensus.validate()?;
        if self.runtime.tick_interval_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "tick_interval_ms",
            });
        }
        if self.runtime.channel_capacity == 0 {
            return Err(ConfigError::ZeroValue {
                field: "channel_capacity",
            });
        }
        if self.storage.backend == StorageBackend::RocksDb && !cfg!(feature = "rocksdb") {
            return Err(ConfigError::RocksDbUnavailable);
        }
        parse_optional_hash("identity.chain_id", &self.identity.chain_id)?;
        parse_optional_hash("identity.salt", &self.identity.salt)?;
        parse_optional_hash("identity.signing_key", &self.identity.signing_key)?;
        for server in self.identity.federated.iter().chain(&self.identity.audit) {
            server_entry(server)?;
        }
        self.genesis
            .validate()
            .map_err(|e| ConfigError::Genesis(e.to_string()))
    }

    /// Builds the signer, the node identity and the height-0 authority set.
    pub fn resolve_identity(&self) -> Result<ResolvedIdentity, ConfigError> {
        let signer = match parse_optional_hash("identity.signing_key", &self.identity.signing_key)? {
            Some(seed) => Ed25519Signer::from_seed(seed),
            None => {
                warn!("No signing key configured, using a throwaway key");
                Ed25519Signer::generate()
            }
        };
        let public_key = signer.public_key();
        let chain_id = parse_optional_hash("identity.chain_id", &self.identity.chain_id)?
            .unwrap_or_else(|| sha256(&public_key));
        let salt = parse_optional_hash("identity.salt", &self.identity.salt)?
            .unwrap_or_else(rand::random);

        let mut federated = self
            .identity
            .federated
            .iter()
            .map(server_entry)
            .collect::<Result<Vec<_>, _>>()?;
        if federated.is_empty() {
            federated.push(ServerEntry {
                id: chain_id,
                signing_key: public_key,
            });
        }
        let audit = self
            .identity
            .audit
            .iter()
            .map(server_entry)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ResolvedIdentity {
            signer,
            identity: NodeIdentity { chain_id, salt },
            authorities: AuthoritySet::new(federated, audit),
        })
    }
}

fn parse_number<T: std::str::FromStr>(var: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        var,
        value: value.to_string(),
    })
}

/// Parses 32 bytes of hex; the empty string is `None`.
fn parse_optional_hash(field: &str, value: &str) -> Result<Option<Hash>, ConfigError> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    parse_hash(field, value).map(Some)
}

pub(crate) fn parse_hash(field: &str, value: &str) -> Result<Hash, ConfigError> {
    let invalid = |reason: String| ConfigError::InvalidHex {
        field: field.to_string(),
        reason,
    };
    let bytes = hex::decode(value.trim()).map_err(|e| invalid(e.to_string()))?;
    bytes
        .try_into()
        .map_err(|bytes: Vec<u8>| invalid(format!("got {} bytes", bytes.len())))
}

fn parse_server_list(value: &str) -> Result<Vec<ServerConfig>, ConfigError> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(|item| {
            let (id, key) = item
                .split_once(':')
                .ok_or_else(|| ConfigError::InvalidServer(item.to_string()))?;
            Ok(ServerConfig {
                id: id.to_string(),
                signing_key: key.to_string(),
            })
        })
        .collect()
}

fn server_entry(server: &ServerConfig) -> Result<ServerEntry, ConfigError> {
    Ok(ServerEntry {
        id: parse_hash("server id", &server.id)?,
        signing_key: parse_hash("server signing key", &server.signing_key)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_default_config_is_valid() {
        assert!(NodeConfig::default().validate().is_ok());
    }

    #[test]
    fn test_overrides_applied() {
        let mut config = NodeConfig::default();
        let id = hex::encode([1u8; 32]);
        let key = hex::encode([2u8; 32]);
        config
            .apply_overrides(lookup(&[
                ("FC_BLOCK_SECONDS", "60"),
                ("FC_FEDERATED", &format!("{id}:{key}, {key}:{id}")),
                ("FC_STORAGE_BACKEND", "Memory"),
                ("FC_DATA_DIR", "/tmp/fc"),
            ]))
            .unwrap();

        assert_eq!(config.consensus.block_seconds, 60);
        assert_eq!(config.identity.federated.len(), 2);
        assert_eq!(config.identity.federated[0].id, id);
        assert_eq!(config.storage.data_dir, PathBuf::from("/tmp/fc"));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_bad_number_rejected() {
        let mut config = NodeConfig::default();
        let err = config
            .apply_overrides(lookup(&[("FC_BLOCK_SECONDS", "ten")]))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue {
                var: "FC_BLOCK_SECONDS",
                ..
            }
        ));
    }

    #[test]
    fn test_short_hex_rejected() {
        let mut config = NodeConfig::default();
        config.identity.salt = "abcd".to_string();
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidHex { .. })
        ));
    }

    #[test]
    fn test_engine_settings_validated() {
        let mut config = NodeConfig::default();
        config.consensus.block_seconds = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Consensus(_))));
    }

    #[test]
    fn test_single_node_authorities() {
        let mut config = NodeConfig::default();
        config.identity.signing_key = hex::encode([7u8; 32]);
        let resolved = config.resolve_identity().unwrap();

        let expected_key = Ed25519Signer::from_seed([7u8; 32]).public_key();
        assert_eq!(resolved.identity.chain_id, sha256(&expected_key));
        assert_eq!(resolved.authorities.federated_count(), 1);
        assert!(resolved
            .authorities
            .is_federated(&resolved.identity.chain_id));
    }

    #[test]
    fn test_config_from_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("node.json");
        std::fs::write(
            &path,
            r#"{"consensus": {"block_seconds": 120}, "storage": {"backend": "memory"}}"#,
        )
        .unwrap();

        let config = NodeConfig::from_file(&path).unwrap();
        assert_eq!(config.consensus.block_seconds, 120);
        assert_eq!(config.consensus.start_delay_ms, 10_000);
        assert_eq!(config.runtime.tick_interval_ms, 10);
    }
}
