//! # Genesis Block Builder
//!
//! Seals directory block 0 when the store is empty. Every node of a network
//! must use the same genesis settings or their chains diverge at height 1.

use crate::config::{parse_hash, ConfigError};
use fc_consensus::adapters::HashChainAssembler;
use fc_consensus::domain::{BlockCandidate, FactoidTransaction, SealedBlock, TxAmount};
use fc_consensus::ports::{AssemblyError, BlockAssembler};
use serde::{Deserialize, Serialize};
use shared_types::{Address, Timestamp, ZERO_HASH};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GenesisError {
    #[error("Invalid genesis configuration: {0}")]
    InvalidConfig(String),

    #[error(transparent)]
    Address(#[from] ConfigError),

    #[error("Failed to seal genesis block: {0}")]
    Assembly(#[from] AssemblyError),
}

/// A balance credited by the genesis coinbase.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FundingConfig {
    /// Address, hex.
    pub address: String,
    pub amount: u64,
}

/// Genesis block configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GenesisConfig {
    /// Genesis timestamp (Unix seconds).
    pub timestamp_secs: u64,
    /// Factoshis credited at height 0.
    pub factoid_funding: Vec<FundingConfig>,
    /// Entry credits credited at height 0.
    pub ec_funding: Vec<FundingConfig>,
}

impl Default for GenesisConfig {
    fn default() -> Self {
        Self {
            timestamp_secs: 1_700_000_000,
            factoid_funding: Vec::new(),
            ec_funding: Vec::new(),
        }
    }
}

impl GenesisConfig {
    pub fn validate(&self) -> Result<(), GenesisError> {
        for funding in self.factoid_funding.iter().chain(&self.ec_funding) {
            if funding.amount == 0 {
                return Err(GenesisError::InvalidConfig(format!(
                    "zero funding for {}",
                    funding.address
                )));
            }
            parse_address(&funding.address)?;
        }
        Ok(())
    }
}

fn parse_address(hex_address: &str) -> Result<Address, ConfigError> {
    parse_hash("genesis address", hex_address)
}

pub struct GenesisBuilder {
    config: GenesisConfig,
    network_id: u32,
}

impl GenesisBuilder {
    pub fn new(config: GenesisConfig, network_id: u32) -> Self {
        Self { config, network_id }
    }

    pub fn build(self) -> Result<SealedBlock, GenesisError> {
        self.config.validate()?;
        let timestamp = Timestamp::from_secs(self.config.timestamp_secs);

        let amounts = |funding: &[FundingConfig]| -> Result<Vec<TxAmount>, GenesisError> {
            funding
                .iter()
                .map(|f| {
                    Ok(TxAmount {
                        address: parse_address(&f.address)?,
                        amount: f.amount,
                    })
                })
                .collect()
        };
        let outputs = amounts(&self.config.factoid_funding)?;
        let ec_outputs = amounts(&self.config.ec_funding)?;
        let factoid_transactions = if outputs.is_empty() && ec_outputs.is_empty() {
            Vec::new()
        } else {
            vec![FactoidTransaction {
                timestamp,
                inputs: Vec::new(),
                outputs,
                ec_outputs,
            }]
        };

        let candidate = BlockCandidate {
            db_height: 0,
            prev_key_mr: ZERO_HASH,
            timestamp,
            factoid_transactions,
            ..Default::default()
        };
        Ok(HashChainAssembler::new(self.network_id).seal(candidate, None)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn funded() -> GenesisConfig {
        GenesisConfig {
            factoid_funding: vec![FundingConfig {
                address: hex::encode([0xF0u8; 32]),
                amount: 5_000,
            }],
            ..Default::default()
        }
    }

    #[test]
    fn test_genesis_deterministic() {
        let a = GenesisBuilder::new(funded(), 7).build().unwrap();
        let b = GenesisBuilder::new(funded(), 7).build().unwrap();
        assert_eq!(a.header.key_mr(), b.header.key_mr());
        assert_eq!(a.db_height(), 0);
        assert_eq!(a.header.prev_key_mr, ZERO_HASH);
        assert_eq!(a.body.factoid_transactions.len(), 1);
    }

    #[test]
    fn test_network_id_changes_genesis() {
        let a = GenesisBuilder::new(funded(), 1).build().unwrap();
        let b = GenesisBuilder::new(funded(), 2).build().unwrap();
        assert_ne!(a.header.key_mr(), b.header.key_mr());
    }

    #[test]
    fn test_unfunded_genesis_has_no_coinbase() {
        let block = GenesisBuilder::new(GenesisConfig::default(), 0).build().unwrap();
        assert!(block.body.factoid_transactions.is_empty());
    }

    #[test]
    fn test_config_validation() {
        let mut config = funded();
        config.factoid_funding[0].amount = 0;
        assert!(matches!(config.validate(), Err(GenesisError::InvalidConfig(_))));

        let mut config = funded();
        config.ec_funding.push(FundingConfig {
            address: "zz".to_string(),
            amount: 1,
        });
        assert!(matches!(config.validate(), Err(GenesisError::Address(_))));
    }
}
