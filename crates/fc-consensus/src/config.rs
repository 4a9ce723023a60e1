//! Engine configuration.
//!
//! Every timing in the engine is derived from `block_seconds`: one "factom
//! second" is `block_seconds / 600`, so a ten-minute block has one-second
//! factom seconds and a sixty-second block has 100 ms ones.

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Configuration of the consensus execution engine.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusConfig {
    /// Length of a directory block in seconds (ten minutes on mainnet).
    pub block_seconds: u64,
    /// Delay after the database load before the node starts leading, in ms.
    pub start_delay_ms: u64,
    /// Age beyond which non-DBState messages are dropped while ignoring missing messages.
    pub ignore_missing_secs: u64,
    /// Width of the acknowledgment timestamp window, in ms.
    pub filter_time_limit_ms: u64,
    /// Minimum spacing between two holding reviews, in ms.
    pub review_interval_ms: u64,
    /// Maximum number of holding entries promoted per review.
    pub max_review_batch: usize,
    /// Holding is dropped once the highest known block is this far past the saved one.
    pub holding_height_lag_limit: u32,
    /// Delay applied to reposted messages, in factom seconds.
    pub repost_delay_factom_seconds: u64,
    /// Capacity of each bounded inbound queue.
    pub inbound_queue_capacity: usize,
    /// Number of process lists kept below the leader height.
    pub keep_process_lists: u32,
    /// Factoshis paid per entry credit.
    pub entry_credit_rate: u64,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            block_seconds: 600,
            start_delay_ms: 10_000,
            ignore_missing_secs: 15 * 60,
            filter_time_limit_ms: 2 * 60 * 60 * 1000,
            review_interval_ms: 100,
            max_review_batch: 200,
            holding_height_lag_limit: 1000,
            repost_delay_factom_seconds: 1,
            inbound_queue_capacity: 10_000,
            keep_process_lists: 2,
            entry_credit_rate: 1000,
        }
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("block_seconds must be at least 60, got {0}")]
    BlockTooShort(u64),

    #[error("{field} must be non-zero")]
    ZeroValue { field: &'static str },
}

impl ConsensusConfig {
    /// Config tuned for tests: one-minute blocks, no start delay.
    pub fn for_testing() -> Self {
        Self {
            block_seconds: 60,
            start_delay_ms: 0,
            review_interval_ms: 0,
            ..Default::default()
        }
    }

    /// Duration of one factom second (`block_seconds / 600`).
    pub fn factom_second(&self) -> Duration {
        Duration::from_secs(self.block_seconds) / 600
    }

    /// Length of one minute (sub-round) of a block.
    pub fn minute_duration(&self) -> Duration {
        Duration::from_secs(self.block_seconds) / 10
    }

    /// Delay applied to reposts.
    pub fn repost_delay(&self) -> Duration {
        self.factom_second() * self.repost_delay_factom_seconds as u32
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.block_seconds < 60 {
            return Err(ConfigError::BlockTooShort(self.block_seconds));
        }
        if self.max_review_batch == 0 {
            return Err(ConfigError::ZeroValue {
                field: "max_review_batch",
            });
        }
        if self.inbound_queue_capacity == 0 {
            return Err(ConfigError::ZeroValue {
                field: "inbound_queue_capacity",
            });
        }
        if self.filter_time_limit_ms == 0 {
            return Err(ConfigError::ZeroValue {
                field: "filter_time_limit_ms",
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_factom_second_scales_with_block_time() {
        let mut config = ConsensusConfig::default();
        assert_eq!(config.factom_second(), Duration::from_secs(1));
        config.block_seconds = 60;
        assert_eq!(config.factom_second(), Duration::from_millis(100));
        assert_eq!(config.minute_duration(), Duration::from_secs(6));
    }

    #[test]
    fn test_validate_rejects_short_blocks() {
        let config = ConsensusConfig {
            block_seconds: 30,
            ..Default::default()
        };
        assert_eq!(config.validate(), Err(ConfigError::BlockTooShort(30)));
        assert!(ConsensusConfig::default().validate().is_ok());
        assert!(ConsensusConfig::for_testing().validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: ConsensusConfig = serde_json::from_str(r#"{"block_seconds":120}"#).unwrap();
        assert_eq!(config.block_seconds, 120);
        assert_eq!(config.max_review_batch, 200);
    }
}
