//! Logging initialisation.
//!
//! Installs a `tracing-subscriber` registry with an `EnvFilter` and either a
//! pretty or a JSON formatting layer. A `RUST_LOG` directive in the process
//! environment takes precedence over the configured level.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Error)]
pub enum TelemetryError {
    #[error("invalid log filter: {0}")]
    Filter(String),

    #[error("failed to install subscriber: {0}")]
    Init(String),
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    /// Filter directive (trace, debug, info, warn, error or a full directive).
    pub log_level: String,
    /// JSON lines instead of the human-readable format.
    pub json_logs: bool,
    /// Include thread ids, file and line in each event.
    pub verbose: bool,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            json_logs: false,
            verbose: false,
        }
    }
}

impl TelemetryConfig {
    /// `FC_LOG_LEVEL` or `RUST_LOG`, `FC_JSON_LOGS`, `FC_VERBOSE_LOGS`.
    pub fn apply_overrides<F>(&mut self, lookup: &F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(level) = lookup("FC_LOG_LEVEL").or_else(|| lookup("RUST_LOG")) {
            self.log_level = level;
        }
        if let Some(value) = lookup("FC_JSON_LOGS") {
            self.json_logs = is_truthy(&value);
        }
        if let Some(value) = lookup("FC_VERBOSE_LOGS") {
            self.verbose = is_truthy(&value);
        }
    }
}

fn is_truthy(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}

/// Installs the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log_level))
        .map_err(|e| TelemetryError::Filter(e.to_string()))?;

    if config.json_logs {
        let json_layer = tracing_subscriber::fmt::layer()
            .json()
            .with_target(true)
            .with_thread_ids(config.verbose)
            .with_file(config.verbose)
            .with_line_number(config.verbose);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(json_layer)
            .try_init()
            .map_err(|e| TelemetryError::Init(e.to_string()))?;
    } else {
        let fmt_layer = tracing_subscriber::fmt::layer()
            .with_target(true)
            .with_thread_ids(config.verbose)
            .with_file(config.verbose)
            .with_line_number(config.verbose)
            .with_ansi(true);
        tracing_subscriber::registry()
            .with(env_filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| TelemetryError::Init(e.to_string()))?;
    }

    tracing::info!(
        level = %config.log_level,
        json = config.json_logs,
        "Logging initialised"
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fc_log_level_wins_over_rust_log() {
        let mut config = TelemetryConfig::default();
        config.apply_overrides(&|var: &str| match var {
            "FC_LOG_LEVEL" => Some("debug".to_string()),
            "RUST_LOG" => Some("warn".to_string()),
            "FC_JSON_LOGS" => Some("1".to_string()),
            _ => None,
        });
        assert_eq!(config.log_level, "debug");
        assert!(config.json_logs);
        assert!(!config.verbose);
    }
}
