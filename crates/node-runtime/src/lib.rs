//! # Node Runtime Library
//!
//! Hosts one consensus engine: configuration, logging, the chain store, the
//! genesis block and the worker tasks around the engine. The `fc-node`
//! binary is a thin wrapper over [`NodeRuntime`].

#![allow(clippy::type_complexity)]

pub mod config;
pub mod genesis;
pub mod runtime;
pub mod storage;
pub mod telemetry;
pub mod workers;

pub use config::{
    ConfigError, IdentityConfig, NodeConfig, RuntimeConfig, ServerConfig, StorageBackend,
    StorageConfig,
};
pub use genesis::{GenesisBuilder, GenesisConfig, GenesisError};
pub use runtime::{NetworkPorts, NodeRuntime};
pub use telemetry::{init_logging, TelemetryConfig};
