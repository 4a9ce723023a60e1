//! # fc-node
//!
//! Runs a single federated-consensus node.
//!
//! 1. Load configuration (`FC_CONFIG` file, then `FC_*` variables)
//! 2. Install logging
//! 3. Start the runtime: genesis, workers, database load
//! 4. Run until Ctrl+C or a fatal engine error
//!
//! No transport is bundled: gossip and missing-data requests are logged at
//! debug level.

use anyhow::{Context, Result};
use node_runtime::{init_logging, NetworkPorts, NodeConfig, NodeRuntime};
use shared_types::short_hex;
use tracing::{debug, info};

/// Logs outbound traffic until both channels close.
async fn drain_outbound(ports: NetworkPorts) {
    let NetworkPorts {
        inbound: _inbound,
        mut gossip,
        mut requests,
    } = ports;
    loop {
        tokio::select! {
            Some(msg) = gossip.recv() => {
                debug!(kind = ?msg.kind(), hash = %short_hex(&msg.hash()), "Gossip");
            }
            Some(request) = requests.recv() => {
                debug!(?request, "Missing data request");
            }
            else => break,
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let config = NodeConfig::from_env().context("Failed to load configuration")?;
    init_logging(&config.telemetry).context("Failed to initialize logging")?;

    let mut runtime = NodeRuntime::new(config)?;
    if let Some(ports) = runtime.take_network() {
        tokio::spawn(drain_outbound(ports));
    }
    runtime.start().await?;

    info!("Node is running. Press Ctrl+C to stop.");
    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
        }
        _ = runtime.stopped() => {
            info!("Engine stopped");
        }
    }

    runtime.shutdown().await;
    Ok(())
}
