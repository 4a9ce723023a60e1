//! # Runtime Integration Tests
//!
//! Start a single in-memory node and drive it through the database load
//! into leadership at the first height after genesis.

use std::time::Duration;

use fc_consensus::ConsensusConfig;
use node_runtime::{NodeConfig, NodeRuntime};
use tokio::time::timeout;

fn single_node_config() -> NodeConfig {
    let mut config = NodeConfig::default();
    config.consensus = ConsensusConfig::for_testing();
    config.runtime.tick_interval_ms = 1;
    config.runtime.shutdown_grace_ms = 500;
    config
}

/// The genesis block is loaded and the only federated server leads height 1.
#[tokio::test]
async fn test_single_node_leads_after_genesis_load() {
    // Arrange
    let mut runtime = NodeRuntime::new(single_node_config()).expect("valid config");
    let _network = runtime.take_network().expect("network ports");
    let mut round = runtime.subscribe_round();

    // Act
    runtime.start().await.expect("runtime starts");

    // Assert
    let status = timeout(
        Duration::from_secs(5),
        round.wait_for(|s| s.leader && s.position.db_height == 1),
    )
    .await
    .expect("leadership within timeout")
    .expect("round channel open")
    .clone();
    assert_eq!(status.position.minute, 0);
    assert_eq!(status.highest_saved, Some(0));
    assert_eq!(runtime.store().highest_saved_height().unwrap(), Some(0));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_second_start_rejected() {
    let mut runtime = NodeRuntime::new(single_node_config()).expect("valid config");
    let _network = runtime.take_network();

    runtime.start().await.expect("first start");
    let err = runtime.start().await.unwrap_err();
    assert!(err.to_string().contains("already started"));

    runtime.shutdown().await;
}

#[tokio::test]
async fn test_network_ports_taken_once() {
    let mut runtime = NodeRuntime::new(single_node_config()).expect("valid config");
    assert!(runtime.take_network().is_some());
    assert!(runtime.take_network().is_none());
}

#[test]
fn test_invalid_consensus_config_rejected() {
    let mut config = single_node_config();
    config.consensus.block_seconds = 30;
    assert!(NodeRuntime::new(config).is_err());
}

/// `stopped` resolves once shutdown has been signalled.
#[tokio::test]
async fn test_stopped_resolves_after_shutdown() {
    let mut runtime = NodeRuntime::new(single_node_config()).expect("valid config");
    let _network = runtime.take_network();
    runtime.start().await.expect("runtime starts");

    runtime.shutdown().await;
    timeout(Duration::from_secs(1), runtime.stopped())
        .await
        .expect("stopped after shutdown");
}
