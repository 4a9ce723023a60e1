//! # Federation Flows
//!
//! Two federated servers running the full round protocol in process:
//!
//! 1. **DBSig barrier**: both leaders sign the genesis block at minute 0
//! 2. **EOM rounds**: a minute closes once every leader's EOM is in, leaders
//!    rotate lanes every minute and ten minutes seal a block
//! 3. **Entries**: a commit and reveal submitted to one node land on both
//! 4. **Catch-up**: a late follower applies a sealed block from a DBState
//!
//! A last flow boots a real node runtime and watches its gossip channel.

#[cfg(test)]
mod tests {
    use crate::integration::harness::{chain_entry, create_genesis, remote_dbstate, Federation};
    use fc_consensus::domain::{MessageKind, Payload};
    use fc_consensus::{ConsensusConfig, Message, RoundPosition};
    use node_runtime::{NodeConfig, NodeRuntime};
    use std::time::Duration;
    use tokio::time::timeout;

    // =============================================================================
    // DBSIG BARRIER
    // =============================================================================

    #[test]
    fn test_two_leaders_pass_dbsig_barrier() {
        let federation = Federation::start(&[1, 2]);

        for node in &federation.nodes {
            assert!(node.engine.is_leader());
            assert_eq!(node.engine.position(), RoundPosition::new(1, 0));
            assert!(!node.engine.sync_state().dbsig);

            let pl = node.engine.process_list(1).unwrap();
            assert!(pl.lane(0).unwrap().is_filled(0));
            assert!(pl.lane(1).unwrap().is_filled(0));
        }
        // Each leader signs from its own lane.
        assert_ne!(
            federation.node(0).engine.leader_vm(),
            federation.node(1).engine.leader_vm()
        );
    }

    // =============================================================================
    // EOM ROUNDS AND SEALING
    // =============================================================================

    #[test]
    fn test_minutes_advance_on_both_nodes() {
        let mut federation = Federation::start(&[1, 2]);
        let first = federation.node(0).engine.leader_vm();

        federation.end_minute();

        for node in &federation.nodes {
            assert_eq!(node.engine.position(), RoundPosition::new(1, 1));
            assert!(!node.engine.is_syncing());
        }
        // Lanes rotate between minutes.
        assert_ne!(federation.node(0).engine.leader_vm(), first);
    }

    #[test]
    fn test_minute_waits_for_every_eom_and_advances_once() {
        let mut federation = Federation::start(&[1, 2]);
        federation.clock.advance_secs(6);

        federation.issue_eom(0);
        federation.settle();
        for node in &federation.nodes {
            assert_eq!(node.engine.position(), RoundPosition::new(1, 0));
            assert!(node.engine.sync_state().eom);
            assert_eq!(node.engine.sync_state().eom_processed, 1);
        }

        federation.issue_eom(1);
        federation.settle();
        federation.settle();
        for node in &federation.nodes {
            assert_eq!(node.engine.position(), RoundPosition::new(1, 1));
            assert!(!node.engine.sync_state().eom);
            assert_eq!(node.engine.sync_state().eom_processed, 0);
            let pl = node.engine.process_list(1).unwrap();
            for vm in 0..2 {
                assert_eq!(pl.lane(vm).unwrap().leader_minute, 1);
            }
        }
    }

    #[test]
    fn test_both_nodes_seal_the_same_block() {
        let mut federation = Federation::start(&[1, 2]);

        for _ in 0..10 {
            federation.end_minute();
        }

        let genesis_key_mr = create_genesis().header.key_mr();
        let sealed_a = federation.node(0).write_back.last_block().unwrap();
        let sealed_b = federation.node(1).write_back.last_block().unwrap();
        assert_eq!(sealed_a.block.db_height(), 1);
        assert_eq!(sealed_a.block.header.prev_key_mr, genesis_key_mr);
        assert_eq!(
            sealed_a.block.header.key_mr(),
            sealed_b.block.header.key_mr()
        );
        for node in &federation.nodes {
            assert_eq!(node.engine.position(), RoundPosition::new(2, 0));
            assert_eq!(node.engine.highest_saved(), Some(0));
        }

        // Saved once the next height has run its first minute.
        federation.end_minute();
        for node in &federation.nodes {
            assert_eq!(node.engine.position(), RoundPosition::new(2, 1));
            assert_eq!(node.engine.highest_saved(), Some(1));
        }
    }

    // =============================================================================
    // ENTRIES
    // =============================================================================

    #[test]
    fn test_entry_submitted_to_one_node_reaches_both() {
        let mut federation = Federation::start(&[1, 2]);
        let entry = chain_entry(b"federated chain");

        let handles = federation.node(1).engine.queue_handles();
        handles.submit(federation.commit_chain(&entry, 12)).unwrap();
        handles.submit(federation.reveal(&entry)).unwrap();
        federation.settle();

        for node in &federation.nodes {
            assert!(!node.engine.has_commit(&entry.hash()));
            assert_eq!(node.write_back.entries(), vec![entry.clone()]);
            let pl = node.engine.process_list(1).unwrap();
            assert!(pl.new_eblocks.contains_key(&entry.chain_id));
        }
    }

    #[test]
    fn test_reveal_before_commit_is_applied_once_everywhere() {
        let mut federation = Federation::start(&[1, 2]);
        let entry = chain_entry(b"out of order");
        let commit = federation.commit_chain(&entry, 12);
        let reveal = federation.reveal(&entry);

        // Each node gets its own copy, as if received from the network.
        for node in &federation.nodes {
            let handles = node.engine.queue_handles();
            handles.submit(Message::new(reveal.payload().clone())).unwrap();
            handles.submit(Message::new(commit.payload().clone())).unwrap();
        }
        federation.settle();

        for node in &federation.nodes {
            assert!(!node.engine.has_commit(&entry.hash()));
            assert_eq!(node.write_back.entries(), vec![entry.clone()]);
            assert_eq!(node.engine.dependent_len(), 0);
        }
    }

    #[test]
    fn test_sealed_block_carries_revealed_entry() {
        let mut federation = Federation::start(&[1, 2]);
        let entry = chain_entry(b"sealed chain");

        let handles = federation.node(0).engine.queue_handles();
        handles.submit(federation.commit_chain(&entry, 12)).unwrap();
        handles.submit(federation.reveal(&entry)).unwrap();
        federation.settle();
        for _ in 0..10 {
            federation.end_minute();
        }

        for node in &federation.nodes {
            let sealed = node.write_back.last_block().unwrap();
            assert_eq!(sealed.block.entry_hashes(), vec![entry.hash()]);
        }
    }

    // =============================================================================
    // CATCH-UP
    // =============================================================================

    #[test]
    fn test_late_follower_catches_up_from_dbstate() {
        let mut federation = Federation::start(&[1, 2]);
        for _ in 0..10 {
            federation.end_minute();
        }
        let sealed = federation.node(0).write_back.last_block().unwrap();

        let follower = federation.add_follower(3);
        let node = &mut federation.nodes[follower];
        assert!(!node.engine.is_leader());
        assert_eq!(node.engine.position(), RoundPosition::new(1, 0));

        node.engine.execute(&remote_dbstate(sealed.clone())).unwrap();

        assert_eq!(node.engine.position(), RoundPosition::new(2, 0));
        assert_eq!(node.engine.highest_saved(), Some(1));
        assert_eq!(node.key_mr(1), Some(sealed.block.header.key_mr()));
        // Blocks learned from peers are persisted through the write-back port.
        assert_eq!(node.write_back.blocks().len(), 1);
    }

    // =============================================================================
    // NODE RUNTIME
    // =============================================================================

    #[tokio::test]
    async fn test_runtime_gossips_its_dbsig() {
        let mut config = NodeConfig::default();
        config.consensus = ConsensusConfig::for_testing();
        config.runtime.tick_interval_ms = 1;
        config.runtime.shutdown_grace_ms = 500;

        let mut runtime = NodeRuntime::new(config).expect("valid config");
        let mut network = runtime.take_network().expect("network ports");
        runtime.start().await.expect("runtime starts");

        let dbsig = timeout(Duration::from_secs(5), async {
            while let Some(msg) = network.gossip.recv().await {
                if msg.kind() == MessageKind::DirectoryBlockSignature {
                    return Some(msg);
                }
            }
            None
        })
        .await
        .expect("gossip within timeout")
        .expect("gossip channel open");

        match dbsig.payload() {
            Payload::DirectoryBlockSignature(sig) => assert_eq!(sig.db_height, 1),
            other => panic!("unexpected payload {other:?}"),
        }
        runtime.shutdown().await;
    }
}
