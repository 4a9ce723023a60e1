//! # Node Runtime
//!
//! Owns the chain store, the engine's queue handles and the worker tasks.
//!
//! ## Startup Sequence
//!
//! 1. Validate configuration and resolve the node identity
//! 2. Open the chain store and build the engine with channel-backed ports
//! 3. Create the genesis block if the store is empty
//! 4. Spawn the workers
//! 5. Replay saved blocks into the engine as local DBStates, the last one
//!    marked as the end of the database load
//!
//! ## Shutdown
//!
//! A watch channel stops every worker. A fatal engine error raises it too.

use crate::config::NodeConfig;
use crate::genesis::GenesisBuilder;
use crate::storage;
use crate::workers::{EntrySync, LeaderDuty, MessageOrderReconciler, Validator, WriteBackWorker};
use anyhow::{Context, Result};
use fc_consensus::adapters::{
    ChannelBroadcast, ChannelRequester, ChannelWriteBack, Ed25519AuthorityOracle,
    HashChainAssembler, LoggingInvalidSink, WriteBackEvent,
};
use fc_consensus::domain::{BlockWithEntries, DbState};
use fc_consensus::ports::{ChainStore, MissingMessageRequester, MissingRequest, SystemTimeSource};
use fc_consensus::{
    ConsensusDependencies, ConsensusEngine, Message, Payload, QueueHandles, RoundStatus,
};
use shared_types::short_hex;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

/// Channels for a network transport.
pub struct NetworkPorts {
    /// Messages received from peers.
    pub inbound: mpsc::Sender<Arc<Message>>,
    /// Gossip produced by the engine.
    pub gossip: mpsc::Receiver<Arc<Message>>,
    /// Missing-message and missing-entry requests.
    pub requests: mpsc::Receiver<MissingRequest>,
}

/// Parts handed to the workers at start.
struct PendingWorkers {
    engine: ConsensusEngine,
    network_rx: mpsc::Receiver<Arc<Message>>,
    write_back_rx: mpsc::UnboundedReceiver<WriteBackEvent>,
}

pub struct NodeRuntime {
    config: NodeConfig,
    store: Arc<dyn ChainStore>,
    handles: QueueHandles,
    round: watch::Receiver<RoundStatus>,
    requester: Arc<dyn MissingMessageRequester>,
    network: Option<NetworkPorts>,
    pending: Option<PendingWorkers>,
    shutdown_tx: Arc<watch::Sender<bool>>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl NodeRuntime {
    pub fn new(config: NodeConfig) -> Result<Self> {
        config.validate().context("Invalid configuration")?;
        let resolved = config
            .resolve_identity()
            .context("Failed to resolve node identity")?;
        let store = storage::open_store(&config.storage).context("Failed to open chain store")?;

        let capacity = config.runtime.channel_capacity;
        let (gossip_tx, gossip_rx) = mpsc::channel(capacity);
        let (request_tx, request_rx) = mpsc::channel(capacity);
        let (network_tx, network_rx) = mpsc::channel(capacity);
        let (write_back_tx, write_back_rx) = mpsc::unbounded_channel();
        let requester: Arc<dyn MissingMessageRequester> =
            Arc::new(ChannelRequester::new(request_tx));

        let identity = resolved.identity;
        info!(
            identity = %short_hex(&identity.chain_id),
            federated = resolved.authorities.federated_count(),
            audit = resolved.authorities.audit().len(),
            block_seconds = config.consensus.block_seconds,
            "Creating node runtime"
        );
        let engine = ConsensusEngine::new(ConsensusDependencies {
            broadcast: Arc::new(ChannelBroadcast::new(gossip_tx)),
            invalid_sink: Arc::new(LoggingInvalidSink),
            store: Arc::clone(&store),
            oracle: Arc::new(Ed25519AuthorityOracle::new()),
            signer: Arc::new(resolved.signer),
            requester: Arc::clone(&requester),
            assembler: Arc::new(HashChainAssembler::new(config.identity.network_id)),
            write_back: Arc::new(ChannelWriteBack::new(write_back_tx)),
            config: config.consensus.clone(),
            identity,
            authorities: resolved.authorities,
        });
        let handles = engine.queue_handles();
        let round = engine.subscribe_round();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        Ok(Self {
            config,
            store,
            handles,
            round,
            requester,
            network: Some(NetworkPorts {
                inbound: network_tx,
                gossip: gossip_rx,
                requests: request_rx,
            }),
            pending: Some(PendingWorkers {
                engine,
                network_rx,
                write_back_rx,
            }),
            shutdown_tx: Arc::new(shutdown_tx),
            shutdown_rx,
            tasks: Vec::new(),
        })
    }

    /// Creates genesis if needed, spawns the workers and loads saved blocks.
    pub async fn start(&mut self) -> Result<()> {
        let pending = self
            .pending
            .take()
            .context("Node runtime already started")?;

        self.initialize_genesis()?;
        self.spawn_workers(pending);
        self.load_database().await?;

        info!(
            data_dir = %self.config.storage.data_dir.display(),
            backend = ?self.config.storage.backend,
            "Node runtime started"
        );
        Ok(())
    }

    fn initialize_genesis(&self) -> Result<()> {
        if self.store.highest_saved_height()?.is_some() {
            info!("Genesis block found, chain initialized");
            return Ok(());
        }
        let genesis = GenesisBuilder::new(self.config.genesis.clone(), self.config.identity.network_id)
            .build()
            .context("Failed to build genesis block")?;
        self.store
            .save_dblock(&genesis)
            .context("Failed to store genesis block")?;
        info!(
            key_mr = %short_hex(&genesis.header.key_mr()),
            "Genesis block created"
        );
        Ok(())
    }

    fn spawn_workers(&mut self, pending: PendingWorkers) {
        let runtime = &self.config.runtime;

        let write_back = WriteBackWorker::new(Arc::clone(&self.store));
        self.tasks.push(tokio::spawn(
            write_back.run(pending.write_back_rx, self.shutdown_rx.clone()),
        ));

        let validator = Validator::new(pending.engine, runtime.tick_interval());
        let shutdown_tx = Arc::clone(&self.shutdown_tx);
        let shutdown_rx = self.shutdown_rx.clone();
        self.tasks.push(tokio::spawn(async move {
            if validator.run(shutdown_rx).await.is_err() {
                shutdown_tx.send_replace(true);
            }
        }));

        let leader = LeaderDuty::new(
            self.handles.clone(),
            self.round.clone(),
            Arc::new(SystemTimeSource),
            self.config.consensus.minute_duration(),
        );
        self.tasks.push(tokio::spawn(leader.run(self.shutdown_rx.clone())));

        let reconciler =
            MessageOrderReconciler::new(self.handles.clone(), Arc::clone(&self.requester));
        self.tasks.push(tokio::spawn(reconciler.run(
            pending.network_rx,
            self.round.clone(),
            self.shutdown_rx.clone(),
        )));

        let entry_sync = EntrySync::new(
            Arc::clone(&self.store),
            Arc::clone(&self.requester),
            Duration::from_millis(runtime.entry_sync_max_backoff_ms),
        );
        self.tasks.push(tokio::spawn(entry_sync.run(
            Duration::from_millis(runtime.entry_sync_interval_ms),
            self.shutdown_rx.clone(),
        )));
    }

    /// Feeds every saved block to the engine as a local DBState.
    async fn load_database(&self) -> Result<()> {
        let Some(highest) = self.store.highest_saved_height()? else {
            return Ok(());
        };
        info!(highest, "Loading saved blocks");

        for db_height in 0..=highest {
            let block = self
                .store
                .fetch_dblock(db_height)?
                .with_context(|| format!("Block {db_height} missing from the store"))?;
            let mut entries = Vec::new();
            for entry_hash in block.entry_hashes() {
                if let Some(entry) = self.store.fetch_entry(&entry_hash)? {
                    entries.push(entry);
                }
            }
            let msg = Message::local(Payload::DbState(DbState {
                timestamp: block.header.timestamp,
                block: BlockWithEntries { block, entries },
                is_last: db_height == highest,
            }));
            self.handles
                .submit_wait(msg)
                .await
                .context("Engine stopped while loading blocks")?;
        }
        Ok(())
    }

    /// Channels for the network transport. `None` after the first call.
    pub fn take_network(&mut self) -> Option<NetworkPorts> {
        self.network.take()
    }

    pub fn queue_handles(&self) -> QueueHandles {
        self.handles.clone()
    }

    pub fn subscribe_round(&self) -> watch::Receiver<RoundStatus> {
        self.round.clone()
    }

    pub fn store(&self) -> Arc<dyn ChainStore> {
        Arc::clone(&self.store)
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Resolves once shutdown has been signalled, by [`Self::shutdown`] or by
    /// a fatal engine error.
    pub async fn stopped(&self) {
        let mut rx = self.shutdown_rx.clone();
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Signals every worker and waits up to the grace period for each.
    pub async fn shutdown(&mut self) {
        info!("Initiating graceful shutdown...");
        self.shutdown_tx.send_replace(true);

        let grace = self.config.runtime.shutdown_grace();
        for task in self.tasks.drain(..) {
            match tokio::time::timeout(grace, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!("Worker task failed: {}", e),
                Err(_) => warn!("Worker did not stop within the grace period"),
            }
        }
        info!("Shutdown complete");
    }
}
