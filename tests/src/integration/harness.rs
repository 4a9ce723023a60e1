//! # Federation Harness
//!
//! In-process federations for the integration flows. Every node gets its own
//! engine and in-memory store; broadcasts are looped back into the queues of
//! the connected peers and all nodes share one manual clock.

use fc_consensus::adapters::{
    Ed25519AuthorityOracle, Ed25519Signer, HashChainAssembler, InMemoryChainStore,
    LoopbackBroadcast, ManualClock, RecordingInvalidSink, RecordingRequester, RecordingWriteBack,
};
use fc_consensus::domain::{
    AuthoritySet, BlockCandidate, BlockWithEntries, CommitChain, DbState, Eom, FactoidTransaction,
    Payload, RevealEntry, SealedBlock, ServerEntry, TxAmount,
};
use fc_consensus::ports::{BlockAssembler, LocalSigner, TimeSource};
use fc_consensus::{ConsensusConfig, ConsensusDependencies, ConsensusEngine, Message, NodeIdentity};
use shared_types::{Address, Entry, ServerId, Timestamp, ZERO_HASH};
use std::sync::Arc;

pub const START: Timestamp = Timestamp::from_secs(1_700_000_000);
pub const FCT_ADDRESS: Address = [0xF0; 32];
pub const EC_ADDRESS: Address = [0xEC; 32];

/// Upper bound on settle rounds; a healthy federation goes quiet long before.
const MAX_SETTLE_ROUNDS: usize = 200;

/// Seconds per minute with `ConsensusConfig::for_testing()`.
const MINUTE_SECS: u64 = 6;

pub fn server_id(n: u8) -> ServerId {
    [n; 32]
}

pub fn server_signer(n: u8) -> Ed25519Signer {
    Ed25519Signer::from_seed([n.wrapping_add(100); 32])
}

fn create_test_authorities(federated: &[u8]) -> AuthoritySet {
    let servers = federated
        .iter()
        .map(|&n| ServerEntry {
            id: server_id(n),
            signing_key: server_signer(n).public_key(),
        })
        .collect();
    AuthoritySet::new(servers, vec![])
}

/// Genesis block funding [`FCT_ADDRESS`] and [`EC_ADDRESS`].
pub fn create_genesis() -> SealedBlock {
    let coinbase = FactoidTransaction {
        timestamp: START,
        inputs: vec![],
        outputs: vec![TxAmount {
            address: FCT_ADDRESS,
            amount: 1_000_000,
        }],
        ec_outputs: vec![TxAmount {
            address: EC_ADDRESS,
            amount: 100,
        }],
    };
    let candidate = BlockCandidate {
        db_height: 0,
        prev_key_mr: ZERO_HASH,
        timestamp: START,
        factoid_transactions: vec![coinbase],
        ..Default::default()
    };
    HashChainAssembler::default()
        .seal(candidate, None)
        .expect("genesis seals")
}

/// A DBState as a peer would send it.
pub fn remote_dbstate(block: BlockWithEntries) -> Arc<Message> {
    Message::new(Payload::DbState(DbState {
        timestamp: block.block.header.timestamp,
        block,
        is_last: false,
    }))
}

pub fn chain_entry(name: &[u8]) -> Entry {
    let ext_ids = vec![name.to_vec()];
    Entry::new(Entry::chain_id_for(&ext_ids), ext_ids, b"hello".to_vec())
}

pub struct TestNode {
    pub local: u8,
    pub engine: ConsensusEngine,
    pub broadcast: Arc<LoopbackBroadcast>,
    pub invalid: Arc<RecordingInvalidSink>,
    pub requester: Arc<RecordingRequester>,
    pub write_back: Arc<RecordingWriteBack>,
}

impl TestNode {
    fn new(federated: &[u8], local: u8, clock: &ManualClock) -> Self {
        let broadcast = Arc::new(LoopbackBroadcast::new());
        let invalid = Arc::new(RecordingInvalidSink::new());
        let requester = Arc::new(RecordingRequester::new());
        let write_back = Arc::new(RecordingWriteBack::new());
        let deps = ConsensusDependencies {
            broadcast: broadcast.clone(),
            invalid_sink: invalid.clone(),
            store: Arc::new(InMemoryChainStore::new()),
            oracle: Arc::new(Ed25519AuthorityOracle::new()),
            signer: Arc::new(server_signer(local)),
            requester: requester.clone(),
            assembler: Arc::new(HashChainAssembler::default()),
            write_back: write_back.clone(),
            config: ConsensusConfig::for_testing(),
            identity: NodeIdentity {
                chain_id: server_id(local),
                salt: [local; 32],
            },
            authorities: create_test_authorities(federated),
        };
        let engine = ConsensusEngine::new(deps).with_time_source(Box::new(clock.clone()));
        Self {
            local,
            engine,
            broadcast,
            invalid,
            requester,
            write_back,
        }
    }

    /// Key MR of the block this node recorded at `db_height`.
    pub fn key_mr(&self, db_height: u32) -> Option<shared_types::Hash> {
        self.engine.ledger().header(db_height).map(|h| h.key_mr())
    }

    fn eom_template(&self, now: Timestamp) -> Arc<Message> {
        Message::local(Payload::Eom(Eom {
            timestamp: now,
            db_height: self.engine.position().db_height,
            vm_index: self.engine.leader_vm(),
            minute: self.engine.position().minute,
            chain_id: self.engine.identity().chain_id,
            signature: None,
        }))
    }
}

/// Nodes on a shared clock, wired through loopback broadcasts.
pub struct Federation {
    pub clock: ManualClock,
    pub nodes: Vec<TestNode>,
    federated: Vec<u8>,
}

impl Federation {
    /// One connected node per federated server, each with genesis loaded.
    pub fn start(federated: &[u8]) -> Self {
        let clock = ManualClock::new(START);
        let nodes = federated
            .iter()
            .map(|&n| TestNode::new(federated, n, &clock))
            .collect();
        let mut federation = Self {
            clock,
            nodes,
            federated: federated.to_vec(),
        };
        let n = federation.nodes.len();
        for a in 0..n {
            for b in (a + 1)..n {
                federation.link(a, b);
            }
        }
        federation.bootstrap();
        federation
    }

    /// Adds a non-federated node that is not connected to anyone yet.
    pub fn add_follower(&mut self, local: u8) -> usize {
        let mut node = TestNode::new(&self.federated, local, &self.clock);
        node.engine
            .execute(&Self::genesis_dbstate())
            .expect("genesis loads");
        self.nodes.push(node);
        let index = self.nodes.len() - 1;
        self.nodes[index].engine.process().expect("tick");
        index
    }

    /// Loops `index`'s broadcasts into every other node and theirs into it.
    pub fn connect(&self, index: usize) {
        for other in (0..self.nodes.len()).filter(|&i| i != index) {
            self.link(index, other);
        }
    }

    fn link(&self, a: usize, b: usize) {
        let (a, b) = (&self.nodes[a], &self.nodes[b]);
        a.broadcast.connect(b.engine.queue_handles());
        b.broadcast.connect(a.engine.queue_handles());
    }

    fn genesis_dbstate() -> Arc<Message> {
        Message::local(Payload::DbState(DbState {
            timestamp: START,
            block: BlockWithEntries {
                block: create_genesis(),
                entries: vec![],
            },
            is_last: true,
        }))
    }

    fn bootstrap(&mut self) {
        for node in &mut self.nodes {
            node.engine
                .execute(&Self::genesis_dbstate())
                .expect("genesis loads");
        }
        self.settle();
    }

    pub fn node(&self, index: usize) -> &TestNode {
        &self.nodes[index]
    }

    /// Ticks every node until a full round makes no progress.
    pub fn settle(&mut self) {
        for _ in 0..MAX_SETTLE_ROUNDS {
            let mut progress = false;
            for node in &mut self.nodes {
                progress |= node.engine.process().expect("tick succeeds");
            }
            if !progress {
                return;
            }
        }
    }

    /// Advances the clock one minute and has every leader close it.
    pub fn end_minute(&mut self) {
        self.clock.advance_secs(MINUTE_SECS);
        for index in 0..self.nodes.len() {
            if self.nodes[index].engine.is_leader() {
                self.issue_eom(index);
            }
        }
        self.settle();
    }

    /// Has one node issue its EOM for the current minute, without settling.
    pub fn issue_eom(&mut self, index: usize) {
        let now = self.clock.now();
        let node = &mut self.nodes[index];
        let eom = node.eom_template(now);
        node.engine.execute(&eom).expect("eom executes");
    }

    pub fn commit_chain(&self, entry: &Entry, credits: u8) -> Arc<Message> {
        Message::new(Payload::CommitChain(CommitChain {
            timestamp: self.clock.now(),
            chain_id: entry.chain_id,
            entry_hash: entry.hash(),
            credits,
            ec_address: EC_ADDRESS,
        }))
    }

    pub fn reveal(&self, entry: &Entry) -> Arc<Message> {
        Message::new(Payload::RevealEntry(RevealEntry {
            timestamp: self.clock.now(),
            entry: entry.clone(),
        }))
    }
}
