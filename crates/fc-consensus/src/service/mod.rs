//! Consensus Engine - Core execution logic
//!
//! # Architecture
//! - One task owns the engine and drives it through [`ConsensusEngine::process`]
//! - Producers feed the three inbound queues through [`QueueHandles`]
//! - Every outbound effect goes through the ports in [`ConsensusDependencies`]
//!
//! The engine is split by concern:
//! - `classify`: send/execute verdicts and per-kind validity
//! - `dispatch`: leader and follower execution, acks, lane processing
//! - `round`: EOM and DBSig barriers, minute and height moves, sealing
//! - `tick`: the main tick, holding review and buffered DBStates

mod classify;
mod dispatch;
mod round;
mod tick;


pub use classify::{Classification, DEPENDENT, DROP, FOLLOWER, HOLD, LEADER_EXECUTE};
pub use dispatch::ExecutionTrail;

use crate::config::ConsensusConfig;
use crate::domain::{
    Ack, AuthoritySet, BalanceBook, BlockLedger, CommitTracker, ConsensusResult, DbStateBuffer,
    DependentHolding, DirectoryBlockHeader, HoldingStore, Message, ProcessList, ProcessLists,
    ReplayFilter, ReplayNamespace, RoundPosition, RoundStatus, SyncState, VmLane,
};
use crate::metrics;
use crate::ports::{
    inbound_queues, AuthorityOracle, BlockAssembler, BroadcastSink, ChainStore, InboundQueues,
    InvalidMessageSink, LocalSigner, MissingMessageRequester, QueueHandles, SystemTimeSource,
    TimeSource, WriteBack,
};
use shared_types::{short_hex, Hash, ServerId, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, trace};

/// Identity of the local node.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct NodeIdentity {
    pub chain_id: ServerId,
    /// Node salt; its first eight bytes are stamped on every ack.
    pub salt: Hash,
}

/// Dependencies for ConsensusEngine
pub struct ConsensusDependencies {
    pub broadcast: Arc<dyn BroadcastSink>,
    pub invalid_sink: Arc<dyn InvalidMessageSink>,
    pub store: Arc<dyn ChainStore>,
    pub oracle: Arc<dyn AuthorityOracle>,
    pub signer: Arc<dyn LocalSigner>,
    pub requester: Arc<dyn MissingMessageRequester>,
    pub assembler: Arc<dyn BlockAssembler>,
    pub write_back: Arc<dyn WriteBack>,
    pub config: ConsensusConfig,
    pub identity: NodeIdentity,
    /// Authority set in force from height 0.
    pub authorities: AuthoritySet,
}

/// Consensus Engine
///
/// Owns holding, the replay filter, the process lists, the balances and the
/// round state. Not shared between tasks.
pub struct ConsensusEngine {
    broadcast: Arc<dyn BroadcastSink>,
    invalid_sink: Arc<dyn InvalidMessageSink>,
    store: Arc<dyn ChainStore>,
    oracle: Arc<dyn AuthorityOracle>,
    signer: Arc<dyn LocalSigner>,
    requester: Arc<dyn MissingMessageRequester>,
    assembler: Arc<dyn BlockAssembler>,
    write_back: Arc<dyn WriteBack>,
    time_source: Box<dyn TimeSource>,
    config: ConsensusConfig,
    identity: NodeIdentity,

    // === ROUND ===
    position: RoundPosition,
    leader: bool,
    leader_vm: usize,
    sync: SyncState,
    /// Authorities for the next height to be built; admin changes land here at sealing.
    authorities: AuthoritySet,
    leader_timestamp: Timestamp,
    message_filter_timestamp: Timestamp,
    highest_known: u32,

    // === BOOTSTRAP ===
    run_leader: bool,
    ignore_missing: bool,
    ignore_missing_until: Option<Timestamp>,
    db_finished_at: Option<Timestamp>,

    // === STATE ===
    ledger: BlockLedger,
    dbstates: DbStateBuffer,
    process_lists: ProcessLists,
    holding: HoldingStore,
    dependents: DependentHolding,
    x_review: Vec<Arc<Message>>,
    last_review: Option<Timestamp>,
    last_eviction: Option<Timestamp>,
    acks: HashMap<Hash, Ack>,
    replay: ReplayFilter,
    commits: CommitTracker,
    balances: Arc<BalanceBook>,
    reposts: Vec<(Timestamp, Arc<Message>)>,
    processing_lanes: bool,
    lanes_dirty: bool,

    // === QUEUES ===
    inbound: InboundQueues,
    handles: QueueHandles,
    round_tx: watch::Sender<RoundStatus>,
}

impl ConsensusEngine {
    /// Create a new ConsensusEngine positioned at `(0, 0)` with no blocks.
    pub fn new(deps: ConsensusDependencies) -> Self {
        let (handles, inbound) = inbound_queues(deps.config.inbound_queue_capacity);
        let (round_tx, _) = watch::channel(RoundStatus {
            identity: deps.identity.chain_id,
            ..RoundStatus::default()
        });
        deps.oracle.update_authorities(0, &deps.authorities);

        let window = deps.config.filter_time_limit_ms;
        let mut engine = Self {
            broadcast: deps.broadcast,
            invalid_sink: deps.invalid_sink,
            store: deps.store,
            oracle: deps.oracle,
            signer: deps.signer,
            requester: deps.requester,
            assembler: deps.assembler,
            write_back: deps.write_back,
            time_source: Box::new(SystemTimeSource),
            identity: deps.identity,
            position: RoundPosition::default(),
            leader: false,
            leader_vm: 0,
            sync: SyncState::default(),
            authorities: deps.authorities,
            leader_timestamp: Timestamp::default(),
            message_filter_timestamp: Timestamp::default(),
            highest_known: 0,
            run_leader: false,
            ignore_missing: false,
            ignore_missing_until: None,
            db_finished_at: None,
            ledger: BlockLedger::new(),
            dbstates: DbStateBuffer::new(),
            process_lists: ProcessLists::new(),
            holding: HoldingStore::new(),
            dependents: DependentHolding::new(),
            x_review: Vec::new(),
            last_review: None,
            last_eviction: None,
            acks: HashMap::new(),
            replay: ReplayFilter::new(window),
            commits: CommitTracker::new(window / 2),
            balances: Arc::new(BalanceBook::new()),
            reposts: Vec::new(),
            processing_lanes: false,
            lanes_dirty: false,
            inbound,
            handles,
            round_tx,
            config: deps.config,
        };
        let now = engine.now();
        engine.set_leader_timestamp(now);
        engine
    }

    /// Set custom time source (for testing)
    pub fn with_time_source(mut self, time_source: Box<dyn TimeSource>) -> Self {
        self.time_source = time_source;
        let now = self.now();
        self.set_leader_timestamp(now);
        self
    }

    // === ACCESSORS ===

    pub fn config(&self) -> &ConsensusConfig {
        &self.config
    }

    pub fn identity(&self) -> &NodeIdentity {
        &self.identity
    }

    pub fn position(&self) -> RoundPosition {
        self.position
    }

    pub fn is_leader(&self) -> bool {
        self.leader
    }

    pub fn leader_vm(&self) -> usize {
        self.leader_vm
    }

    pub fn is_syncing(&self) -> bool {
        self.sync.is_syncing()
    }

    pub fn sync_state(&self) -> &SyncState {
        &self.sync
    }

    pub fn run_leader(&self) -> bool {
        self.run_leader
    }

    pub fn is_ignoring_missing(&self) -> bool {
        self.ignore_missing
    }

    pub fn highest_saved(&self) -> Option<u32> {
        self.ledger.highest_saved()
    }

    pub fn highest_known(&self) -> u32 {
        self.highest_known
    }

    pub fn authorities(&self) -> &AuthoritySet {
        &self.authorities
    }

    pub fn ledger(&self) -> &BlockLedger {
        &self.ledger
    }

    pub fn replay(&self) -> &ReplayFilter {
        &self.replay
    }

    pub fn holding_len(&self) -> usize {
        self.holding.len()
    }

    pub fn holding_contains(&self, msg_hash: &Hash) -> bool {
        self.holding.contains(msg_hash)
    }

    pub fn dependent_len(&self) -> usize {
        self.dependents.len()
    }

    pub fn pending_reposts(&self) -> usize {
        self.reposts.len()
    }

    pub fn buffered_dbstates(&self) -> usize {
        self.dbstates.len()
    }

    /// Unplaced ack for a message, if one has arrived.
    pub fn ack_for(&self, msg_hash: &Hash) -> Option<&Ack> {
        self.acks.get(msg_hash)
    }

    pub fn has_commit(&self, entry_hash: &Hash) -> bool {
        self.commits.get(entry_hash).is_some()
    }

    pub fn process_list(&self, db_height: u32) -> Option<&ProcessList> {
        self.process_lists.get(db_height)
    }

    /// Balances shared with read-only API consumers.
    pub fn balances(&self) -> Arc<BalanceBook> {
        Arc::clone(&self.balances)
    }

    /// Producer side of the inbound queues.
    pub fn queue_handles(&self) -> QueueHandles {
        self.handles.clone()
    }

    /// Receives a [`RoundStatus`] after every round move.
    pub fn subscribe_round(&self) -> watch::Receiver<RoundStatus> {
        self.round_tx.subscribe()
    }

    pub fn round_status(&self) -> RoundStatus {
        RoundStatus {
            position: self.position,
            leader: self.leader && self.run_leader,
            leader_vm: self.leader_vm,
            identity: self.identity.chain_id,
            highest_saved: self.ledger.highest_saved(),
            syncing: self.sync.is_syncing(),
        }
    }

    // === INTERNAL HELPERS ===

    pub(crate) fn now(&self) -> Timestamp {
        self.time_source.now()
    }

    fn leader_pl(&self) -> Option<&ProcessList> {
        self.process_lists.get(self.position.db_height)
    }

    fn leader_lane(&self) -> Option<&VmLane> {
        self.leader_pl().and_then(|pl| pl.lane(self.leader_vm))
    }

    /// Header of block `db_height - 1` from the ledger or the store.
    fn previous_header(&self, db_height: u32) -> ConsensusResult<Option<DirectoryBlockHeader>> {
        let Some(prev) = db_height.checked_sub(1) else {
            return Ok(None);
        };
        if let Some(header) = self.ledger.header(prev) {
            return Ok(Some(header.clone()));
        }
        Ok(self.store.fetch_dblock_header(prev)?)
    }

    /// Anchors the acceptance window for ackable messages on `timestamp`.
    fn set_leader_timestamp(&mut self, timestamp: Timestamp) {
        self.leader_timestamp = timestamp;
        self.message_filter_timestamp =
            timestamp.saturating_sub_millis(self.config.filter_time_limit_ms / 2);
    }

    /// True once the entry was revealed, saved in a block or stored.
    fn entry_committed(&self, entry_hash: &Hash) -> bool {
        !self.replay.is_unique(ReplayNamespace::Reveal, entry_hash)
            || !self.replay.is_unique(ReplayNamespace::Block, entry_hash)
            || self.store.has_entry(entry_hash).unwrap_or(false)
    }

    fn add_to_holding(&mut self, msg: &Arc<Message>) {
        self.dependents.remove(&msg.msg_hash());
        if self.holding.add(Arc::clone(msg)) {
            metrics::record_holding_input();
            trace!(kind = %msg.kind(), hash = %short_hex(&msg.msg_hash()), "Added to holding");
        }
    }

    fn delete_from_holding(&mut self, msg_hash: &Hash, reason: &str) {
        let removed = self.holding.remove(msg_hash).is_some();
        let parked = self.dependents.remove(msg_hash).is_some();
        if removed || parked {
            metrics::record_holding_output();
            trace!(hash = %short_hex(msg_hash), reason, "Removed from holding");
        }
    }

    /// Schedules `msg` for re-execution after `factom_seconds`.
    fn repost(&mut self, msg: Arc<Message>, factom_seconds: u64) {
        let delay = self.config.factom_second().as_millis() as u64 * factom_seconds;
        let due = self.now().saturating_add_millis(delay);
        metrics::record_repost();
        self.reposts.push((due, msg));
    }

    fn send_invalid(&self, msg: &Arc<Message>) {
        if msg.mark_sent_invalid() {
            metrics::record_invalid_message();
            debug!(kind = %msg.kind(), hash = %short_hex(&msg.msg_hash()), "Rejected message");
            self.invalid_sink.reject(msg);
        }
    }

    fn send_out(&self, msg: &Arc<Message>) {
        self.broadcast.broadcast(msg);
    }

    fn publish_round(&self) {
        let status = self.round_status();
        metrics::record_round(
            status.position.db_height,
            status.position.minute,
            status.highest_saved,
        );
        self.round_tx.send_replace(status);
    }
}
