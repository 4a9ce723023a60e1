//! The engine tick
//!
//! One call to [`ConsensusEngine::process`] gates leadership after the
//! database load, applies buffered DBStates, runs due reposts, drains the
//! inbound queues, evicts expired replay and commit state and, when leading,
//! reviews holding.

use super::classify::{DEPENDENT, DROP, FOLLOWER, HOLD};
use super::dispatch::relayable;
use super::{ConsensusEngine, ExecutionTrail};
use crate::domain::{
    ConsensusResult, Message, MessageKind, Payload, ReplayNamespace, RoundPosition,
};
use crate::metrics;
use crate::ports::QueueKind;
use rand::Rng;
use shared_types::{short_hex, Timestamp};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, trace};

/// Prioritized messages are drawn twice as often as the other queues.
const QUEUE_WEIGHTS: [QueueKind; 4] = [
    QueueKind::Prioritized,
    QueueKind::Prioritized,
    QueueKind::Messages,
    QueueKind::Acks,
];

impl ConsensusEngine {
    /// Runs one tick. Returns true if anything was executed.
    ///
    /// Only fatal protocol violations and port failures are returned as errors.
    pub fn process(&mut self) -> ConsensusResult<bool> {
        let started = Instant::now();
        let now = self.now();

        self.update_leader_gate(now)?;
        let mut progress = self.apply_buffered_dbstates()?;
        progress |= self.drain_reposts(now)?;
        progress |= self.drain_queues()?;
        self.evict_expired(now);

        if self.run_leader {
            self.review_holding(now)?;
            let batch = std::mem::take(&mut self.x_review);
            for msg in batch {
                if self.target_vm(&msg) == self.leader_vm || !msg.needs_ack() {
                    progress |= self.execute(&msg)?;
                }
            }
        }
        progress |= self.update_state()?;

        metrics::record_tick_latency(started.elapsed().as_secs_f64());
        Ok(progress)
    }

    /// Turns leadership on once the database load has settled.
    fn update_leader_gate(&mut self, now: Timestamp) -> ConsensusResult<()> {
        if !self.run_leader {
            let Some(finished) = self.db_finished_at else {
                return Ok(());
            };
            if now.millis_since(finished) < self.config.start_delay_ms {
                return Ok(());
            }
            self.run_leader = true;
            self.ignore_missing = true;
            self.ignore_missing_until = Some(now.saturating_add_millis(self.config.start_delay_ms));
            info!(
                height = self.position.db_height,
                minute = self.position.minute,
                leader = self.leader,
                "Running as leader"
            );
            self.publish_round();
            if self.leader && self.position.minute == 0 {
                self.send_dbsig(self.position.db_height, self.leader_vm)?;
            }
        } else if self.ignore_missing
            && self.ignore_missing_until.map_or(true, |until| now >= until)
        {
            self.ignore_missing = false;
            debug!("No longer ignoring missing messages");
        }
        Ok(())
    }

    /// Applies buffered DBStates that now extend the saved chain.
    fn apply_buffered_dbstates(&mut self) -> ConsensusResult<bool> {
        let mut progress = false;
        loop {
            let next = self.ledger.next_to_save();
            let Some(msg) = self.dbstates.take(next) else {
                break;
            };
            self.execute(&msg)?;
            if self.ledger.next_to_save() == next {
                break;
            }
            progress = true;
        }
        self.dbstates.trim(self.ledger.highest_saved());
        Ok(progress)
    }

    fn drain_reposts(&mut self, now: Timestamp) -> ConsensusResult<bool> {
        if self.reposts.is_empty() {
            return Ok(false);
        }
        let (due, pending): (Vec<_>, Vec<_>) = std::mem::take(&mut self.reposts)
            .into_iter()
            .partition(|(at, _)| *at <= now);
        self.reposts = pending;
        let mut progress = false;
        for (_, msg) in due {
            progress |= self.execute(&msg)?;
        }
        Ok(progress)
    }

    fn drain_queues(&mut self) -> ConsensusResult<bool> {
        let mut progress = false;
        while let Some(msg) = self.next_inbound() {
            progress |= self.execute(&msg)?;
        }
        Ok(progress)
    }

    /// Weighted pick across the non-empty queues.
    fn next_inbound(&mut self) -> Option<Arc<Message>> {
        let first = QUEUE_WEIGHTS[rand::thread_rng().gen_range(0..QUEUE_WEIGHTS.len())];
        let order = [
            first,
            QueueKind::Prioritized,
            QueueKind::Messages,
            QueueKind::Acks,
        ];
        order
            .into_iter()
            .find_map(|kind| self.inbound.receiver(kind).try_recv().ok())
    }

    // === EVICTION ===

    /// Forgets replay records, commits and dependents older than the window.
    /// Runs at most once per review interval, whatever holding contains.
    fn evict_expired(&mut self, now: Timestamp) {
        if self
            .last_eviction
            .is_some_and(|last| now.millis_since(last) < self.config.review_interval_ms)
        {
            return;
        }
        self.last_eviction = Some(now);

        self.commits.remove_expired(now);
        let replayed = self.replay.evict(now);
        let dependents = self
            .dependents
            .expire(now.saturating_sub_millis(self.config.filter_time_limit_ms));
        if replayed > 0 || dependents > 0 {
            debug!(replayed, dependents, "Evicted expired state");
        }
    }

    // === HOLDING REVIEW ===

    /// Prunes holding and selects held messages to re-execute this tick.
    fn review_holding(&mut self, now: Timestamp) -> ConsensusResult<()> {
        if !self.x_review.is_empty() {
            return Ok(());
        }
        if self
            .last_review
            .is_some_and(|last| now.millis_since(last) < self.config.review_interval_ms)
        {
            return Ok(());
        }
        self.last_review = Some(now);
        if self.holding.is_empty() {
            return Ok(());
        }

        let acked: Vec<_> = self
            .acks
            .keys()
            .filter(|hash| self.holding.contains(hash))
            .copied()
            .collect();
        for msg_hash in acked {
            if let Some(held) = self.holding.get(&msg_hash).cloned() {
                let mut trail = ExecutionTrail::new();
                self.follower_execute(&held, &mut trail)?;
            }
        }

        let saved = self.ledger.highest_saved().unwrap_or(0);
        let lagging = self.highest_known.saturating_sub(saved) > self.config.holding_height_lag_limit;
        let window_start = now.saturating_sub_millis(self.config.filter_time_limit_ms);

        for msg in self.holding.snapshot() {
            let msg_hash = msg.msg_hash();
            if lagging {
                self.delete_from_holding(&msg_hash, "height lag");
                continue;
            }
            let expired = msg.timestamp() < window_start
                || (msg.needs_ack() && msg.timestamp() < self.message_filter_timestamp)
                || (msg.is_commit() && self.commits.is_expired(&msg, now));
            if expired {
                self.delete_from_holding(&msg_hash, "expired");
                continue;
            }
            if self.is_stale(&msg, saved) {
                self.delete_from_holding(&msg_hash, "stale");
                continue;
            }

            let verdict = self.classify_detailed(&msg);
            match verdict.execute {
                DROP => {
                    self.delete_from_holding(&msg_hash, "invalid in review");
                    continue;
                }
                HOLD => {
                    // Peers may have missed it the first time.
                    if verdict.send == FOLLOWER && relayable(&msg) {
                        self.send_out(&msg);
                    }
                    continue;
                }
                DEPENDENT => {
                    self.holding.remove(&msg_hash);
                    if let Some(dependency) = verdict.dependency {
                        self.dependents.add(dependency, Arc::clone(&msg));
                    }
                    continue;
                }
                _ => {}
            }

            let block_replay = match msg.payload() {
                Payload::FactoidTransaction(tx) => {
                    !self.replay.is_unique(ReplayNamespace::Block, &tx.txid())
                }
                Payload::CommitChain(_) | Payload::CommitEntry(_) => {
                    !self.replay.is_unique(ReplayNamespace::Block, &msg.hash())
                }
                _ => false,
            };
            if block_replay {
                self.delete_from_holding(&msg_hash, "already in a block");
                continue;
            }
            if let Payload::RevealEntry(_) = msg.payload() {
                if !self.leader || self.target_vm(&msg) != self.leader_vm {
                    continue;
                }
            }

            trace!(kind = %msg.kind(), hash = %short_hex(&msg_hash), "Selected for review");
            self.x_review.push(msg);
            if self.x_review.len() >= self.config.max_review_batch {
                break;
            }
        }
        Ok(())
    }

    /// Messages overtaken by the round or by saved blocks.
    fn is_stale(&mut self, msg: &Message, saved: u32) -> bool {
        match msg.payload() {
            Payload::Eom(eom) => {
                if RoundPosition::new(eom.db_height, eom.minute) < self.position {
                    return true;
                }
                if !msg.is_local() && eom.db_height > saved {
                    self.highest_known = self.highest_known.max(eom.db_height);
                }
                false
            }
            Payload::DirectoryBlockSignature(dbsig) => {
                let h = self.position.db_height;
                if dbsig.db_height < h || (dbsig.db_height == h && self.position.minute > 0) {
                    return true;
                }
                if !msg.is_local() && dbsig.db_height > saved {
                    self.highest_known = self.highest_known.max(dbsig.db_height);
                }
                false
            }
            Payload::DbState(state) => self.ledger.is_saved(state.db_height()),
            Payload::CommitChain(_) | Payload::CommitEntry(_) | Payload::RevealEntry(_) => {
                let entry_hash = msg.hash();
                if self.entry_committed(&entry_hash) {
                    if msg.kind() == MessageKind::RevealEntry {
                        self.commits.delete(&entry_hash);
                    }
                    return true;
                }
                false
            }
            _ => false,
        }
    }
}
