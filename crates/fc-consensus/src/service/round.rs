//! Rounds, barriers and blocks
//!
//! A height is built in minutes 0 through 9. Minute 0 opens with the DBSig
//! barrier: every lane's leader signs the previous block. Each minute closes
//! with the EOM barrier: every lane's leader issues an EOM. Completing the
//! minute-9 barrier moves the node to minute 10, where the block is sealed and
//! the node moves on to minute 0 of the next height.
//!
//! Saved blocks from the local database or from peers arrive as DBStates and
//! are applied strictly in height order.

use super::ConsensusEngine;
use crate::domain::{
    amount_delta, BlockWithEntries, CommitChain, CommitEntry, ConsensusError, ConsensusResult, DbState,
    Dependency, DirectoryBlockSignature, EcRecord, Eom, Heartbeat, Message, Payload,
    ReplayNamespace, RoundPosition, SealedBlock,
};
use crate::metrics;
use crate::ports::MissingRequest;
use shared_types::{short_hex, Entry, Hash, ZERO_HASH};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Where a DBState stands relative to the saved chain.
enum NextState {
    Valid,
    Future,
    Invalid,
}

impl ConsensusEngine {
    // === EOM BARRIER ===

    pub(crate) fn process_eom(&mut self, h: u32, vm: usize, eom: &Eom) -> ConsensusResult<bool> {
        if self.sync.dbsig {
            return Err(ConsensusError::EomDuringDbSig {
                height: h,
                minute: eom.minute,
            });
        }
        if self.sync.eom && eom.db_height != h {
            return Err(ConsensusError::EomHeightMismatch {
                open: h,
                got: eom.db_height,
            });
        }
        if eom.minute != self.position.minute {
            return Err(ConsensusError::EomMinuteMismatch {
                current: self.position.minute,
                got: eom.minute,
            });
        }
        if h > 0 && self.previous_header(h)?.is_none() {
            return Ok(false);
        }

        let Some(pl) = self.process_lists.get_mut(h) else {
            return Ok(false);
        };
        if !self.sync.eom {
            if self.sync.eom_processed != 0 {
                return Err(ConsensusError::EomRoundNotReset {
                    processed: self.sync.eom_processed,
                });
            }
            self.sync.eom = true;
            self.sync.eom_limit = pl.authorities().federated_count();
            self.sync.eom_minute = eom.minute;
            self.sync.eom_height = h;
        }
        if let Some(lane) = pl.lane_mut(vm) {
            lane.leader_minute += 1;
            lane.synced = true;
        }
        self.sync.eom_processed += 1;
        metrics::record_barrier("eom");
        debug!(
            height = h,
            minute = eom.minute,
            vm,
            processed = self.sync.eom_processed,
            limit = self.sync.eom_limit,
            "Processed EOM"
        );

        if self.sync.eom_processed >= self.sync.eom_limit {
            pl.end_of_minute(eom.minute + 1);
            info!(height = h, minute = eom.minute, "EOM barrier complete");
            self.send_heartbeat();
            self.move_state_to_height(h, self.position.minute + 1)?;
        }
        Ok(true)
    }

    /// Audit servers announce themselves once per minute.
    fn send_heartbeat(&self) {
        let h = self.position.db_height;
        let Some(pl) = self.leader_pl() else {
            return;
        };
        if !pl.authorities().is_audit(&self.identity.chain_id) {
            return;
        }
        let Some(last) = h.checked_sub(1).and_then(|prev| self.ledger.header(prev)) else {
            return;
        };
        let mut heartbeat = Heartbeat {
            timestamp: self.now(),
            db_height: h,
            minute: self.position.minute,
            identity: self.identity.chain_id,
            dblock_hash: last.key_mr(),
            signature: None,
        };
        let signing_bytes = Payload::Heartbeat(heartbeat.clone()).signing_bytes();
        heartbeat.signature = Some(self.signer.sign(&signing_bytes));
        self.send_out(&Message::local(Payload::Heartbeat(heartbeat)));
    }

    // === DBSIG BARRIER ===

    pub(crate) fn process_dbsig(
        &mut self,
        h: u32,
        vm: usize,
        dbsig: &DirectoryBlockSignature,
    ) -> ConsensusResult<bool> {
        let Some(previous) = self.previous_header(h)? else {
            return Ok(false);
        };
        if dbsig.header.body_mr != previous.body_mr {
            warn!(
                height = h,
                vm,
                expected = %short_hex(&previous.body_mr),
                got = %short_hex(&dbsig.header.body_mr),
                "DBSig signs a different previous block"
            );
            self.evict_dbsig(h, vm);
            return Ok(false);
        }
        let verified = match self.oracle.verify_authority_signature(
            &dbsig.header.marshal(),
            &dbsig.signature,
            dbsig.db_height,
        ) {
            Ok(verified) => verified,
            Err(err) => {
                warn!(height = h, vm, %err, "DBSig signature could not be checked");
                false
            }
        };
        let expected_key = self
            .process_lists
            .get(h)
            .and_then(|pl| pl.authorities().signing_key(&dbsig.server_identity));
        if !verified || expected_key != Some(dbsig.signature.public_key) {
            warn!(height = h, vm, "DBSig signature rejected");
            self.evict_dbsig(h, vm);
            return Ok(false);
        }

        if !self.sync.dbsig {
            if self.sync.dbsig_processed != 0 {
                return Err(ConsensusError::DbSigRoundNotReset {
                    processed: self.sync.dbsig_processed,
                });
            }
            if self.sync.eom {
                return Err(ConsensusError::DbSigDuringEom { height: h });
            }
            if self.sync.eom_processed > 0 {
                return Err(ConsensusError::DbSigWhileSyncing);
            }
            self.sync.dbsig = true;
            self.sync.dbsig_limit = self
                .process_lists
                .get(h)
                .map_or(0, |pl| pl.authorities().federated_count());
        }

        let Some(pl) = self.process_lists.get_mut(h) else {
            return Ok(false);
        };
        if let Some(lane) = pl.lane_mut(vm) {
            lane.synced = true;
            lane.signed = true;
        }
        self.sync.dbsig_processed += 1;
        metrics::record_barrier("dbsig");
        debug!(
            height = h,
            vm,
            processed = self.sync.dbsig_processed,
            limit = self.sync.dbsig_limit,
            "Processed DBSig"
        );

        if self.sync.dbsig_processed >= self.sync.dbsig_limit {
            let coinbase_timestamp = pl
                .lane(0)
                .and_then(|lane| lane.slot(0))
                .and_then(|slot| match slot.msg.payload() {
                    Payload::DirectoryBlockSignature(first) => Some(first.timestamp),
                    _ => None,
                })
                .unwrap_or(dbsig.timestamp);
            pl.coinbase_timestamp = Some(coinbase_timestamp);
            pl.unsync_all();
            self.set_leader_timestamp(coinbase_timestamp);
            self.sync.dbsig = false;
            self.sync.between_blocks = false;
            info!(height = h, "DBSig barrier complete");
            self.publish_round();
        }
        Ok(true)
    }

    /// Drops a rejected DBSig from slot 0 and asks peers for the right one.
    fn evict_dbsig(&mut self, h: u32, vm: usize) {
        self.remove_from_pl(h, vm, 0, "bad DBSig");
        self.requester.request(MissingRequest::Slot {
            db_height: h,
            vm_index: vm,
            height: 0,
        });
    }

    /// Issues this node's DBSig for lane `vm` at height `h`, at most once.
    pub(crate) fn send_dbsig(&mut self, h: u32, vm: usize) -> ConsensusResult<()> {
        if self.ledger.highest_saved().is_some_and(|saved| h <= saved) || self.position.minute != 0
        {
            return Ok(());
        }
        let Some(pl) = self.process_lists.get(h) else {
            return Ok(());
        };
        if pl.dbsig_already_sent {
            return Ok(());
        }
        let Some(lane) = pl.lane(vm) else {
            return Ok(());
        };
        if lane.height > 0 || lane.signed {
            return Ok(());
        }
        if pl.get_virtual_servers(lane.leader_minute, &self.identity.chain_id) != Some(vm) {
            return Ok(());
        }

        let Some(msg) = self.create_dbsig(h, vm)? else {
            debug!(height = h, "No previous block to sign yet");
            return Ok(());
        };
        info!(height = h, vm, "Issuing DBSig");
        self.leader_execute_dbsig(&msg)?;

        if let Some(pl) = self.process_lists.get_mut(h) {
            pl.dbsig_already_sent = true;
            if let Some(lane) = pl.lane_mut(vm) {
                lane.signed = true;
            }
        }
        Ok(())
    }

    /// Signs the previous block's header for lane `vm` at height `h`.
    pub(crate) fn create_dbsig(&self, h: u32, vm: usize) -> ConsensusResult<Option<Arc<Message>>> {
        let Some(previous) = self.previous_header(h)? else {
            return Ok(None);
        };
        let dbsig = DirectoryBlockSignature {
            timestamp: self.now(),
            db_height: h,
            vm_index: vm,
            server_identity: self.identity.chain_id,
            signature: self.signer.sign(&previous.marshal()),
            header: previous,
        };
        let msg = Message::local(Payload::DirectoryBlockSignature(dbsig));
        msg.set_vm_index(vm);
        Ok(Some(msg))
    }

    // === ROUND MOVES ===

    /// Moves to `(h, m)`. Only the next minute or minute 0 of the next height
    /// are reachable; anything else is fatal.
    pub fn move_state_to_height(&mut self, h: u32, m: u8) -> ConsensusResult<()> {
        let target = RoundPosition::new(h, m);
        if target == self.position {
            return Ok(());
        }
        if !self.position.can_move_to(target) {
            return Err(ConsensusError::NonSequentialMove {
                from_height: self.position.db_height,
                from_minute: self.position.minute,
                to_height: h,
                to_minute: m,
            });
        }

        self.end_minute();
        let new_height = h != self.position.db_height;
        self.position = target;
        if new_height {
            self.enter_height(h);
        }

        let vm = self
            .process_lists
            .get(h)
            .and_then(|pl| pl.get_virtual_servers(m.min(9), &self.identity.chain_id));
        self.leader = vm.is_some();
        self.leader_vm = vm.unwrap_or(0);
        debug!(height = h, minute = m, leader = self.leader, vm = self.leader_vm, "Moved round");
        self.publish_round();
        self.begin_minute()
    }

    fn enter_height(&mut self, h: u32) {
        if self.balances.temporary_height() != h {
            self.balances.reset_temporary(h);
        }
        let authorities = self.authorities.clone();
        let pl = self.process_lists.ensure(h, &authorities);
        if pl.authorities() != &authorities {
            pl.set_authorities(authorities.clone());
        }
        self.oracle.update_authorities(h, &authorities);

        let keep_from = h.saturating_sub(self.config.keep_process_lists);
        let dropped = self.process_lists.trim_below(keep_from);
        if dropped > 0 {
            debug!(dropped, keep_from, "Trimmed process lists");
        }
        self.ledger.trim_below(keep_from.saturating_sub(1));
        self.acks.retain(|_, ack| ack.db_height >= h);
    }

    fn end_minute(&mut self) {
        self.last_review = None;
    }

    fn begin_minute(&mut self) -> ConsensusResult<()> {
        let h = self.position.db_height;
        let minute = self.position.minute;
        let limit = self
            .leader_pl()
            .map_or(0, |pl| pl.authorities().federated_count());
        if let Some(pl) = self.process_lists.get_mut(h) {
            pl.unsync_all();
        }
        self.sync.reset_eom(limit);
        let next_authorities = self.authorities.clone();
        self.process_lists.ensure(h + 1, &next_authorities);

        match minute {
            0 => {
                self.sync.reset_dbsig(limit);
                for released in self.dependents.release_heights_up_to(h) {
                    self.repost(released, 0);
                }
                if self.leader && self.run_leader {
                    self.send_dbsig(h, self.leader_vm)?;
                }
            }
            1 => self.mark_previous_saved(),
            10 => {
                self.sync.between_blocks = true;
                self.seal_block()?;
            }
            _ => {}
        }
        Ok(())
    }

    /// The previous block is final once the next height has run a minute.
    fn mark_previous_saved(&mut self) {
        let Some(prev) = self.position.db_height.checked_sub(1) else {
            return;
        };
        if self.ledger.is_saved(prev) || self.ledger.header(prev).is_none() {
            return;
        }
        self.ledger.mark_saved(prev);
        self.dbstates.trim(self.ledger.highest_saved());
        info!(height = prev, "Block saved");
        self.publish_round();
    }

    /// Seals the current process list into a block and moves to the next height.
    fn seal_block(&mut self) -> ConsensusResult<()> {
        let h = self.position.db_height;
        let previous = self.previous_header(h)?;
        let prev_key_mr = previous.as_ref().map_or(ZERO_HASH, |header| header.key_mr());
        let Some(pl) = self.process_lists.get(h) else {
            return Err(ConsensusError::Assembly {
                height: h,
                reason: "no process list".to_string(),
            });
        };
        let candidate = pl.candidate(prev_key_mr);
        let mut entries: Vec<Entry> = pl.new_entries.values().cloned().collect();
        entries.sort_by_cached_key(Entry::hash);
        let admin_changes = pl.admin_changes.clone();

        let sealed = self
            .assembler
            .seal(candidate, previous.as_ref())
            .map_err(|err| ConsensusError::Assembly {
                height: h,
                reason: err.to_string(),
            })?;
        info!(
            height = h,
            key_mr = %short_hex(&sealed.header.key_mr()),
            entries = entries.len(),
            "Sealed directory block"
        );
        self.ledger.record_completed(sealed.header.clone());
        self.write_back.write_block(BlockWithEntries {
            block: sealed,
            entries,
        });

        self.balances.promote_temporary(h + 1);
        let now = self.now();
        self.commits.remove_expired(now);
        for change in &admin_changes {
            self.authorities.apply(change);
        }
        self.move_state_to_height(h + 1, 0)
    }

    // === DBSTATES ===

    pub(crate) fn follower_execute_dbstate(
        &mut self,
        msg: &Arc<Message>,
        state: &DbState,
    ) -> ConsensusResult<()> {
        let h = state.db_height();
        if self.ledger.is_saved(h) {
            return Ok(());
        }
        match self.valid_next(state)? {
            NextState::Future => {
                if self.dbstates.insert(h, Arc::clone(msg)) {
                    debug!(height = h, "Buffered DBState");
                }
                return Ok(());
            }
            NextState::Invalid => {
                if state.is_last && msg.is_local() {
                    return Err(ConsensusError::InvalidLastDbState(h));
                }
                warn!(height = h, "DBState does not extend the saved chain");
                return Ok(());
            }
            NextState::Valid => {}
        }
        if state.is_last {
            self.db_finished_at = Some(self.now());
            info!(height = h, "Finished loading blocks");
        }
        self.apply_dbstate(msg, state)
    }

    fn valid_next(&self, state: &DbState) -> ConsensusResult<NextState> {
        let h = state.db_height();
        if h > self.ledger.next_to_save() {
            return Ok(NextState::Future);
        }
        if h == 0 {
            return Ok(NextState::Valid);
        }
        Ok(match self.previous_header(h)? {
            None => NextState::Future,
            Some(prev) if prev.key_mr() == state.block.block.header.prev_key_mr => {
                NextState::Valid
            }
            Some(_) => NextState::Invalid,
        })
    }

    fn apply_dbstate(&mut self, msg: &Arc<Message>, state: &DbState) -> ConsensusResult<()> {
        let block = &state.block.block;
        let h = block.db_height();

        if let Some(own) = self.ledger.header(h) {
            if own.key_mr() != block.header.key_mr() {
                warn!(height = h, "DBState differs from the block sealed here");
                return Ok(());
            }
            self.ledger.mark_saved(h);
            self.dbstates.trim(self.ledger.highest_saved());
            info!(height = h, "Block confirmed by DBState");
            self.publish_round();
            return Ok(());
        }

        let replayed = block
            .body
            .factoid_transactions
            .iter()
            .find(|tx| !tx.is_coinbase() && !self.replay.is_unique(ReplayNamespace::Block, &tx.txid()));
        if let Some(tx) = replayed {
            warn!(height = h, txid = %short_hex(&tx.txid()), "DBState replays a transaction");
            return Ok(());
        }

        let timestamp = block.header.timestamp;
        let entry_hashes = block.entry_hashes();
        for entry_hash in &entry_hashes {
            self.replay.record(ReplayNamespace::Block, entry_hash, timestamp);
            self.replay.record(ReplayNamespace::Internal, entry_hash, timestamp);
            self.commits.delete(entry_hash);
        }
        for tx in &block.body.factoid_transactions {
            self.replay.record(ReplayNamespace::Block, &tx.txid(), tx.timestamp);
        }
        self.apply_block_balances(block);
        self.track_unrevealed_commits(block, &entry_hashes);

        self.ledger.record_completed(block.header.clone());
        self.ledger.mark_saved(h);
        self.dbstates.trim(self.ledger.highest_saved());
        if !msg.is_local() {
            self.write_back.write_block(state.block.clone());
        }
        for change in &block.body.admin_changes {
            self.authorities.apply(change);
        }
        info!(
            height = h,
            key_mr = %short_hex(&block.header.key_mr()),
            local = msg.is_local(),
            "Applied DBState"
        );

        if h >= self.position.db_height {
            self.move_state_to_height(h + 1, 0)?;
        } else {
            self.publish_round();
        }
        Ok(())
    }

    fn apply_block_balances(&self, block: &SealedBlock) {
        for tx in &block.body.factoid_transactions {
            for input in &tx.inputs {
                self.balances
                    .adjust_f(false, input.address, -amount_delta(input.amount));
            }
            for output in &tx.outputs {
                self.balances
                    .adjust_f(false, output.address, amount_delta(output.amount));
            }
            for purchase in &tx.ec_outputs {
                self.balances
                    .adjust_e(false, purchase.address, amount_delta(purchase.amount));
            }
        }
        for record in &block.body.ec_records {
            let (address, credits) = match record {
                EcRecord::CommitChain {
                    ec_address,
                    credits,
                    ..
                }
                | EcRecord::CommitEntry {
                    ec_address,
                    credits,
                    ..
                } => (ec_address, credits),
                EcRecord::MinuteNumber(_) => continue,
            };
            self.balances
                .adjust_e(false, *address, -i64::from(*credits));
        }
    }

    /// Commits saved in a block whose entries are revealed in a later block.
    fn track_unrevealed_commits(&mut self, block: &SealedBlock, entry_hashes: &[Hash]) {
        let revealed: HashSet<_> = entry_hashes.iter().collect();
        let timestamp = block.header.timestamp;
        for record in &block.body.ec_records {
            let payload = match record {
                EcRecord::CommitChain {
                    entry_hash,
                    chain_id,
                    ec_address,
                    credits,
                } => Payload::CommitChain(CommitChain {
                    timestamp,
                    chain_id: *chain_id,
                    entry_hash: *entry_hash,
                    credits: *credits,
                    ec_address: *ec_address,
                }),
                EcRecord::CommitEntry {
                    entry_hash,
                    ec_address,
                    credits,
                } => Payload::CommitEntry(CommitEntry {
                    timestamp,
                    entry_hash: *entry_hash,
                    credits: *credits,
                    ec_address: *ec_address,
                }),
                EcRecord::MinuteNumber(_) => continue,
            };
            let commit = Message::new(payload);
            let entry_hash = commit.hash();
            if revealed.contains(&entry_hash)
                || !self.replay.is_unique(ReplayNamespace::Reveal, &entry_hash)
            {
                continue;
            }
            self.commits.put(entry_hash, commit);
            for released in self.dependents.release(&Dependency::Commit(entry_hash)) {
                self.repost(released, 0);
            }
        }
    }
}
