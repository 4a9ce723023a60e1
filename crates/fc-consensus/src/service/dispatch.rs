//! Execution of classified messages
//!
//! Leader execution mints an ack and places the message in the leader's own
//! lane. Follower execution waits for the leader's ack and places the pair at
//! the slot the ack names. Lane processing then applies the slots in order.

use super::classify::{DEPENDENT, DROP, FOLLOWER, HOLD, LEADER_EXECUTE};
use super::ConsensusEngine;
use crate::domain::{
    amount_delta, Ack, AdminChange, ConsensusError, ConsensusResult, DataResponse, Dependency, EcRecord,
    EntryBlock, Eom, FactoidTransaction, Message, MessageKind, MissingMessageResponse, Payload,
    ProcessList, ReplayNamespace, Slot,
};
use crate::metrics;
use crate::ports::MissingRequest;
use shared_types::{hash_of, sha256, short_hex, Address, Entry, Hash, Timestamp, ZERO_HASH};
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, trace, warn};

/// Repeat hashes of the messages currently being executed.
///
/// Re-entering a message already on the trail is a fatal
/// [`ConsensusError::RecursiveExecute`].
#[derive(Debug, Default)]
pub struct ExecutionTrail {
    visited: HashSet<Hash>,
}

impl ExecutionTrail {
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn enter(&mut self, msg: &Message) -> ConsensusResult<()> {
        if self.visited.insert(msg.repeat_hash()) {
            Ok(())
        } else {
            Err(ConsensusError::RecursiveExecute(msg.repeat_hash()))
        }
    }

    pub(crate) fn leave(&mut self, msg: &Message) {
        self.visited.remove(&msg.repeat_hash());
    }

    pub fn depth(&self) -> usize {
        self.visited.len()
    }
}

/// First eight bytes of the node salt.
fn ack_salt(salt: &Hash) -> [u8; 8] {
    let mut out = [0u8; 8];
    out.copy_from_slice(&salt[..8]);
    out
}

/// Per-ack salt number: leading four bytes of `sha256(salt || timestamp)`.
fn salt_number(salt: &Hash, timestamp: Timestamp) -> u32 {
    let mut data = salt.to_vec();
    data.extend_from_slice(&timestamp.millis().to_be_bytes());
    let digest = sha256(&data);
    u32::from_be_bytes([digest[0], digest[1], digest[2], digest[3]])
}

/// Repeat hash an ack has once wrapped in a message.
fn ack_repeat_hash(ack: &Ack) -> Hash {
    let mut unsigned = ack.clone();
    unsigned.signature = None;
    hash_of(&Payload::Ack(unsigned))
}

fn admin_change(payload: &Payload) -> Option<AdminChange> {
    match payload {
        Payload::AddServer(add) => Some(AdminChange::AddServer {
            id: add.server_id,
            kind: add.kind,
            signing_key: add.signing_key,
        }),
        Payload::RemoveServer(remove) => Some(AdminChange::RemoveServer {
            id: remove.server_id,
            kind: remove.kind,
        }),
        Payload::ChangeServerKey(change) => Some(AdminChange::ChangeServerKey {
            id: change.server_id,
            signing_key: change.new_key,
        }),
        _ => None,
    }
}

/// Point-to-point replies and local templates are never gossiped from here.
pub(crate) fn relayable(msg: &Message) -> bool {
    !msg.is_local()
        && !matches!(
            msg.kind(),
            MessageKind::DbState | MessageKind::MissingMessageResponse | MessageKind::DataResponse
        )
}

impl ConsensusEngine {
    // === EXECUTION ENTRY POINTS ===

    /// Classifies and executes one message.
    ///
    /// Returns true when the message was consumed (executed or rejected) and
    /// false when it was held or parked.
    pub fn execute(&mut self, msg: &Arc<Message>) -> ConsensusResult<bool> {
        let mut trail = ExecutionTrail::new();
        self.execute_with(msg, &mut trail)
    }

    pub fn execute_with(
        &mut self,
        msg: &Arc<Message>,
        trail: &mut ExecutionTrail,
    ) -> ConsensusResult<bool> {
        if msg.msg_hash() == ZERO_HASH {
            return Ok(false);
        }

        let verdict = self.classify_detailed(msg);
        trace!(
            kind = %msg.kind(),
            hash = %short_hex(&msg.msg_hash()),
            send = verdict.send,
            execute = verdict.execute,
            "Classified message"
        );

        if verdict.send == FOLLOWER && relayable(msg) {
            self.send_out(msg);
        }
        if msg.is_entry_related() && verdict.execute >= HOLD {
            self.add_to_holding(msg);
        }

        match verdict.execute {
            LEADER_EXECUTE => {
                self.leader_execute(msg, trail)?;
                Ok(true)
            }
            FOLLOWER => {
                self.follower_execute(msg, trail)?;
                Ok(true)
            }
            HOLD => {
                self.add_to_holding(msg);
                Ok(false)
            }
            DEPENDENT => {
                self.holding.remove(&msg.msg_hash());
                if let Some(dependency) = verdict.dependency {
                    if let Dependency::Height(h) = dependency {
                        self.highest_known = self.highest_known.max(h + 1);
                    }
                    if self.dependents.add(dependency, Arc::clone(msg)) {
                        trace!(?dependency, kind = %msg.kind(), "Parked dependent message");
                    }
                }
                Ok(false)
            }
            _ => {
                self.delete_from_holding(&msg.msg_hash(), "invalid");
                self.send_invalid(msg);
                Ok(true)
            }
        }
    }

    fn leader_execute(
        &mut self,
        msg: &Arc<Message>,
        trail: &mut ExecutionTrail,
    ) -> ConsensusResult<()> {
        trail.enter(msg)?;
        metrics::record_execution("leader", msg.kind().as_str());
        let result = match msg.payload() {
            Payload::Eom(_) => self.leader_execute_eom(msg),
            Payload::DirectoryBlockSignature(_) => self.leader_execute_dbsig(msg),
            Payload::CommitChain(_) | Payload::CommitEntry(_) => self.leader_execute_commit(msg),
            Payload::RevealEntry(_) => self.leader_execute_reveal(msg),
            _ => self.leader_execute_msg(msg),
        };
        trail.leave(msg);
        result
    }

    pub(crate) fn follower_execute(
        &mut self,
        msg: &Arc<Message>,
        trail: &mut ExecutionTrail,
    ) -> ConsensusResult<()> {
        trail.enter(msg)?;
        metrics::record_execution("follower", msg.kind().as_str());
        let result = match msg.payload() {
            Payload::Eom(_) => self.follower_execute_eom(msg),
            Payload::Ack(ack) => self.follower_execute_ack(msg, ack, trail),
            Payload::CommitChain(_) | Payload::CommitEntry(_) => self.follower_execute_commit(msg),
            Payload::RevealEntry(_) => self.follower_execute_reveal(msg),
            Payload::DbState(state) => self.follower_execute_dbstate(msg, state),
            Payload::MissingMessageResponse(mmr) => self.follower_execute_mmr(msg, mmr, trail),
            Payload::DataResponse(response) => self.follower_execute_data(response),
            Payload::Heartbeat(heartbeat) => {
                debug!(
                    from = %short_hex(&heartbeat.identity),
                    height = heartbeat.db_height,
                    minute = heartbeat.minute,
                    "Heartbeat"
                );
                Ok(())
            }
            _ => self.follower_execute_msg(msg),
        };
        trail.leave(msg);
        result
    }

    // === LEADER EXECUTION ===

    /// Acks `msg` in the leader's lane, gossips the ack and places the pair.
    fn leader_execute_msg(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        if !self.leader_lane().is_some_and(|lane| lane.is_caught_up()) {
            self.repost(Arc::clone(msg), 1);
            return Ok(());
        }
        let now = self.now();
        if !self.replay.is_valid(
            ReplayNamespace::Internal,
            &msg.repeat_hash(),
            msg.timestamp(),
            now,
        ) {
            self.delete_from_holding(&msg.msg_hash(), "replay");
            return Ok(());
        }
        let ack = self.new_ack(msg, self.leader_vm);
        self.acks.insert(msg.msg_hash(), ack.clone());
        self.send_message_and_ack(msg, &ack);
        self.add_to_process_list(ack, msg)
    }

    fn leader_execute_eom(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        if !msg.is_local() {
            return self.follower_execute_eom(msg);
        }
        let minute = self.position.minute;
        let vm = self.leader_vm;
        let Some(lane) = self.leader_lane() else {
            return Ok(());
        };
        if minute > 9
            || lane.eom_minute_issued == Some(minute + 1)
            || !lane.is_caught_up()
            || lane.synced
        {
            self.repost(Arc::clone(msg), 1);
            return Ok(());
        }
        let h = self.position.db_height;
        if let Some(lane) = self
            .process_lists
            .get_mut(h)
            .and_then(|pl| pl.lane_mut(vm))
        {
            lane.eom_minute_issued = Some(minute + 1);
        }
        self.delete_from_holding(&msg.msg_hash(), "eom issued");

        let mut eom = Eom {
            timestamp: self.now(),
            db_height: h,
            vm_index: vm,
            minute,
            chain_id: self.identity.chain_id,
            signature: None,
        };
        eom.signature = Some(self.signer.sign(&eom.signing_bytes()));
        let signed = Message::new(Payload::Eom(eom));
        signed.set_vm_index(vm);

        let ack = self.new_ack(&signed, vm);
        self.acks.insert(signed.msg_hash(), ack.clone());
        debug!(height = h, minute, vm, "Issued EOM");
        self.send_out(&signed);
        self.send_message_and_ack(&signed, &ack);
        self.add_to_process_list(ack, &signed)
    }

    pub(crate) fn leader_execute_dbsig(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        let Payload::DirectoryBlockSignature(dbsig) = msg.payload() else {
            return Ok(());
        };
        if !msg.is_local() || dbsig.db_height != self.position.db_height {
            return self.follower_execute_msg(msg);
        }
        let Some(lane) = self
            .process_lists
            .get(dbsig.db_height)
            .and_then(|pl| pl.lane(dbsig.vm_index))
        else {
            return Ok(());
        };
        if lane.height > 0 || lane.is_filled(0) {
            debug!(height = dbsig.db_height, vm = dbsig.vm_index, "DBSig slot already used");
            return Ok(());
        }
        let now = self.now();
        if !self.replay.is_valid(
            ReplayNamespace::Internal,
            &msg.repeat_hash(),
            msg.timestamp(),
            now,
        ) {
            self.delete_from_holding(&msg.msg_hash(), "replay");
            return Ok(());
        }
        let ack = self.new_ack(msg, dbsig.vm_index);
        self.acks.insert(msg.msg_hash(), ack.clone());
        self.send_message_and_ack(msg, &ack);
        self.add_to_process_list(ack, msg)
    }

    fn leader_execute_commit(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        if !self.leader_lane().is_some_and(|lane| lane.is_caught_up()) {
            self.repost(Arc::clone(msg), 1);
            return Ok(());
        }
        let entry_hash = msg.hash();
        if !self.commits.is_highest(&entry_hash, msg) {
            self.delete_from_holding(&msg.msg_hash(), "outbid commit");
            return Ok(());
        }
        self.leader_execute_msg(msg)?;
        if let Some(reveal) = self
            .holding
            .find(MessageKind::RevealEntry, &entry_hash)
            .cloned()
        {
            self.send_out(&reveal);
        }
        Ok(())
    }

    fn leader_execute_reveal(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        if !self.leader_lane().is_some_and(|lane| lane.is_caught_up()) {
            self.repost(Arc::clone(msg), 1);
            return Ok(());
        }
        let ack = self.new_ack(msg, self.leader_vm);
        self.acks.insert(msg.msg_hash(), ack.clone());
        self.send_message_and_ack(msg, &ack);
        self.add_to_process_list(ack, msg)?;
        if self.acks.contains_key(&msg.msg_hash()) {
            self.follower_execute_reveal(msg)?;
        }
        Ok(())
    }

    /// Mints the ack for the next slot of lane `vm` at the leader height.
    fn new_ack(&self, msg: &Arc<Message>, vm: usize) -> Ack {
        let h = self.position.db_height;
        let lane = self.process_lists.get(h).and_then(|pl| pl.lane(vm));
        let (height, prev, minute) = match lane {
            Some(lane) => (
                lane.list.len(),
                lane.ack_before(lane.list.len()).cloned(),
                lane.leader_minute,
            ),
            None => (0, None, self.position.minute),
        };
        let now = self.now();
        let mut ack = Ack {
            timestamp: now,
            salt: ack_salt(&self.identity.salt),
            salt_number: salt_number(&self.identity.salt, now),
            db_height: h,
            vm_index: vm,
            minute,
            height: height as u32,
            serial_hash: Ack::serial_after(prev.as_ref(), &msg.msg_hash()),
            message_hash: msg.msg_hash(),
            leader_chain_id: self.identity.chain_id,
            signature: None,
        };
        ack.signature = Some(self.signer.sign(&ack.signing_bytes()));
        msg.set_vm_index(vm);
        msg.set_minute(minute);
        msg.set_leader_chain_id(self.identity.chain_id);
        metrics::record_ack("issued");
        trace!(height = h, vm, slot = height, "Minted ack");
        ack
    }

    /// Relayable messages already went out when they were classified, so
    /// only local ones are sent here. The ack always follows its message.
    fn send_message_and_ack(&self, msg: &Arc<Message>, ack: &Ack) {
        if !relayable(msg) {
            self.send_out(msg);
        }
        self.send_out(&Message::local(Payload::Ack(ack.clone())));
    }

    // === FOLLOWER EXECUTION ===

    /// Holds `msg` and places it once its ack is known.
    fn follower_execute_msg(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        self.add_to_holding(msg);
        let Some(ack) = self.acks.get(&msg.msg_hash()).cloned() else {
            return Ok(());
        };
        if !self.process_lists.contains(ack.db_height) {
            return Ok(());
        }
        msg.set_vm_index(ack.vm_index);
        msg.set_leader_chain_id(ack.leader_chain_id);
        msg.set_minute(ack.minute);
        self.add_to_process_list(ack, msg)
    }

    fn follower_execute_eom(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        let Payload::Eom(eom) = msg.payload() else {
            return Ok(());
        };
        if msg.is_local() {
            if self.leader {
                self.repost(Arc::clone(msg), 1);
            }
            return Ok(());
        }
        if eom.db_height == self.position.db_height && eom.minute < self.position.minute {
            self.delete_from_holding(&msg.msg_hash(), "stale EOM");
            return Ok(());
        }
        self.follower_execute_msg(msg)
    }

    fn follower_execute_ack(
        &mut self,
        msg: &Arc<Message>,
        ack: &Ack,
        trail: &mut ExecutionTrail,
    ) -> ConsensusResult<()> {
        self.delete_from_holding(&msg.msg_hash(), "ack received");
        self.highest_known = self.highest_known.max(ack.db_height);

        let Some(pl) = self.process_lists.get(ack.db_height) else {
            debug!(height = ack.db_height, "Ack for unknown process list");
            return Ok(());
        };
        let placeable = pl
            .lane(ack.vm_index)
            .is_some_and(|lane| !lane.is_filled(ack.height as usize));
        if !placeable {
            trace!(
                height = ack.db_height,
                vm = ack.vm_index,
                slot = ack.height,
                "Ack for a filled or unknown slot"
            );
            return Ok(());
        }

        metrics::record_ack("received");
        self.acks.insert(ack.message_hash, ack.clone());
        let held = self
            .holding
            .get(&ack.message_hash)
            .cloned()
            .or_else(|| self.dependents.get(&ack.message_hash));
        if let Some(held) = held {
            self.follower_execute(&held, trail)?;
        }
        Ok(())
    }

    fn follower_execute_commit(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        self.follower_execute_msg(msg)?;
        if let Some(reveal) = self
            .holding
            .find(MessageKind::RevealEntry, &msg.hash())
            .cloned()
        {
            self.follower_execute_reveal(&reveal)?;
            self.send_out(&reveal);
        }
        Ok(())
    }

    fn follower_execute_reveal(&mut self, msg: &Arc<Message>) -> ConsensusResult<()> {
        self.add_to_holding(msg);
        let Some(ack) = self.acks.get(&msg.msg_hash()).cloned() else {
            return Ok(());
        };
        msg.set_vm_index(ack.vm_index);
        msg.set_leader_chain_id(ack.leader_chain_id);
        msg.set_minute(ack.minute);
        if !self.process_lists.contains(ack.db_height) {
            return Ok(());
        }
        self.add_to_process_list(ack, msg)
    }

    /// Executes an `(ack, message)` pair answered for a missing slot.
    fn follower_execute_mmr(
        &mut self,
        msg: &Arc<Message>,
        mmr: &MissingMessageResponse,
        trail: &mut ExecutionTrail,
    ) -> ConsensusResult<()> {
        if self.ignore_missing {
            return Ok(());
        }
        let now = self.now();
        if !self
            .replay
            .check_and_record(ReplayNamespace::Internal, &msg.repeat_hash(), msg.timestamp(), now)
        {
            return Ok(());
        }

        let ack_msg = Message::new(Payload::Ack(mmr.ack.clone()));
        let inner = Message::new((*mmr.message).clone());
        if mmr.ack.message_hash != inner.msg_hash() {
            warn!("Missing-message response pairs an ack with another message");
            return Ok(());
        }
        if self.classify(&ack_msg).1 == DROP || self.classify(&inner).1 == DROP {
            return Ok(());
        }
        if !self.process_lists.contains(mmr.ack.db_height) {
            return Ok(());
        }
        debug!(
            height = mmr.ack.db_height,
            vm = mmr.ack.vm_index,
            slot = mmr.ack.height,
            "Filling slot from missing-message response"
        );
        self.follower_execute(&inner, trail)?;
        self.follower_execute(&ack_msg, trail)
    }

    fn follower_execute_data(&mut self, response: &DataResponse) -> ConsensusResult<()> {
        if !self.store.has_entry(&response.entry.hash())? {
            self.write_back.write_entry(response.entry.clone());
        }
        Ok(())
    }

    // === PROCESS LIST PLACEMENT ===

    /// Places an `(ack, message)` pair in its slot, then processes lanes.
    pub(crate) fn add_to_process_list(
        &mut self,
        ack: Ack,
        msg: &Arc<Message>,
    ) -> ConsensusResult<()> {
        let slot_height = ack.height as usize;
        let Some(lane) = self
            .process_lists
            .get_mut(ack.db_height)
            .and_then(|pl| pl.lane_mut(ack.vm_index))
        else {
            debug!(height = ack.db_height, vm = ack.vm_index, "No lane for ack");
            return Ok(());
        };
        if !lane.put(
            slot_height,
            Slot {
                ack: ack.clone(),
                msg: Arc::clone(msg),
            },
        ) {
            debug!(
                height = ack.db_height,
                vm = ack.vm_index,
                slot = slot_height,
                "Slot already filled"
            );
            return Ok(());
        }

        self.replay
            .record(ReplayNamespace::Internal, &msg.repeat_hash(), msg.timestamp());
        self.replay
            .record(ReplayNamespace::Internal, &ack_repeat_hash(&ack), ack.timestamp);
        self.acks.remove(&msg.msg_hash());
        self.delete_from_holding(&msg.msg_hash(), "placed");
        self.highest_known = self.highest_known.max(ack.db_height);
        trace!(
            kind = %msg.kind(),
            height = ack.db_height,
            vm = ack.vm_index,
            slot = slot_height,
            "Placed in process list"
        );
        self.update_state()?;
        Ok(())
    }

    /// Clears a slot so a replacement pair can be placed there.
    pub(crate) fn remove_from_pl(&mut self, h: u32, vm: usize, height: usize, reason: &str) {
        let Some(removed) = self
            .process_lists
            .get_mut(h)
            .and_then(|pl| pl.lane_mut(vm))
            .and_then(|lane| lane.remove(height))
        else {
            return;
        };
        removed.msg.clear_routing();
        self.replay
            .remove(ReplayNamespace::Internal, &removed.msg.repeat_hash());
        self.replay
            .remove(ReplayNamespace::Internal, &ack_repeat_hash(&removed.ack));
        debug!(
            kind = %removed.msg.kind(),
            height = h,
            vm,
            slot = height,
            reason,
            "Removed from process list"
        );
    }

    // === LANE PROCESSING ===

    /// Processes the leader-height process list until no lane advances.
    pub(crate) fn update_state(&mut self) -> ConsensusResult<bool> {
        if self.processing_lanes {
            self.lanes_dirty = true;
            return Ok(false);
        }
        self.processing_lanes = true;
        let result = self.process_lanes();
        self.processing_lanes = false;
        result
    }

    fn process_lanes(&mut self) -> ConsensusResult<bool> {
        let mut progress = false;
        loop {
            self.lanes_dirty = false;
            let h = self.position.db_height;
            let lanes = self
                .process_lists
                .get(h)
                .map_or(0, ProcessList::lane_count);
            let mut advanced = false;
            for vm in 0..lanes {
                while let Some(slot) = self.next_slot(h, vm) {
                    if !self.process_message(h, vm, &slot)? {
                        break;
                    }
                    if let Some(lane) = self.process_lists.get_mut(h).and_then(|pl| pl.lane_mut(vm)) {
                        lane.height += 1;
                    }
                    advanced = true;
                }
            }
            progress |= advanced;
            if !advanced && !self.lanes_dirty {
                return Ok(progress);
            }
        }
    }

    /// Next unprocessed slot of lane `vm`, requesting holes and discarding
    /// slots whose ack does not chain to the previous one.
    fn next_slot(&mut self, h: u32, vm: usize) -> Option<Slot> {
        if h != self.position.db_height {
            return None;
        }
        let lane = self.process_lists.get_mut(h)?.lane_mut(vm)?;
        if lane.synced || lane.is_caught_up() {
            return None;
        }
        let next = lane.height;
        let Some(slot) = lane.slot(next).cloned() else {
            for height in lane.take_new_holes() {
                self.requester.request(MissingRequest::Slot {
                    db_height: h,
                    vm_index: vm,
                    height,
                });
            }
            return None;
        };
        if !slot.ack.follows(lane.ack_before(next)) {
            warn!(height = h, vm, slot = next, "Ack does not chain to its predecessor");
            lane.remove(next);
            self.requester.request(MissingRequest::Slot {
                db_height: h,
                vm_index: vm,
                height: next,
            });
            return None;
        }
        Some(slot)
    }

    fn process_message(&mut self, h: u32, vm: usize, slot: &Slot) -> ConsensusResult<bool> {
        let msg = Arc::clone(&slot.msg);
        match msg.payload() {
            Payload::Eom(eom) => self.process_eom(h, vm, eom),
            Payload::DirectoryBlockSignature(dbsig) => self.process_dbsig(h, vm, dbsig),
            Payload::CommitChain(commit) => self.process_commit(
                h,
                &msg,
                commit.ec_address,
                commit.credits,
                EcRecord::CommitChain {
                    entry_hash: commit.entry_hash,
                    chain_id: commit.chain_id,
                    ec_address: commit.ec_address,
                    credits: commit.credits,
                },
            ),
            Payload::CommitEntry(commit) => self.process_commit(
                h,
                &msg,
                commit.ec_address,
                commit.credits,
                EcRecord::CommitEntry {
                    entry_hash: commit.entry_hash,
                    ec_address: commit.ec_address,
                    credits: commit.credits,
                },
            ),
            Payload::RevealEntry(reveal) => self.process_reveal(h, &msg, &reveal.entry),
            Payload::FactoidTransaction(tx) => Ok(self.process_factoid(h, tx)),
            Payload::AddServer(_) | Payload::RemoveServer(_) | Payload::ChangeServerKey(_) => {
                Ok(self.process_admin(h, msg.payload()))
            }
            _ => Ok(true),
        }
    }

    fn process_commit(
        &mut self,
        h: u32,
        msg: &Arc<Message>,
        ec_address: Address,
        credits: u8,
        record: EcRecord,
    ) -> ConsensusResult<bool> {
        let entry_hash = msg.hash();
        let balance = self.balances.get_e(true, &ec_address);
        if balance < i64::from(credits) {
            warn!(
                entry = %short_hex(&entry_hash),
                balance,
                credits,
                "Commit exceeds entry-credit balance"
            );
            return Ok(false);
        }
        self.balances
            .put_e(true, ec_address, balance - i64::from(credits));
        self.commits.put(entry_hash, Arc::clone(msg));
        if let Some(pl) = self.process_lists.get_mut(h) {
            pl.ec_records.push(record);
        }

        if let Some(reveal) = self
            .holding
            .find(MessageKind::RevealEntry, &entry_hash)
            .cloned()
        {
            self.repost(reveal, 0);
        }
        for released in self
            .dependents
            .release(&Dependency::Commit(entry_hash))
        {
            self.repost(released, 0);
        }
        Ok(true)
    }

    fn process_reveal(
        &mut self,
        h: u32,
        msg: &Arc<Message>,
        entry: &Entry,
    ) -> ConsensusResult<bool> {
        let entry_hash = entry.hash();
        let chain_id = entry.chain_id;
        let chain_create = self.commits.is_chain_commit(&entry_hash);

        let in_this_list = self
            .process_lists
            .get(h)
            .is_some_and(|pl| pl.new_eblocks.contains_key(&chain_id));
        let previous_head = if in_this_list {
            None
        } else {
            let from_previous_list = h
                .checked_sub(1)
                .and_then(|prev| self.process_lists.get(prev))
                .and_then(|pl| pl.new_eblocks.get(&chain_id))
                .map(|eblock| (eblock.key_mr(), eblock.sequence));
            match from_previous_list {
                Some(head) => Some(head),
                None => self
                    .store
                    .fetch_eblock_head(&chain_id)?
                    .map(|head| (head.key_mr, head.sequence)),
            }
        };

        let Some(pl) = self.process_lists.get_mut(h) else {
            return Ok(false);
        };
        let mut chain_created = false;
        if in_this_list {
            if let Some(eblock) = pl.new_eblocks.get_mut(&chain_id) {
                eblock.add_entry(entry_hash);
            }
        } else if let Some((key_mr, sequence)) = previous_head {
            let mut eblock = EntryBlock::following(key_mr, sequence, chain_id, h);
            eblock.add_entry(entry_hash);
            pl.new_eblocks.insert(chain_id, eblock);
        } else if chain_create {
            let mut eblock = EntryBlock::new(chain_id, h);
            eblock.add_entry(entry_hash);
            pl.new_eblocks.insert(chain_id, eblock);
            chain_created = true;
        } else {
            debug!(chain = %short_hex(&chain_id), "Reveal for a chain that does not exist");
            return Ok(false);
        }
        pl.new_entries.insert(entry_hash, entry.clone());

        self.write_back.write_entry(entry.clone());
        self.replay
            .record(ReplayNamespace::Reveal, &entry_hash, msg.timestamp());
        self.commits.delete(&entry_hash);
        if chain_created {
            debug!(chain = %short_hex(&chain_id), height = h, "Created chain");
            for released in self
                .dependents
                .release(&Dependency::Chain(chain_id))
            {
                self.repost(released, 0);
            }
        }
        Ok(true)
    }

    fn process_factoid(&mut self, h: u32, tx: &FactoidTransaction) -> bool {
        let Some(spent) = tx.spent_by_address() else {
            warn!(txid = %short_hex(&tx.txid()), "Factoid inputs overflow");
            return false;
        };
        if spent
            .iter()
            .any(|(address, amount)| self.balances.get_f(true, address) < *amount)
        {
            warn!(txid = %short_hex(&tx.txid()), "Factoid inputs exceed balance");
            return false;
        }
        for (address, amount) in spent {
            self.balances.adjust_f(true, address, -amount);
        }
        for output in &tx.outputs {
            self.balances
                .adjust_f(true, output.address, amount_delta(output.amount));
        }
        for purchase in &tx.ec_outputs {
            self.balances
                .adjust_e(true, purchase.address, amount_delta(purchase.amount));
        }
        if let Some(pl) = self.process_lists.get_mut(h) {
            pl.factoid_transactions.push(tx.clone());
        }
        self.replay
            .record(ReplayNamespace::Block, &tx.txid(), tx.timestamp);
        true
    }

    /// Queues an authority change for the next height if it still applies.
    fn process_admin(&mut self, h: u32, payload: &Payload) -> bool {
        let Some(change) = admin_change(payload) else {
            return true;
        };
        let Some(pl) = self.process_lists.get_mut(h) else {
            return true;
        };
        let mut pending = pl.authorities().clone();
        for queued in &pl.admin_changes {
            pending.apply(queued);
        }
        if pending.apply(&change) {
            debug!(?change, height = h, "Queued authority change");
            pl.admin_changes.push(change);
        } else {
            debug!(?change, height = h, "Ignored inapplicable authority change");
        }
        true
    }
}
