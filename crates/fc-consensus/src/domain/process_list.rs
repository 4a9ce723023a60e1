//! # Process List
//!
//! One process list per directory-block height. It holds one lane per virtual
//! server; each lane is an ordered list of `(ack, message)` slots indexed by
//! the ack height. Lanes are processed in order from slot 0: `height` counts
//! the slots processed so far and a lane is caught up when every assigned slot
//! has been processed.
//!
//! Alongside the lanes the process list accumulates what its block will
//! contain: new entry blocks and entries, entry-credit records, factoid
//! transactions and admin changes.

use super::ack::Ack;
use super::authority::{vm_index_for, AdminChange, AuthoritySet, ServerMap};
use super::block::{BlockCandidate, EcRecord, EntryBlock};
use super::message::{FactoidTransaction, Message};
use shared_types::{ChainId, Entry, Hash, ServerId, Timestamp};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;

#[derive(Clone, Debug)]
pub struct Slot {
    pub ack: Ack,
    pub msg: Arc<Message>,
}

/// One virtual server's ordered lane.
#[derive(Debug, Default)]
pub struct VmLane {
    pub list: Vec<Option<Slot>>,
    /// Slots processed contiguously from 0.
    pub height: usize,
    /// Set once the lane's EOM or DBSig for the current minute is processed.
    pub synced: bool,
    /// Minute of this lane as seen by its EOMs.
    pub leader_minute: u8,
    /// Minute (current + 1) for which this node last issued an EOM.
    pub eom_minute_issued: Option<u8>,
    /// The DBSig for this lane has been accepted or issued.
    pub signed: bool,
    requested: HashSet<usize>,
}

impl VmLane {
    pub fn is_caught_up(&self) -> bool {
        self.height == self.list.len()
    }

    pub fn slot(&self, height: usize) -> Option<&Slot> {
        self.list.get(height).and_then(Option::as_ref)
    }

    pub fn is_filled(&self, height: usize) -> bool {
        self.slot(height).is_some()
    }

    /// Writes a slot; refuses to overwrite a filled one.
    pub fn put(&mut self, height: usize, slot: Slot) -> bool {
        if self.is_filled(height) {
            return false;
        }
        if self.list.len() <= height {
            self.list.resize_with(height + 1, || None);
        }
        self.list[height] = Some(slot);
        self.requested.remove(&height);
        true
    }

    /// Clears a slot so a replacement can be accepted.
    pub fn remove(&mut self, height: usize) -> Option<Slot> {
        let slot = self.list.get_mut(height)?.take();
        if height < self.height {
            self.height = height;
        }
        while matches!(self.list.last(), Some(None)) {
            self.list.pop();
        }
        slot
    }

    /// Ack of the slot before `height`, if filled.
    pub fn ack_before(&self, height: usize) -> Option<&Ack> {
        height
            .checked_sub(1)
            .and_then(|h| self.slot(h))
            .map(|slot| &slot.ack)
    }

    /// Empty slots below the end of the list not yet requested; marks them requested.
    pub fn take_new_holes(&mut self) -> Vec<usize> {
        let holes: Vec<usize> = (self.height..self.list.len())
            .filter(|h| self.list[*h].is_none() && !self.requested.contains(h))
            .collect();
        self.requested.extend(holes.iter().copied());
        holes
    }
}

pub struct ProcessList {
    pub db_height: u32,
    authorities: AuthoritySet,
    server_map: ServerMap,
    pub lanes: Vec<VmLane>,
    pub dbsig_already_sent: bool,
    pub new_eblocks: BTreeMap<ChainId, EntryBlock>,
    pub new_entries: HashMap<Hash, Entry>,
    pub ec_records: Vec<EcRecord>,
    pub factoid_transactions: Vec<FactoidTransaction>,
    pub factoid_period_ends: Vec<usize>,
    pub admin_changes: Vec<AdminChange>,
    pub coinbase_timestamp: Option<Timestamp>,
}

impl ProcessList {
    pub fn new(db_height: u32, authorities: AuthoritySet) -> Self {
        let lanes = (0..authorities.federated_count())
            .map(|_| VmLane::default())
            .collect();
        Self {
            db_height,
            server_map: ServerMap::new(db_height, authorities.federated_count()),
            authorities,
            lanes,
            dbsig_already_sent: false,
            new_eblocks: BTreeMap::new(),
            new_entries: HashMap::new(),
            ec_records: Vec::new(),
            factoid_transactions: Vec::new(),
            factoid_period_ends: Vec::new(),
            admin_changes: Vec::new(),
            coinbase_timestamp: None,
        }
    }

    pub fn authorities(&self) -> &AuthoritySet {
        &self.authorities
    }

    /// Replaces the authority set; lanes are added or dropped to match.
    pub fn set_authorities(&mut self, authorities: AuthoritySet) {
        let count = authorities.federated_count();
        self.lanes.resize_with(count, VmLane::default);
        self.server_map = ServerMap::new(self.db_height, count);
        self.authorities = authorities;
    }

    pub fn lane_count(&self) -> usize {
        self.lanes.len()
    }

    pub fn lane(&self, vm: usize) -> Option<&VmLane> {
        self.lanes.get(vm)
    }

    pub fn lane_mut(&mut self, vm: usize) -> Option<&mut VmLane> {
        self.lanes.get_mut(vm)
    }

    /// Server leading lane `vm` during `minute`.
    pub fn leader_of(&self, minute: u8, vm: usize) -> Option<ServerId> {
        self.server_map
            .fed_index(minute, vm)
            .and_then(|f| self.authorities.federated().get(f))
            .map(|s| s.id)
    }

    /// Lane `identity` leads during `minute`, if it is a federated server.
    pub fn get_virtual_servers(&self, minute: u8, identity: &ServerId) -> Option<usize> {
        let fed_index = self.authorities.federated_index(identity)?;
        self.server_map.vm_for(minute, fed_index)
    }

    pub fn vm_index_for(&self, hash: &[u8]) -> usize {
        vm_index_for(hash, self.lane_count())
    }

    pub fn unsync_all(&mut self) {
        for lane in &mut self.lanes {
            lane.synced = false;
        }
    }

    pub fn ack_at(&self, vm: usize, height: usize) -> Option<&Ack> {
        self.lane(vm)?.slot(height).map(|slot| &slot.ack)
    }

    /// True if any lane holds a message with this hash.
    pub fn contains_message(&self, msg_hash: &Hash) -> bool {
        self.lanes
            .iter()
            .flat_map(|lane| lane.list.iter().flatten())
            .any(|slot| &slot.msg.msg_hash() == msg_hash)
    }

    /// Total filled slots across lanes.
    pub fn message_count(&self) -> usize {
        self.lanes
            .iter()
            .map(|lane| lane.list.iter().flatten().count())
            .sum()
    }

    /// Closes `minute` (1-based) on every new entry block, in the factoid
    /// period list and in the entry-credit block.
    pub fn end_of_minute(&mut self, minute: u8) {
        for eblock in self.new_eblocks.values_mut() {
            eblock.add_end_of_minute(minute);
        }
        self.factoid_period_ends.push(self.factoid_transactions.len());
        self.ec_records.push(EcRecord::MinuteNumber(minute));
    }

    /// Block body contributed by this process list.
    pub fn candidate(&self, prev_key_mr: Hash) -> BlockCandidate {
        BlockCandidate {
            db_height: self.db_height,
            prev_key_mr,
            timestamp: self.coinbase_timestamp.unwrap_or_default(),
            entry_blocks: self.new_eblocks.values().cloned().collect(),
            ec_records: self.ec_records.clone(),
            factoid_transactions: self.factoid_transactions.clone(),
            factoid_period_ends: self.factoid_period_ends.clone(),
            admin_changes: self.admin_changes.clone(),
        }
    }
}

/// Process lists by height.
#[derive(Default)]
pub struct ProcessLists {
    lists: BTreeMap<u32, ProcessList>,
}

impl ProcessLists {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, db_height: u32) -> Option<&ProcessList> {
        self.lists.get(&db_height)
    }

    pub fn get_mut(&mut self, db_height: u32) -> Option<&mut ProcessList> {
        self.lists.get_mut(&db_height)
    }

    pub fn contains(&self, db_height: u32) -> bool {
        self.lists.contains_key(&db_height)
    }

    /// Returns the list for `db_height`, creating it with `authorities` if absent.
    pub fn ensure(&mut self, db_height: u32, authorities: &AuthoritySet) -> &mut ProcessList {
        self.lists
            .entry(db_height)
            .or_insert_with(|| ProcessList::new(db_height, authorities.clone()))
    }

    /// Drops process lists below `db_height`.
    pub fn trim_below(&mut self, db_height: u32) -> usize {
        let kept = self.lists.split_off(&db_height);
        let dropped = self.lists.len();
        self.lists = kept;
        dropped
    }

    pub fn heights(&self) -> Vec<u32> {
        self.lists.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.lists.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::authority::ServerEntry;
    use crate::domain::message::{CommitEntry, Payload};

    fn authorities(n: u8) -> AuthoritySet {
        AuthoritySet::new(
            (1..=n)
                .map(|i| ServerEntry {
                    id: [i; 32],
                    signing_key: [i; 32],
                })
                .collect(),
            vec![],
        )
    }

    fn slot(height: u32, tag: u8) -> Slot {
        let msg = Message::new(Payload::CommitEntry(CommitEntry {
            timestamp: Timestamp::from_secs(1),
            entry_hash: [tag; 32],
            credits: 1,
            ec_address: [0u8; 32],
        }));
        Slot {
            ack: Ack {
                timestamp: Timestamp::from_secs(1),
                salt: [0u8; 8],
                salt_number: 0,
                db_height: 1,
                vm_index: 0,
                minute: 0,
                height,
                serial_hash: msg.msg_hash(),
                message_hash: msg.msg_hash(),
                leader_chain_id: [1u8; 32],
                signature: None,
            },
            msg,
        }
    }

    #[test]
    fn test_slots_never_overwritten() {
        let mut lane = VmLane::default();
        assert!(lane.put(0, slot(0, 1)));
        assert!(!lane.put(0, slot(0, 2)));
        assert_eq!(lane.slot(0).unwrap().msg.hash(), [1u8; 32]);
    }

    #[test]
    fn test_holes_reported_once() {
        let mut lane = VmLane::default();
        lane.put(2, slot(2, 3));
        assert_eq!(lane.list.len(), 3);
        assert_eq!(lane.take_new_holes(), vec![0, 1]);
        assert!(lane.take_new_holes().is_empty());
        lane.put(0, slot(0, 1));
        assert!(!lane.is_caught_up());
    }

    #[test]
    fn test_remove_rewinds_height() {
        let mut lane = VmLane::default();
        lane.put(0, slot(0, 1));
        lane.height = 1;
        assert!(lane.remove(0).is_some());
        assert_eq!(lane.height, 0);
        assert!(lane.list.is_empty());
        assert!(lane.is_caught_up());
    }

    #[test]
    fn test_lanes_follow_authority_count() {
        let mut pl = ProcessList::new(3, authorities(2));
        assert_eq!(pl.lane_count(), 2);
        pl.set_authorities(authorities(3));
        assert_eq!(pl.lane_count(), 3);
        let vm = pl.get_virtual_servers(0, &[1u8; 32]).unwrap();
        assert_eq!(pl.leader_of(0, vm), Some([1u8; 32]));
        assert!(pl.get_virtual_servers(0, &[9u8; 32]).is_none());
    }

    #[test]
    fn test_registry_trim() {
        let mut lists = ProcessLists::new();
        for h in 1..=4 {
            lists.ensure(h, &authorities(1));
        }
        assert_eq!(lists.trim_below(3), 2);
        assert_eq!(lists.heights(), vec![3, 4]);
    }

    #[test]
    fn test_end_of_minute_marks_block_contents() {
        let mut pl = ProcessList::new(3, authorities(1));
        pl.new_eblocks.insert([5u8; 32], EntryBlock::new([5u8; 32], 3));
        pl.end_of_minute(1);
        assert_eq!(pl.factoid_period_ends, vec![0]);
        assert_eq!(pl.ec_records, vec![EcRecord::MinuteNumber(1)]);
        assert_eq!(pl.new_eblocks[&[5u8; 32]].items.len(), 1);
    }
}
