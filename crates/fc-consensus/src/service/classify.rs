//! Message classification
//!
//! Every message is classified into a send verdict (broadcast or not) and an
//! execute verdict before dispatch. The execute verdicts are:
//!
//! | value | meaning |
//! |-------|---------|
//! | `2`   | leader-execute: this node leads the message's lane |
//! | `1`   | follower-execute |
//! | `0`   | hold until something changes |
//! | `-1`  | drop as invalid |
//! | `-2`  | park behind a missing dependency |

use super::ConsensusEngine;
use crate::domain::{
    AuthoritySet, Dependency, Message, MessageKind, Payload, ReplayNamespace, RoundPosition,
    ServerKind,
};
use shared_types::{Address, ChainId, Entry, FullSignature, Hash};
use tracing::trace;

pub const LEADER_EXECUTE: i8 = 2;
pub const FOLLOWER: i8 = 1;
pub const HOLD: i8 = 0;
pub const DROP: i8 = -1;
pub const DEPENDENT: i8 = -2;

/// Largest entry accepted, in bytes.
const MAX_ENTRY_SIZE: usize = 10 * 1024;

/// Extra credits charged for creating a chain.
const CHAIN_CREATION_CREDITS: u64 = 10;

/// Verdicts for one message.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Classification {
    pub send: i8,
    pub execute: i8,
    /// Set when `execute` is [`DEPENDENT`].
    pub dependency: Option<Dependency>,
}

impl Classification {
    fn new(send: i8, execute: i8) -> Self {
        Self {
            send,
            execute,
            dependency: None,
        }
    }

    fn drop() -> Self {
        Self::new(DROP, DROP)
    }

    fn hold() -> Self {
        Self::new(HOLD, HOLD)
    }

    fn depends(dependency: Dependency) -> Self {
        Self {
            send: HOLD,
            execute: DEPENDENT,
            dependency: Some(dependency),
        }
    }

    pub fn pair(&self) -> (i8, i8) {
        (self.send, self.execute)
    }
}

/// Outcome of the per-kind validity check.
enum Validity {
    Valid,
    Hold,
    Invalid,
    Depends(Dependency),
}

/// Credits needed to reveal `entry`, or `None` if it is too large.
pub(crate) fn entry_cost(entry: &Entry, chain_create: bool) -> Option<u64> {
    let size = entry.size();
    if size > MAX_ENTRY_SIZE {
        return None;
    }
    let base = (size as u64).div_ceil(1024).max(1);
    Some(if chain_create {
        base + CHAIN_CREATION_CREDITS
    } else {
        base
    })
}

impl ConsensusEngine {
    /// `(send, execute)` verdicts for `msg`.
    pub fn classify(&self, msg: &Message) -> (i8, i8) {
        self.classify_detailed(msg).pair()
    }

    pub fn classify_detailed(&self, msg: &Message) -> Classification {
        let now = self.now();
        let ts = msg.timestamp();
        let is_dbstate = msg.kind() == MessageKind::DbState;

        if self.ignore_missing && !is_dbstate {
            let oldest = now.saturating_sub_millis(self.config.ignore_missing_secs * 1000);
            if ts < oldest {
                return Classification::drop();
            }
        }

        if msg.needs_ack() {
            if ts < self.message_filter_timestamp {
                trace!(kind = %msg.kind(), "Message predates the filter window");
                return Classification::drop();
            }
            let limit = self
                .message_filter_timestamp
                .saturating_add_millis(self.config.filter_time_limit_ms);
            if ts > limit {
                return Classification::hold();
            }
        }

        if msg.is_entry_related() && self.entry_committed(&msg.hash()) {
            return Classification::drop();
        }

        if !self.run_leader && !is_dbstate {
            return Classification::hold();
        }

        match self.validate(msg) {
            Validity::Valid => {}
            Validity::Hold => return Classification::hold(),
            Validity::Invalid => return Classification::drop(),
            Validity::Depends(dependency) => return Classification::depends(dependency),
        }

        if !is_dbstate
            && !self
                .replay
                .is_valid(ReplayNamespace::Internal, &msg.repeat_hash(), ts, now)
        {
            return Classification::drop();
        }

        let vm = self.target_vm(msg);
        let leads_lane = self.leader && vm == self.leader_vm;
        if !leads_lane || !msg.needs_ack() {
            if msg.needs_ack() && !self.has_placeable_ack(&msg.msg_hash()) {
                return Classification::new(FOLLOWER, HOLD);
            }
            return Classification::new(FOLLOWER, FOLLOWER);
        }

        match self.leader_lane() {
            Some(lane) if lane.is_caught_up() => {}
            _ => return Classification::hold(),
        }
        // An open EOM barrier does not hold leaders back: the other lanes
        // still have to issue their EOMs for it to close.
        if self.sync.dbsig || self.sync.between_blocks {
            return Classification::hold();
        }
        Classification::new(FOLLOWER, LEADER_EXECUTE)
    }

    /// Lane a message belongs to.
    pub(crate) fn target_vm(&self, msg: &Message) -> usize {
        if msg.is_local() && self.leader {
            return self.leader_vm;
        }
        match msg.payload() {
            Payload::Eom(eom) => eom.vm_index,
            Payload::DirectoryBlockSignature(dbsig) => dbsig.vm_index,
            _ => self
                .leader_pl()
                .map(|pl| pl.vm_index_for(&msg.hash()))
                .unwrap_or(0),
        }
    }

    fn has_placeable_ack(&self, msg_hash: &Hash) -> bool {
        self.acks
            .get(msg_hash)
            .is_some_and(|ack| self.process_lists.contains(ack.db_height))
    }

    // === VALIDATION METHODS ===

    fn validate(&self, msg: &Message) -> Validity {
        match msg.payload() {
            Payload::Eom(eom) => {
                if msg.is_local() {
                    let requested = RoundPosition::new(eom.db_height, eom.minute);
                    return if requested < self.position {
                        Validity::Invalid
                    } else {
                        Validity::Valid
                    };
                }
                if eom.minute > 9 || self.ledger.is_saved(eom.db_height) {
                    return Validity::Invalid;
                }
                let Some(signature) = &eom.signature else {
                    return Validity::Invalid;
                };
                self.verify(&eom.signing_bytes(), signature, eom.db_height)
            }
            Payload::DirectoryBlockSignature(dbsig) => {
                if msg.is_local() {
                    return Validity::Valid;
                }
                if self.ledger.is_saved(dbsig.db_height)
                    || dbsig.header.db_height + 1 != dbsig.db_height
                {
                    return Validity::Invalid;
                }
                Validity::Valid
            }
            Payload::Ack(ack) => {
                if self.ledger.is_saved(ack.db_height) {
                    return Validity::Invalid;
                }
                // Acks more than one height ahead wait for the round to catch up.
                if ack.db_height > self.position.db_height + 1 {
                    return Validity::Depends(Dependency::Height(ack.db_height - 1));
                }
                let Some(signature) = &ack.signature else {
                    return Validity::Invalid;
                };
                self.verify(&ack.signing_bytes(), signature, ack.db_height)
            }
            Payload::CommitChain(commit) => {
                self.validate_commit(commit.credits, &commit.ec_address)
            }
            Payload::CommitEntry(commit) => {
                self.validate_commit(commit.credits, &commit.ec_address)
            }
            Payload::RevealEntry(reveal) => self.validate_reveal(&reveal.entry),
            Payload::FactoidTransaction(tx) => {
                if tx.is_coinbase() || !self.replay.is_unique(ReplayNamespace::Block, &tx.txid()) {
                    return Validity::Invalid;
                }
                let (Some(spent), Some(paid), Some(purchased)) = (
                    tx.total_inputs(),
                    tx.total_outputs(),
                    tx.ec_purchase_cost(self.config.entry_credit_rate),
                ) else {
                    return Validity::Invalid;
                };
                if paid.checked_add(purchased).map_or(true, |needed| spent < needed) {
                    return Validity::Invalid;
                }
                let Some(needed) = tx.spent_by_address() else {
                    return Validity::Invalid;
                };
                let short = needed
                    .iter()
                    .any(|(address, amount)| self.balances.get_f(true, address) < *amount);
                if short {
                    Validity::Hold
                } else {
                    Validity::Valid
                }
            }
            Payload::AddServer(add) => self.validate_admin(msg, add.signature.as_ref()),
            Payload::RemoveServer(remove) => {
                let authorities = self.current_authorities();
                if remove.kind == ServerKind::Federated
                    && (authorities.federated_count() < 2
                        || !authorities.is_federated(&remove.server_id))
                {
                    return Validity::Invalid;
                }
                self.validate_admin(msg, remove.signature.as_ref())
            }
            Payload::ChangeServerKey(change) => {
                let authorities = self.current_authorities();
                if !authorities.is_federated(&change.server_id)
                    && !authorities.is_audit(&change.server_id)
                {
                    return Validity::Invalid;
                }
                self.validate_admin(msg, change.signature.as_ref())
            }
            Payload::DbState(state) => {
                if self.ledger.is_saved(state.db_height()) {
                    Validity::Invalid
                } else {
                    Validity::Valid
                }
            }
            Payload::Heartbeat(heartbeat) => {
                let authorities = self.current_authorities();
                let Some(key) = authorities.signing_key(&heartbeat.identity) else {
                    return Validity::Invalid;
                };
                match &heartbeat.signature {
                    Some(signature) if signature.public_key != key => Validity::Invalid,
                    _ => Validity::Valid,
                }
            }
            Payload::MissingMessageResponse(_) | Payload::DataResponse(_) => Validity::Valid,
        }
    }

    fn verify(
        &self,
        data: &[u8],
        signature: &FullSignature,
        db_height: u32,
    ) -> Validity {
        match self
            .oracle
            .verify_authority_signature(data, signature, db_height)
        {
            Ok(true) => Validity::Valid,
            Ok(false) => Validity::Invalid,
            Err(_) => Validity::Hold,
        }
    }

    fn validate_commit(&self, credits: u8, ec_address: &Address) -> Validity {
        if credits == 0 {
            return Validity::Invalid;
        }
        if self.balances.get_e(true, ec_address) < i64::from(credits) {
            return Validity::Hold;
        }
        Validity::Valid
    }

    fn validate_reveal(&self, entry: &Entry) -> Validity {
        let entry_hash = entry.hash();
        let Some(commit) = self.commits.get(&entry_hash) else {
            return Validity::Depends(Dependency::Commit(entry_hash));
        };
        let (credits, chain_create) = match commit.payload() {
            Payload::CommitChain(c) => (c.credits, true),
            Payload::CommitEntry(c) => (c.credits, false),
            _ => return Validity::Invalid,
        };
        let Some(cost) = entry_cost(entry, chain_create) else {
            return Validity::Invalid;
        };
        if u64::from(credits) < cost {
            return Validity::Invalid;
        }
        if !chain_create && !self.chain_exists(&entry.chain_id) {
            return Validity::Depends(Dependency::Chain(entry.chain_id));
        }
        Validity::Valid
    }

    fn validate_admin(
        &self,
        msg: &Message,
        signature: Option<&FullSignature>,
    ) -> Validity {
        let Some(signature) = signature else {
            return Validity::Invalid;
        };
        self.verify(
            &msg.payload().signing_bytes(),
            signature,
            self.position.db_height,
        )
    }

    /// Authority set of the height being built.
    fn current_authorities(&self) -> &AuthoritySet {
        self.leader_pl()
            .map(|pl| pl.authorities())
            .unwrap_or(&self.authorities)
    }

    /// The chain has an entry block in this or the previous process list, or in the store.
    pub(crate) fn chain_exists(&self, chain_id: &ChainId) -> bool {
        let h = self.position.db_height;
        let in_list = |height: u32| {
            self.process_lists
                .get(height)
                .is_some_and(|pl| pl.new_eblocks.contains_key(chain_id))
        };
        if in_list(h) || h.checked_sub(1).is_some_and(in_list) {
            return true;
        }
        matches!(self.store.fetch_eblock_head(chain_id), Ok(Some(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entry_cost_rounds_up_per_kilobyte() {
        let small = Entry::new([1u8; 32], vec![], vec![0u8; 10]);
        assert_eq!(entry_cost(&small, false), Some(1));
        assert_eq!(entry_cost(&small, true), Some(11));

        let two_k = Entry::new([1u8; 32], vec![], vec![0u8; 1500]);
        assert_eq!(entry_cost(&two_k, false), Some(2));

        let huge = Entry::new([1u8; 32], vec![], vec![0u8; MAX_ENTRY_SIZE + 1]);
        assert_eq!(entry_cost(&huge, false), None);
    }

    #[test]
    fn test_classification_pair() {
        assert_eq!(Classification::drop().pair(), (DROP, DROP));
        let parked = Classification::depends(Dependency::Height(4));
        assert_eq!(parked.pair(), (HOLD, DEPENDENT));
        assert_eq!(parked.dependency, Some(Dependency::Height(4)));
    }
}
