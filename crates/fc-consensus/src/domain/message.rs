//! Consensus messages
//!
//! A [`Message`] wraps an immutable [`Payload`] together with the hashes it is
//! known by and a small amount of write-once routing state assigned during
//! dispatch. Messages are shared by reference (`Arc<Message>`) between holding,
//! the ack matcher and process-list slots.

use super::ack::Ack;
use super::authority::ServerKind;
use super::block::{BlockWithEntries, DirectoryBlockHeader};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared_types::{
    canonical_bytes, hash_of, Address, ChainId, Entry, FullSignature, Hash, PublicKey, ServerId,
    Timestamp,
};
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

// =============================================================================
// PAYLOADS
// =============================================================================

/// End-of-minute marker issued by the leader of a lane.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Eom {
    pub timestamp: Timestamp,
    pub db_height: u32,
    pub vm_index: usize,
    pub minute: u8,
    /// Identity of the issuing leader.
    pub chain_id: ServerId,
    pub signature: Option<FullSignature>,
}

impl Eom {
    pub fn signing_bytes(&self) -> Vec<u8> {
        canonical_bytes(&(
            self.timestamp,
            self.db_height,
            self.vm_index as u64,
            self.minute,
            self.chain_id,
        ))
    }
}

/// Signature of a leader over the previous directory block header.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DirectoryBlockSignature {
    pub timestamp: Timestamp,
    pub db_height: u32,
    pub vm_index: usize,
    pub server_identity: ServerId,
    /// Header of block `db_height - 1`.
    pub header: DirectoryBlockHeader,
    /// Signature over `header.marshal()`.
    pub signature: FullSignature,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitChain {
    pub timestamp: Timestamp,
    pub chain_id: ChainId,
    pub entry_hash: Hash,
    pub credits: u8,
    pub ec_address: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub timestamp: Timestamp,
    pub entry_hash: Hash,
    pub credits: u8,
    pub ec_address: Address,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevealEntry {
    pub timestamp: Timestamp,
    pub entry: Entry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxAmount {
    pub address: Address,
    pub amount: u64,
}

/// Factoid transfer. A transaction without inputs is a coinbase.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct FactoidTransaction {
    pub timestamp: Timestamp,
    pub inputs: Vec<TxAmount>,
    pub outputs: Vec<TxAmount>,
    /// Entry-credit purchases; `amount` is in entry credits.
    pub ec_outputs: Vec<TxAmount>,
}

impl FactoidTransaction {
    pub fn txid(&self) -> Hash {
        hash_of(self)
    }

    pub fn is_coinbase(&self) -> bool {
        self.inputs.is_empty()
    }

    /// Sum of the inputs, or `None` on overflow.
    pub fn total_inputs(&self) -> Option<u64> {
        checked_total(&self.inputs)
    }

    /// Sum of the outputs, or `None` on overflow.
    pub fn total_outputs(&self) -> Option<u64> {
        checked_total(&self.outputs)
    }

    /// Factoshis needed to buy the entry-credit outputs at `rate`.
    pub fn ec_purchase_cost(&self, rate: u64) -> Option<u64> {
        self.ec_outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.amount.checked_mul(rate)?))
    }

    /// Inputs summed per address as balance deltas. `None` if any sum
    /// leaves the signed balance range.
    pub fn spent_by_address(&self) -> Option<HashMap<Address, i64>> {
        let mut spent: HashMap<Address, i64> = HashMap::new();
        for input in &self.inputs {
            let amount = i64::try_from(input.amount).ok()?;
            let total = spent.entry(input.address).or_default();
            *total = total.checked_add(amount)?;
        }
        Some(spent)
    }
}

fn checked_total(amounts: &[TxAmount]) -> Option<u64> {
    amounts
        .iter()
        .try_fold(0u64, |acc, a| acc.checked_add(a.amount))
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddServer {
    pub timestamp: Timestamp,
    pub server_id: ServerId,
    pub kind: ServerKind,
    pub signing_key: PublicKey,
    pub signature: Option<FullSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoveServer {
    pub timestamp: Timestamp,
    pub server_id: ServerId,
    pub kind: ServerKind,
    pub signature: Option<FullSignature>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeServerKey {
    pub timestamp: Timestamp,
    pub server_id: ServerId,
    pub new_key: PublicKey,
    pub signature: Option<FullSignature>,
}

/// A complete saved block, from the local database or a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DbState {
    pub timestamp: Timestamp,
    pub block: BlockWithEntries,
    /// Last block of a local database load.
    pub is_last: bool,
}

impl DbState {
    pub fn db_height(&self) -> u32 {
        self.block.block.header.db_height
    }
}

/// Answer to a missing-message request: an ack and the message it covers.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct MissingMessageResponse {
    pub timestamp: Timestamp,
    pub ack: Ack,
    pub message: Box<Payload>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Heartbeat {
    pub timestamp: Timestamp,
    pub db_height: u32,
    pub minute: u8,
    pub identity: ServerId,
    /// Key merkle root of the last sealed block.
    pub dblock_hash: Hash,
    pub signature: Option<FullSignature>,
}

/// Entry payload answered by a peer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataResponse {
    pub timestamp: Timestamp,
    pub entry: Entry,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Eom(Eom),
    DirectoryBlockSignature(DirectoryBlockSignature),
    Ack(Ack),
    CommitChain(CommitChain),
    CommitEntry(CommitEntry),
    RevealEntry(RevealEntry),
    FactoidTransaction(FactoidTransaction),
    AddServer(AddServer),
    RemoveServer(RemoveServer),
    ChangeServerKey(ChangeServerKey),
    DbState(DbState),
    MissingMessageResponse(MissingMessageResponse),
    Heartbeat(Heartbeat),
    DataResponse(DataResponse),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum MessageKind {
    Eom,
    DirectoryBlockSignature,
    Ack,
    CommitChain,
    CommitEntry,
    RevealEntry,
    FactoidTransaction,
    AddServer,
    RemoveServer,
    ChangeServerKey,
    DbState,
    MissingMessageResponse,
    Heartbeat,
    DataResponse,
}

impl MessageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageKind::Eom => "eom",
            MessageKind::DirectoryBlockSignature => "dbsig",
            MessageKind::Ack => "ack",
            MessageKind::CommitChain => "commit_chain",
            MessageKind::CommitEntry => "commit_entry",
            MessageKind::RevealEntry => "reveal_entry",
            MessageKind::FactoidTransaction => "factoid_tx",
            MessageKind::AddServer => "add_server",
            MessageKind::RemoveServer => "remove_server",
            MessageKind::ChangeServerKey => "change_server_key",
            MessageKind::DbState => "dbstate",
            MessageKind::MissingMessageResponse => "mmr",
            MessageKind::Heartbeat => "heartbeat",
            MessageKind::DataResponse => "data_response",
        }
    }
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Payload {
    pub fn kind(&self) -> MessageKind {
        match self {
            Payload::Eom(_) => MessageKind::Eom,
            Payload::DirectoryBlockSignature(_) => MessageKind::DirectoryBlockSignature,
            Payload::Ack(_) => MessageKind::Ack,
            Payload::CommitChain(_) => MessageKind::CommitChain,
            Payload::CommitEntry(_) => MessageKind::CommitEntry,
            Payload::RevealEntry(_) => MessageKind::RevealEntry,
            Payload::FactoidTransaction(_) => MessageKind::FactoidTransaction,
            Payload::AddServer(_) => MessageKind::AddServer,
            Payload::RemoveServer(_) => MessageKind::RemoveServer,
            Payload::ChangeServerKey(_) => MessageKind::ChangeServerKey,
            Payload::DbState(_) => MessageKind::DbState,
            Payload::MissingMessageResponse(_) => MessageKind::MissingMessageResponse,
            Payload::Heartbeat(_) => MessageKind::Heartbeat,
            Payload::DataResponse(_) => MessageKind::DataResponse,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        match self {
            Payload::Eom(m) => m.timestamp,
            Payload::DirectoryBlockSignature(m) => m.timestamp,
            Payload::Ack(m) => m.timestamp,
            Payload::CommitChain(m) => m.timestamp,
            Payload::CommitEntry(m) => m.timestamp,
            Payload::RevealEntry(m) => m.timestamp,
            Payload::FactoidTransaction(m) => m.timestamp,
            Payload::AddServer(m) => m.timestamp,
            Payload::RemoveServer(m) => m.timestamp,
            Payload::ChangeServerKey(m) => m.timestamp,
            Payload::DbState(m) => m.timestamp,
            Payload::MissingMessageResponse(m) => m.timestamp,
            Payload::Heartbeat(m) => m.timestamp,
            Payload::DataResponse(m) => m.timestamp,
        }
    }

    /// Bytes an authority signs: the payload with its signature cleared.
    pub fn signing_bytes(&self) -> Vec<u8> {
        canonical_bytes(&self.unsigned())
    }

    /// Copy with message signatures cleared; the repeat hash is taken over it.
    fn unsigned(&self) -> Payload {
        let mut copy = self.clone();
        match &mut copy {
            Payload::Eom(m) => m.signature = None,
            Payload::Ack(m) => m.signature = None,
            Payload::AddServer(m) => m.signature = None,
            Payload::RemoveServer(m) => m.signature = None,
            Payload::ChangeServerKey(m) => m.signature = None,
            Payload::Heartbeat(m) => m.signature = None,
            _ => {}
        }
        copy
    }
}

// =============================================================================
// MESSAGE
// =============================================================================

/// Routing fields assigned once, when a message is placed in a lane.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Routing {
    pub vm_index: Option<usize>,
    pub minute: Option<u8>,
    pub leader_chain_id: Option<ServerId>,
}

pub struct Message {
    payload: Payload,
    msg_hash: Hash,
    repeat_hash: Hash,
    local: bool,
    routing: Mutex<Routing>,
    sent_invalid: AtomicBool,
}

impl Message {
    /// Wraps a payload received from the network.
    pub fn new(payload: Payload) -> Arc<Self> {
        Arc::new(Self::build(payload, false))
    }

    /// Wraps a payload originated by this node.
    pub fn local(payload: Payload) -> Arc<Self> {
        Arc::new(Self::build(payload, true))
    }

    fn build(payload: Payload, local: bool) -> Self {
        let msg_hash = hash_of(&payload);
        let repeat_hash = hash_of(&payload.unsigned());
        Self {
            payload,
            msg_hash,
            repeat_hash,
            local,
            routing: Mutex::new(Routing::default()),
            sent_invalid: AtomicBool::new(false),
        }
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn kind(&self) -> MessageKind {
        self.payload.kind()
    }

    /// Hash of the full message, signatures included.
    pub fn msg_hash(&self) -> Hash {
        self.msg_hash
    }

    /// Hash used for replay detection; signatures excluded.
    pub fn repeat_hash(&self) -> Hash {
        self.repeat_hash
    }

    /// Content hash: the entry hash for commits and reveals, the message hash otherwise.
    pub fn hash(&self) -> Hash {
        match &self.payload {
            Payload::CommitChain(c) => c.entry_hash,
            Payload::CommitEntry(c) => c.entry_hash,
            Payload::RevealEntry(r) => r.entry.hash(),
            _ => self.msg_hash,
        }
    }

    pub fn timestamp(&self) -> Timestamp {
        self.payload.timestamp()
    }

    pub fn is_local(&self) -> bool {
        self.local
    }

    /// Messages that are only placed in a process list against an ack.
    pub fn needs_ack(&self) -> bool {
        matches!(
            self.kind(),
            MessageKind::Eom
                | MessageKind::DirectoryBlockSignature
                | MessageKind::CommitChain
                | MessageKind::CommitEntry
                | MessageKind::RevealEntry
                | MessageKind::FactoidTransaction
                | MessageKind::AddServer
                | MessageKind::RemoveServer
                | MessageKind::ChangeServerKey
        )
    }

    pub fn is_ack(&self) -> bool {
        matches!(self.payload, Payload::Ack(_))
    }

    pub fn as_ack(&self) -> Option<&Ack> {
        match &self.payload {
            Payload::Ack(ack) => Some(ack),
            _ => None,
        }
    }

    pub fn is_commit(&self) -> bool {
        matches!(
            self.kind(),
            MessageKind::CommitChain | MessageKind::CommitEntry
        )
    }

    pub fn is_entry_related(&self) -> bool {
        self.is_commit() || self.kind() == MessageKind::RevealEntry
    }

    pub fn routing(&self) -> Routing {
        *self.routing.lock()
    }

    pub fn vm_index(&self) -> Option<usize> {
        self.routing.lock().vm_index
    }

    /// The setters keep a field that is already set.
    pub fn set_vm_index(&self, vm_index: usize) {
        self.routing.lock().vm_index.get_or_insert(vm_index);
    }

    pub fn set_minute(&self, minute: u8) {
        self.routing.lock().minute.get_or_insert(minute);
    }

    pub fn set_leader_chain_id(&self, id: ServerId) {
        self.routing.lock().leader_chain_id.get_or_insert(id);
    }

    /// Forgets the routing of a message taken back out of its slot.
    pub fn clear_routing(&self) {
        *self.routing.lock() = Routing::default();
    }

    pub fn sent_invalid(&self) -> bool {
        self.sent_invalid.load(Ordering::Acquire)
    }

    /// Marks the message as reported invalid; returns false if it already was.
    pub fn mark_sent_invalid(&self) -> bool {
        !self.sent_invalid.swap(true, Ordering::AcqRel)
    }
}

impl fmt::Debug for Message {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Message")
            .field("kind", &self.kind())
            .field("msg_hash", &shared_types::short_hex(&self.msg_hash))
            .field("local", &self.local)
            .field("routing", &self.routing())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn eom(signature: Option<FullSignature>) -> Payload {
        Payload::Eom(Eom {
            timestamp: Timestamp::from_secs(100),
            db_height: 3,
            vm_index: 0,
            minute: 4,
            chain_id: [1u8; 32],
            signature,
        })
    }

    #[test]
    fn test_repeat_hash_ignores_signature() {
        let unsigned = Message::new(eom(None));
        let signed = Message::new(eom(Some(FullSignature::new([2u8; 32], [3u8; 64]))));
        assert_ne!(unsigned.msg_hash(), signed.msg_hash());
        assert_eq!(unsigned.repeat_hash(), signed.repeat_hash());
    }

    #[test]
    fn test_commit_and_reveal_share_content_hash() {
        let entry = Entry::new([5u8; 32], vec![], b"data".to_vec());
        let commit = Message::new(Payload::CommitEntry(CommitEntry {
            timestamp: Timestamp::from_secs(1),
            entry_hash: entry.hash(),
            credits: 1,
            ec_address: [0u8; 32],
        }));
        let reveal = Message::new(Payload::RevealEntry(RevealEntry {
            timestamp: Timestamp::from_secs(2),
            entry,
        }));
        assert_eq!(commit.hash(), reveal.hash());
        assert_ne!(commit.msg_hash(), reveal.msg_hash());
        assert!(commit.needs_ack() && reveal.needs_ack());
    }

    #[test]
    fn test_sent_invalid_only_once() {
        let msg = Message::new(eom(None));
        assert!(msg.mark_sent_invalid());
        assert!(!msg.mark_sent_invalid());
        assert!(msg.sent_invalid());
    }

    #[test]
    fn test_local_flag_and_routing() {
        let msg = Message::local(eom(None));
        assert!(msg.is_local());
        assert_eq!(msg.vm_index(), None);
        msg.set_vm_index(2);
        msg.set_minute(4);
        assert_eq!(msg.routing().vm_index, Some(2));
        assert_eq!(msg.routing().minute, Some(4));
    }

    #[test]
    fn test_routing_is_write_once_until_cleared() {
        let msg = Message::new(eom(None));
        msg.set_vm_index(1);
        msg.set_leader_chain_id([7u8; 32]);
        msg.set_vm_index(3);
        msg.set_leader_chain_id([8u8; 32]);
        assert_eq!(msg.vm_index(), Some(1));
        assert_eq!(msg.routing().leader_chain_id, Some([7u8; 32]));

        msg.clear_routing();
        assert_eq!(msg.routing(), Routing::default());
        msg.set_vm_index(3);
        assert_eq!(msg.vm_index(), Some(3));
    }

    fn amount(address: u8, amount: u64) -> TxAmount {
        TxAmount {
            address: [address; 32],
            amount,
        }
    }

    #[test]
    fn test_factoid_totals() {
        let tx = FactoidTransaction {
            timestamp: Timestamp::from_secs(1),
            inputs: vec![amount(1, 300), amount(1, 200), amount(2, 50)],
            outputs: vec![amount(3, 100)],
            ec_outputs: vec![amount(4, 2)],
        };
        assert_eq!(tx.total_inputs(), Some(550));
        assert_eq!(tx.total_outputs(), Some(100));
        assert_eq!(tx.ec_purchase_cost(10), Some(20));
        let spent = tx.spent_by_address().unwrap();
        assert_eq!(spent[&[1u8; 32]], 500);
        assert_eq!(spent[&[2u8; 32]], 50);
    }

    #[test]
    fn test_factoid_totals_report_overflow() {
        let tx = FactoidTransaction {
            timestamp: Timestamp::from_secs(1),
            inputs: vec![amount(1, u64::MAX), amount(2, 1)],
            outputs: vec![amount(3, u64::MAX), amount(3, 1)],
            ec_outputs: vec![amount(4, u64::MAX)],
        };
        assert_eq!(tx.total_inputs(), None);
        assert_eq!(tx.total_outputs(), None);
        assert_eq!(tx.ec_purchase_cost(2), None);
        assert_eq!(tx.ec_purchase_cost(1), Some(u64::MAX));
        // Amounts above i64::MAX cannot be applied to a balance.
        assert_eq!(tx.spent_by_address(), None);

        let doubled = FactoidTransaction {
            inputs: vec![amount(1, i64::MAX as u64), amount(1, 1)],
            ..tx
        };
        assert_eq!(doubled.spent_by_address(), None);
    }
}
