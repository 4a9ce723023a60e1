//! Recording adapters for tests and simulations
//!
//! Each one keeps what the engine handed it. `LoopbackBroadcast` also
//! delivers every broadcast to connected peers' inbound queues, as the
//! network would: the copy a peer receives is a fresh non-local message.

use crate::domain::{BlockWithEntries, Message};
use crate::ports::{
    BroadcastSink, InvalidMessageSink, MissingMessageRequester, MissingRequest, QueueHandles,
    WriteBack,
};
use parking_lot::RwLock;
use shared_types::{Entry, Hash};
use std::sync::Arc;
use tracing::debug;

pub struct RecordingBroadcast {
    sent: RwLock<Vec<Arc<Message>>>,
}

impl RecordingBroadcast {
    pub fn new() -> Self {
        Self {
            sent: RwLock::new(Vec::new()),
        }
    }

    pub fn sent(&self) -> Vec<Arc<Message>> {
        self.sent.read().clone()
    }

    pub fn sent_count(&self) -> usize {
        self.sent.read().len()
    }

    pub fn clear(&self) {
        self.sent.write().clear();
    }
}

impl Default for RecordingBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSink for RecordingBroadcast {
    fn broadcast(&self, msg: &Arc<Message>) {
        self.sent.write().push(Arc::clone(msg));
    }
}

/// Records broadcasts and forwards them to connected peers.
pub struct LoopbackBroadcast {
    record: RecordingBroadcast,
    peers: RwLock<Vec<QueueHandles>>,
}

impl LoopbackBroadcast {
    pub fn new() -> Self {
        Self {
            record: RecordingBroadcast::new(),
            peers: RwLock::new(Vec::new()),
        }
    }

    pub fn connect(&self, peer: QueueHandles) {
        self.peers.write().push(peer);
    }

    pub fn sent(&self) -> Vec<Arc<Message>> {
        self.record.sent()
    }
}

impl Default for LoopbackBroadcast {
    fn default() -> Self {
        Self::new()
    }
}

impl BroadcastSink for LoopbackBroadcast {
    fn broadcast(&self, msg: &Arc<Message>) {
        self.record.broadcast(msg);
        for peer in self.peers.read().iter() {
            if let Err(err) = peer.submit(Message::new(msg.payload().clone())) {
                debug!(%err, kind = %msg.kind(), "Loopback delivery failed");
            }
        }
    }
}

pub struct RecordingInvalidSink {
    rejected: RwLock<Vec<Hash>>,
}

impl RecordingInvalidSink {
    pub fn new() -> Self {
        Self {
            rejected: RwLock::new(Vec::new()),
        }
    }

    /// Message hashes in the order they were rejected.
    pub fn rejected(&self) -> Vec<Hash> {
        self.rejected.read().clone()
    }
}

impl Default for RecordingInvalidSink {
    fn default() -> Self {
        Self::new()
    }
}

impl InvalidMessageSink for RecordingInvalidSink {
    fn reject(&self, msg: &Arc<Message>) {
        self.rejected.write().push(msg.msg_hash());
    }
}

pub struct RecordingRequester {
    requests: RwLock<Vec<MissingRequest>>,
}

impl RecordingRequester {
    pub fn new() -> Self {
        Self {
            requests: RwLock::new(Vec::new()),
        }
    }

    pub fn requests(&self) -> Vec<MissingRequest> {
        self.requests.read().clone()
    }
}

impl Default for RecordingRequester {
    fn default() -> Self {
        Self::new()
    }
}

impl MissingMessageRequester for RecordingRequester {
    fn request(&self, request: MissingRequest) {
        self.requests.write().push(request);
    }
}

pub struct RecordingWriteBack {
    entries: RwLock<Vec<Entry>>,
    blocks: RwLock<Vec<BlockWithEntries>>,
}

impl RecordingWriteBack {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            blocks: RwLock::new(Vec::new()),
        }
    }

    pub fn entries(&self) -> Vec<Entry> {
        self.entries.read().clone()
    }

    pub fn blocks(&self) -> Vec<BlockWithEntries> {
        self.blocks.read().clone()
    }

    pub fn last_block(&self) -> Option<BlockWithEntries> {
        self.blocks.read().last().cloned()
    }
}

impl Default for RecordingWriteBack {
    fn default() -> Self {
        Self::new()
    }
}

impl WriteBack for RecordingWriteBack {
    fn write_entry(&self, entry: Entry) {
        self.entries.write().push(entry);
    }

    fn write_block(&self, block: BlockWithEntries) {
        self.blocks.write().push(block);
    }
}
