//! Channel-backed sinks
//!
//! Bridge the engine's synchronous ports to the async workers of the node
//! runtime. Gossip and missing-message requests are best effort and dropped
//! when the channel is full; write-back is unbounded and never drops.

use crate::domain::{BlockWithEntries, Message};
use crate::ports::{
    BroadcastSink, InvalidMessageSink, MissingMessageRequester, MissingRequest, WriteBack,
};
use shared_types::{short_hex, Entry};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

/// Work for the write-back worker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum WriteBackEvent {
    Entry(Entry),
    Block(Box<BlockWithEntries>),
}

pub struct ChannelBroadcast {
    tx: mpsc::Sender<Arc<Message>>,
}

impl ChannelBroadcast {
    pub fn new(tx: mpsc::Sender<Arc<Message>>) -> Self {
        Self { tx }
    }
}

impl BroadcastSink for ChannelBroadcast {
    fn broadcast(&self, msg: &Arc<Message>) {
        match self.tx.try_send(Arc::clone(msg)) {
            Ok(()) => {}
            Err(TrySendError::Full(dropped)) => {
                warn!(kind = %dropped.kind(), "Broadcast channel full, dropping message");
            }
            Err(TrySendError::Closed(_)) => {
                debug!("Broadcast channel closed");
            }
        }
    }
}

pub struct ChannelRequester {
    tx: mpsc::Sender<MissingRequest>,
}

impl ChannelRequester {
    pub fn new(tx: mpsc::Sender<MissingRequest>) -> Self {
        Self { tx }
    }
}

impl MissingMessageRequester for ChannelRequester {
    fn request(&self, request: MissingRequest) {
        if let Err(TrySendError::Full(request)) = self.tx.try_send(request) {
            debug!(?request, "Request channel full, dropping request");
        }
    }
}

pub struct ChannelWriteBack {
    tx: mpsc::UnboundedSender<WriteBackEvent>,
}

impl ChannelWriteBack {
    pub fn new(tx: mpsc::UnboundedSender<WriteBackEvent>) -> Self {
        Self { tx }
    }
}

impl WriteBack for ChannelWriteBack {
    fn write_entry(&self, entry: Entry) {
        if self.tx.send(WriteBackEvent::Entry(entry)).is_err() {
            warn!("Write-back worker stopped, entry not persisted");
        }
    }

    fn write_block(&self, block: BlockWithEntries) {
        let height = block.block.db_height();
        if self.tx.send(WriteBackEvent::Block(Box::new(block))).is_err() {
            warn!(height, "Write-back worker stopped, block not persisted");
        }
    }
}

/// Logs invalid messages. Nothing else consumes them in a single node.
#[derive(Default)]
pub struct LoggingInvalidSink;

impl InvalidMessageSink for LoggingInvalidSink {
    fn reject(&self, msg: &Arc<Message>) {
        debug!(
            kind = %msg.kind(),
            hash = %short_hex(&msg.msg_hash()),
            "Rejected invalid message"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Eom, Payload};
    use shared_types::Timestamp;

    fn eom_message() -> Arc<Message> {
        Message::new(Payload::Eom(Eom {
            timestamp: Timestamp::from_secs(1),
            minute: 0,
            db_height: 1,
            vm_index: 0,
            chain_id: [1u8; 32],
            signature: None,
        }))
    }

    #[tokio::test]
    async fn test_broadcast_drops_when_full() {
        let (tx, mut rx) = mpsc::channel(1);
        let sink = ChannelBroadcast::new(tx);

        sink.broadcast(&eom_message());
        sink.broadcast(&eom_message());

        assert!(rx.recv().await.is_some());
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_write_back_forwards_entries() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sink = ChannelWriteBack::new(tx);
        let entry = Entry::new([2u8; 32], vec![], b"data".to_vec());

        sink.write_entry(entry.clone());

        assert_eq!(rx.recv().await, Some(WriteBackEvent::Entry(entry)));
    }
}
