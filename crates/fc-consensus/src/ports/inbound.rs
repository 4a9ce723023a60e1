//! Driving ports (inbound queues)
//!
//! Three bounded queues feed the engine: a prioritized queue for DBStates and
//! missing-message responses, a message queue and an ack queue. Producers hold
//! a cloneable [`QueueHandles`]; the engine owns the receiving side and drains
//! it without blocking.

use crate::domain::{Message, MessageKind};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::mpsc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum SubmitError {
    #[error("inbound queue full")]
    QueueFull,

    #[error("inbound queue closed")]
    Closed,
}

impl<T> From<mpsc::error::TrySendError<T>> for SubmitError {
    fn from(err: mpsc::error::TrySendError<T>) -> Self {
        match err {
            mpsc::error::TrySendError::Full(_) => SubmitError::QueueFull,
            mpsc::error::TrySendError::Closed(_) => SubmitError::Closed,
        }
    }
}

/// Which inbound queue a message is routed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    Prioritized,
    Messages,
    Acks,
}

impl QueueKind {
    pub fn for_message(msg: &Message) -> Self {
        match msg.kind() {
            MessageKind::Ack => QueueKind::Acks,
            MessageKind::DbState | MessageKind::MissingMessageResponse => QueueKind::Prioritized,
            _ => QueueKind::Messages,
        }
    }
}

/// Producer side of the inbound queues.
#[derive(Clone)]
pub struct QueueHandles {
    prioritized: mpsc::Sender<Arc<Message>>,
    messages: mpsc::Sender<Arc<Message>>,
    acks: mpsc::Sender<Arc<Message>>,
}

impl QueueHandles {
    fn sender(&self, kind: QueueKind) -> &mpsc::Sender<Arc<Message>> {
        match kind {
            QueueKind::Prioritized => &self.prioritized,
            QueueKind::Messages => &self.messages,
            QueueKind::Acks => &self.acks,
        }
    }

    /// Routes and enqueues without waiting.
    pub fn submit(&self, msg: Arc<Message>) -> Result<(), SubmitError> {
        let kind = QueueKind::for_message(&msg);
        self.sender(kind).try_send(msg).map_err(SubmitError::from)
    }

    /// Routes and enqueues, waiting for capacity.
    pub async fn submit_wait(&self, msg: Arc<Message>) -> Result<(), SubmitError> {
        let kind = QueueKind::for_message(&msg);
        self.sender(kind)
            .send(msg)
            .await
            .map_err(|_| SubmitError::Closed)
    }
}

/// Consumer side, owned by the engine.
pub struct InboundQueues {
    pub(crate) prioritized: mpsc::Receiver<Arc<Message>>,
    pub(crate) messages: mpsc::Receiver<Arc<Message>>,
    pub(crate) acks: mpsc::Receiver<Arc<Message>>,
}

impl InboundQueues {
    pub fn receiver(&mut self, kind: QueueKind) -> &mut mpsc::Receiver<Arc<Message>> {
        match kind {
            QueueKind::Prioritized => &mut self.prioritized,
            QueueKind::Messages => &mut self.messages,
            QueueKind::Acks => &mut self.acks,
        }
    }
}

/// Creates the three bounded queues with `capacity` each.
pub fn inbound_queues(capacity: usize) -> (QueueHandles, InboundQueues) {
    let (prioritized_tx, prioritized_rx) = mpsc::channel(capacity);
    let (messages_tx, messages_rx) = mpsc::channel(capacity);
    let (acks_tx, acks_rx) = mpsc::channel(capacity);
    (
        QueueHandles {
            prioritized: prioritized_tx,
            messages: messages_tx,
            acks: acks_tx,
        },
        InboundQueues {
            prioritized: prioritized_rx,
            messages: messages_rx,
            acks: acks_rx,
        },
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Heartbeat, Payload};
    use shared_types::Timestamp;

    #[tokio::test]
    async fn test_submit_routes_by_kind() {
        let (handles, mut queues) = inbound_queues(4);
        let heartbeat = Message::new(Payload::Heartbeat(Heartbeat {
            timestamp: Timestamp::from_secs(1),
            db_height: 1,
            minute: 0,
            identity: [0u8; 32],
            dblock_hash: [0u8; 32],
            signature: None,
        }));
        handles.submit(heartbeat).unwrap();
        assert!(queues.messages.try_recv().is_ok());
        assert!(queues.acks.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_full_queue_reports_error() {
        let (handles, _queues) = inbound_queues(1);
        let make = |secs| {
            Message::new(Payload::Heartbeat(Heartbeat {
                timestamp: Timestamp::from_secs(secs),
                db_height: 1,
                minute: 0,
                identity: [0u8; 32],
                dblock_hash: [0u8; 32],
                signature: None,
            }))
        };
        handles.submit(make(1)).unwrap();
        assert_eq!(handles.submit(make(2)), Err(SubmitError::QueueFull));
    }
}
