//! Message-order reconciler.
//!
//! Sits between the network and the engine. Everything received is forwarded
//! to the inbound queues at once; the engine copes with acks and messages in
//! either order. Acks and the messages that need them are also tracked in an
//! [`AckMatcher`]. When the minute changes, acks still missing their message
//! trigger a missing-message request and messages no ack has covered are
//! resubmitted. The matcher is reset at every new height.

use fc_consensus::domain::AckMatcher;
use fc_consensus::ports::{MissingMessageRequester, MissingRequest};
use fc_consensus::{Message, QueueHandles, RoundPosition, RoundStatus, SubmitError};
use shared_types::short_hex;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

pub struct MessageOrderReconciler {
    matcher: AckMatcher,
    handles: QueueHandles,
    requester: Arc<dyn MissingMessageRequester>,
    position: RoundPosition,
}

impl MessageOrderReconciler {
    pub fn new(handles: QueueHandles, requester: Arc<dyn MissingMessageRequester>) -> Self {
        Self {
            matcher: AckMatcher::new(),
            handles,
            requester,
            position: RoundPosition::default(),
        }
    }

    /// Tracks `msg` and forwards it to the engine. Local messages are not tracked.
    pub fn accept(&mut self, msg: Arc<Message>) {
        if msg.is_local() {
            self.forward(msg);
            return;
        }
        let (pair, _) = self.matcher.add(Arc::clone(&msg));
        if let Some(pair) = pair {
            debug!(
                kind = %pair.msg.kind(),
                hash = %short_hex(&pair.msg.msg_hash()),
                "Matched message with its ack"
            );
        }
        self.forward(msg);
    }

    fn forward(&self, msg: Arc<Message>) {
        match self.handles.submit(msg) {
            Ok(()) => {}
            Err(SubmitError::QueueFull) => warn!("Inbound queue full, dropping network message"),
            Err(SubmitError::Closed) => debug!("Inbound queues closed"),
        }
    }

    /// Reconciles on a round move. Returns `(requested, resubmitted)`.
    pub fn on_round(&mut self, position: RoundPosition) -> (usize, usize) {
        if position == self.position {
            return (0, 0);
        }
        let new_height = position.db_height != self.position.db_height;
        self.position = position;
        if new_height {
            self.matcher.reset();
            return (0, 0);
        }

        let orphans = self.matcher.orphan_acks();
        for ack in &orphans {
            if let Some(ack) = ack.as_ack() {
                self.requester.request(MissingRequest::Message {
                    msg_hash: ack.message_hash,
                    db_height: ack.db_height,
                });
            }
        }
        let unacked = self.matcher.unacked_messages();
        for msg in &unacked {
            self.forward(Arc::clone(msg));
        }
        let matched = self.matcher.take_pairs().len();
        if !orphans.is_empty() || !unacked.is_empty() {
            debug!(
                height = position.db_height,
                minute = position.minute,
                matched,
                orphan_acks = orphans.len(),
                unacked = unacked.len(),
                "Reconciled message order"
            );
        }
        (orphans.len(), unacked.len())
    }

    pub fn pending(&self) -> (usize, usize) {
        self.matcher.pending()
    }

    pub async fn run(
        mut self,
        mut network: mpsc::Receiver<Arc<Message>>,
        mut round: watch::Receiver<RoundStatus>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Message-order reconciler started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = network.recv() => match received {
                    Some(msg) => self.accept(msg),
                    None => break,
                },
                changed = round.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let position = round.borrow_and_update().position;
                    self.on_round(position);
                }
            }
        }
        info!("Message-order reconciler stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_consensus::adapters::RecordingRequester;
    use fc_consensus::domain::{Ack, CommitEntry, Payload};
    use fc_consensus::ports::{inbound_queues, InboundQueues, QueueKind};
    use shared_types::Timestamp;

    fn commit(n: u8) -> Arc<Message> {
        Message::new(Payload::CommitEntry(CommitEntry {
            timestamp: Timestamp::from_secs(100),
            entry_hash: [n; 32],
            credits: 1,
            ec_address: [0xEC; 32],
        }))
    }

    fn ack_for(msg: &Message, db_height: u32) -> Arc<Message> {
        Message::new(Payload::Ack(Ack {
            timestamp: Timestamp::from_secs(100),
            salt: [0u8; 8],
            salt_number: 0,
            db_height,
            vm_index: 0,
            minute: 0,
            height: 0,
            serial_hash: msg.msg_hash(),
            message_hash: msg.msg_hash(),
            leader_chain_id: [1u8; 32],
            signature: None,
        }))
    }

    fn drain(queues: &mut InboundQueues, kind: QueueKind) -> usize {
        let mut count = 0;
        while queues.receiver(kind).try_recv().is_ok() {
            count += 1;
        }
        count
    }

    fn create_test_reconciler() -> (MessageOrderReconciler, InboundQueues, Arc<RecordingRequester>) {
        let (handles, queues) = inbound_queues(16);
        let requester = Arc::new(RecordingRequester::new());
        let mut reconciler = MessageOrderReconciler::new(handles, requester.clone());
        reconciler.on_round(RoundPosition::new(1, 0));
        (reconciler, queues, requester)
    }

    #[test]
    fn test_everything_is_forwarded() {
        let (mut reconciler, mut queues, _) = create_test_reconciler();
        let msg = commit(1);
        reconciler.accept(ack_for(&msg, 1));
        reconciler.accept(msg);

        assert_eq!(drain(&mut queues, QueueKind::Acks), 1);
        assert_eq!(drain(&mut queues, QueueKind::Messages), 1);
        assert_eq!(reconciler.pending(), (0, 0));
    }

    #[test]
    fn test_orphan_ack_requests_message_on_minute_change() {
        let (mut reconciler, _queues, requester) = create_test_reconciler();
        let missing = commit(2);
        reconciler.accept(ack_for(&missing, 1));

        assert_eq!(reconciler.on_round(RoundPosition::new(1, 1)), (1, 0));
        assert_eq!(
            requester.requests(),
            vec![MissingRequest::Message {
                msg_hash: missing.msg_hash(),
                db_height: 1,
            }]
        );
    }

    #[test]
    fn test_unacked_message_resubmitted() {
        let (mut reconciler, mut queues, _) = create_test_reconciler();
        reconciler.accept(commit(3));
        assert_eq!(drain(&mut queues, QueueKind::Messages), 1);

        assert_eq!(reconciler.on_round(RoundPosition::new(1, 1)), (0, 1));
        assert_eq!(drain(&mut queues, QueueKind::Messages), 1);
        // Same position again is not a round change.
        assert_eq!(reconciler.on_round(RoundPosition::new(1, 1)), (0, 0));
    }

    #[test]
    fn test_new_height_resets_matcher() {
        let (mut reconciler, _queues, requester) = create_test_reconciler();
        reconciler.accept(ack_for(&commit(4), 1));
        reconciler.accept(commit(5));

        assert_eq!(reconciler.on_round(RoundPosition::new(2, 0)), (0, 0));
        assert_eq!(reconciler.pending(), (0, 0));
        assert!(requester.requests().is_empty());
    }

    #[test]
    fn test_local_messages_pass_through() {
        let (mut reconciler, mut queues, _) = create_test_reconciler();
        let eom = crate::workers::eom_template(
            &RoundStatus {
                position: RoundPosition::new(1, 0),
                leader: true,
                ..Default::default()
            },
            Timestamp::from_secs(100),
        );
        reconciler.accept(eom);

        assert_eq!(drain(&mut queues, QueueKind::Messages), 1);
        assert_eq!(reconciler.pending(), (0, 0));
    }
}
