//! Ack/message matcher
//!
//! Pairs an application message with its acknowledgment regardless of which
//! arrives first. Used by the message-order reconciler to find acks whose
//! message never arrived and messages no leader acknowledged.

use super::message::Message;
use shared_types::Hash;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// A message and the ack that covers it.
#[derive(Clone, Debug)]
pub struct AckPair {
    pub ack: Arc<Message>,
    pub msg: Arc<Message>,
}

#[derive(Default)]
pub struct AckMatcher {
    /// Acks waiting for their message, keyed by the acknowledged message hash.
    acks: HashMap<Hash, Arc<Message>>,
    /// Messages waiting for their ack, keyed by message hash.
    messages: HashMap<Hash, Arc<Message>>,
    paired: HashSet<Hash>,
    pairs: Vec<AckPair>,
}

impl AckMatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an ack or a message that needs one.
    ///
    /// Returns the pair it completes, if any, and `false` only for messages that
    /// neither are acks nor need one. Re-adding is a no-op.
    pub fn add(&mut self, msg: Arc<Message>) -> (Option<AckPair>, bool) {
        if let Some(ack) = msg.as_ack() {
            let key = ack.message_hash;
            if self.paired.contains(&key) || self.acks.contains_key(&key) {
                return (None, true);
            }
            match self.messages.remove(&key) {
                Some(found) => (Some(self.complete(msg, found)), true),
                None => {
                    self.acks.insert(key, msg);
                    (None, true)
                }
            }
        } else if msg.needs_ack() {
            let key = msg.msg_hash();
            if self.paired.contains(&key) || self.messages.contains_key(&key) {
                return (None, true);
            }
            match self.acks.remove(&key) {
                Some(ack) => (Some(self.complete(ack, msg)), true),
                None => {
                    self.messages.insert(key, msg);
                    (None, true)
                }
            }
        } else {
            (None, false)
        }
    }

    fn complete(&mut self, ack: Arc<Message>, msg: Arc<Message>) -> AckPair {
        self.paired.insert(msg.msg_hash());
        let pair = AckPair { ack, msg };
        self.pairs.push(pair.clone());
        pair
    }

    /// Acks whose message has not been seen.
    pub fn orphan_acks(&self) -> Vec<Arc<Message>> {
        self.acks.values().cloned().collect()
    }

    /// Messages no ack has covered yet.
    pub fn unacked_messages(&self) -> Vec<Arc<Message>> {
        self.messages.values().cloned().collect()
    }

    pub fn take_pairs(&mut self) -> Vec<AckPair> {
        std::mem::take(&mut self.pairs)
    }

    /// Forgets everything, keeping nothing across a block boundary.
    pub fn reset(&mut self) {
        self.acks.clear();
        self.messages.clear();
        self.paired.clear();
        self.pairs.clear();
    }

    pub fn pending(&self) -> (usize, usize) {
        (self.acks.len(), self.messages.len())
    }
}
