//! Processed commits awaiting their reveal, keyed by entry hash.

use super::message::{Message, Payload};
use shared_types::{Hash, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;

pub struct CommitTracker {
    commits: HashMap<Hash, Arc<Message>>,
    expiry_ms: u64,
}

fn commit_credits(msg: &Message) -> Option<(bool, u8)> {
    match msg.payload() {
        Payload::CommitChain(c) => Some((true, c.credits)),
        Payload::CommitEntry(c) => Some((false, c.credits)),
        _ => None,
    }
}

impl CommitTracker {
    pub fn new(expiry_ms: u64) -> Self {
        Self {
            commits: HashMap::new(),
            expiry_ms,
        }
    }

    /// True unless an existing commit of the same kind pays at least as many
    /// credits; ties keep the incumbent.
    pub fn is_highest(&self, entry_hash: &Hash, msg: &Message) -> bool {
        let (Some(existing), Some((new_chain, new_credits))) =
            (self.commits.get(entry_hash), commit_credits(msg))
        else {
            return true;
        };
        match commit_credits(existing) {
            Some((old_chain, old_credits)) if old_chain == new_chain => new_credits > old_credits,
            _ => true,
        }
    }

    /// Stores the commit if it is the highest for its entry.
    pub fn put(&mut self, entry_hash: Hash, msg: Arc<Message>) -> bool {
        if !self.is_highest(&entry_hash, &msg) {
            return false;
        }
        self.commits.insert(entry_hash, msg);
        true
    }

    pub fn get(&self, entry_hash: &Hash) -> Option<&Arc<Message>> {
        self.commits.get(entry_hash)
    }

    /// True if the stored commit for `entry_hash` creates a chain.
    pub fn is_chain_commit(&self, entry_hash: &Hash) -> bool {
        self.commits
            .get(entry_hash)
            .and_then(|m| commit_credits(m))
            .map(|(chain, _)| chain)
            .unwrap_or(false)
    }

    pub fn delete(&mut self, entry_hash: &Hash) -> Option<Arc<Message>> {
        self.commits.remove(entry_hash)
    }

    /// True if the commit's timestamp is older than the expiry window.
    pub fn is_expired(&self, msg: &Message, now: Timestamp) -> bool {
        msg.timestamp() < now.saturating_sub_millis(self.expiry_ms)
    }

    pub fn remove_expired(&mut self, now: Timestamp) -> usize {
        let cutoff = now.saturating_sub_millis(self.expiry_ms);
        let before = self.commits.len();
        self.commits.retain(|_, m| m.timestamp() >= cutoff);
        before - self.commits.len()
    }

    pub fn len(&self) -> usize {
        self.commits.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commits.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::message::{CommitChain, CommitEntry};

    fn entry_commit(credits: u8, secs: u64) -> Arc<Message> {
        Message::new(Payload::CommitEntry(CommitEntry {
            timestamp: Timestamp::from_secs(secs),
            entry_hash: [7u8; 32],
            credits,
            ec_address: [0u8; 32],
        }))
    }

    #[test]
    fn test_ties_keep_incumbent() {
        let mut tracker = CommitTracker::new(60_000);
        let first = entry_commit(2, 1);
        let tie = entry_commit(2, 2);
        let higher = entry_commit(3, 3);

        assert!(tracker.put([7u8; 32], first.clone()));
        assert!(!tracker.is_highest(&[7u8; 32], &tie));
        assert!(!tracker.put([7u8; 32], tie));
        assert_eq!(tracker.get(&[7u8; 32]).unwrap().msg_hash(), first.msg_hash());
        assert!(tracker.put([7u8; 32], higher.clone()));
        assert_eq!(tracker.get(&[7u8; 32]).unwrap().msg_hash(), higher.msg_hash());
    }

    #[test]
    fn test_chain_commit_detection() {
        let mut tracker = CommitTracker::new(60_000);
        let chain = Message::new(Payload::CommitChain(CommitChain {
            timestamp: Timestamp::from_secs(1),
            chain_id: [1u8; 32],
            entry_hash: [8u8; 32],
            credits: 11,
            ec_address: [0u8; 32],
        }));
        tracker.put([8u8; 32], chain);
        assert!(tracker.is_chain_commit(&[8u8; 32]));
        assert!(!tracker.is_chain_commit(&[9u8; 32]));
    }

    #[test]
    fn test_expiry() {
        let mut tracker = CommitTracker::new(10_000);
        tracker.put([7u8; 32], entry_commit(1, 1));
        assert_eq!(tracker.remove_expired(Timestamp::from_secs(5)), 0);
        assert_eq!(tracker.remove_expired(Timestamp::from_secs(12)), 1);
        assert!(tracker.is_empty());
    }
}
