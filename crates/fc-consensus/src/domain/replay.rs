//! # Replay Filter
//!
//! Deduplicates messages and transactions in three independent namespaces:
//!
//! - `Internal`: repeat hashes of every message placed in a process list
//! - `Block`: entries and factoid transactions already in a block
//! - `Reveal`: entry hashes whose reveal has been processed
//!
//! Each record is `(hash, first-seen timestamp)`. A timestamp outside
//! `now ± window` is never valid, and records whose timestamp fell out of the
//! window are evicted, so memory is bounded by the traffic of one window.

use shared_types::{Hash, Timestamp};
use std::collections::HashMap;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ReplayNamespace {
    Internal,
    Block,
    Reveal,
}

impl ReplayNamespace {
    const ALL: [ReplayNamespace; 3] = [
        ReplayNamespace::Internal,
        ReplayNamespace::Block,
        ReplayNamespace::Reveal,
    ];

    fn slot(self) -> usize {
        match self {
            ReplayNamespace::Internal => 0,
            ReplayNamespace::Block => 1,
            ReplayNamespace::Reveal => 2,
        }
    }
}

pub struct ReplayFilter {
    seen: [HashMap<Hash, Timestamp>; 3],
    window_ms: u64,
}

impl ReplayFilter {
    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self {
            seen: [HashMap::new(), HashMap::new(), HashMap::new()],
            window_ms,
        }
    }

    fn in_window(&self, timestamp: Timestamp, now: Timestamp) -> bool {
        timestamp >= now.saturating_sub_millis(self.window_ms)
            && timestamp <= now.saturating_add_millis(self.window_ms)
    }

    /// Check only: the timestamp is inside the window and the hash is unseen.
    pub fn is_valid(
        &self,
        namespace: ReplayNamespace,
        hash: &Hash,
        timestamp: Timestamp,
        now: Timestamp,
    ) -> bool {
        self.in_window(timestamp, now) && !self.seen[namespace.slot()].contains_key(hash)
    }

    /// Checks like [`is_valid`](Self::is_valid) and records the hash when valid.
    pub fn check_and_record(
        &mut self,
        namespace: ReplayNamespace,
        hash: &Hash,
        timestamp: Timestamp,
        now: Timestamp,
    ) -> bool {
        if !self.is_valid(namespace, hash, timestamp, now) {
            return false;
        }
        self.seen[namespace.slot()].insert(*hash, timestamp);
        true
    }

    /// Records a hash regardless of its timestamp (block contents being saved).
    pub fn record(&mut self, namespace: ReplayNamespace, hash: &Hash, timestamp: Timestamp) {
        self.seen[namespace.slot()].entry(*hash).or_insert(timestamp);
    }

    /// Forgets a hash, e.g. when its process-list slot is cleared.
    pub fn remove(&mut self, namespace: ReplayNamespace, hash: &Hash) -> bool {
        self.seen[namespace.slot()].remove(hash).is_some()
    }

    /// True if the hash has never been recorded in `namespace`.
    pub fn is_unique(&self, namespace: ReplayNamespace, hash: &Hash) -> bool {
        !self.seen[namespace.slot()].contains_key(hash)
    }

    /// Drops records whose timestamp is older than `now - window`.
    pub fn evict(&mut self, now: Timestamp) -> usize {
        let cutoff = now.saturating_sub_millis(self.window_ms);
        let mut removed = 0;
        for namespace in ReplayNamespace::ALL {
            let set = &mut self.seen[namespace.slot()];
            let before = set.len();
            set.retain(|_, ts| *ts >= cutoff);
            removed += before - set.len();
        }
        removed
    }

    pub fn len(&self, namespace: ReplayNamespace) -> usize {
        self.seen[namespace.slot()].len()
    }

    pub fn is_empty(&self) -> bool {
        self.seen.iter().all(HashMap::is_empty)
    }
}
