//! Holding
//!
//! Messages that cannot execute yet. [`HoldingStore`] keeps messages waiting on
//! an ack, a future timestamp or the round; [`DependentHolding`] keeps
//! messages waiting on a named dependency (a commit, a chain or a height) and
//! releases them when it is met.

use super::message::{Message, MessageKind};
use shared_types::{ChainId, Hash, Timestamp};
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct HoldingStore {
    messages: HashMap<Hash, Arc<Message>>,
    by_content: HashMap<(MessageKind, Hash), Hash>,
}

impl HoldingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a message; returns false if it was already held.
    pub fn add(&mut self, msg: Arc<Message>) -> bool {
        let msg_hash = msg.msg_hash();
        if self.messages.contains_key(&msg_hash) {
            return false;
        }
        self.by_content.insert((msg.kind(), msg.hash()), msg_hash);
        self.messages.insert(msg_hash, msg);
        true
    }

    pub fn remove(&mut self, msg_hash: &Hash) -> Option<Arc<Message>> {
        let msg = self.messages.remove(msg_hash)?;
        let key = (msg.kind(), msg.hash());
        if self.by_content.get(&key) == Some(msg_hash) {
            self.by_content.remove(&key);
        }
        Some(msg)
    }

    pub fn get(&self, msg_hash: &Hash) -> Option<&Arc<Message>> {
        self.messages.get(msg_hash)
    }

    pub fn contains(&self, msg_hash: &Hash) -> bool {
        self.messages.contains_key(msg_hash)
    }

    /// Held message of `kind` whose content hash is `hash`.
    pub fn find(&self, kind: MessageKind, hash: &Hash) -> Option<&Arc<Message>> {
        self.by_content
            .get(&(kind, *hash))
            .and_then(|msg_hash| self.messages.get(msg_hash))
    }

    /// Snapshot ordered by timestamp so reviews are deterministic.
    pub fn snapshot(&self) -> Vec<Arc<Message>> {
        let mut all: Vec<Arc<Message>> = self.messages.values().cloned().collect();
        all.sort_by(|a, b| {
            a.timestamp()
                .cmp(&b.timestamp())
                .then_with(|| a.msg_hash().cmp(&b.msg_hash()))
        });
        all
    }

    pub fn clear(&mut self) -> usize {
        let count = self.messages.len();
        self.messages.clear();
        self.by_content.clear();
        count
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

/// What a dependent message is waiting for.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dependency {
    /// The commit for this entry hash must be processed.
    Commit(Hash),
    /// The chain must exist.
    Chain(ChainId),
    /// The round must reach this directory-block height.
    Height(u32),
}

#[derive(Default)]
pub struct DependentHolding {
    waiting: HashMap<Dependency, Vec<Arc<Message>>>,
    index: HashMap<Hash, Dependency>,
}

impl DependentHolding {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parks a message behind `dependency`; false if it is already parked.
    pub fn add(&mut self, dependency: Dependency, msg: Arc<Message>) -> bool {
        let msg_hash = msg.msg_hash();
        if self.index.contains_key(&msg_hash) {
            return false;
        }
        self.index.insert(msg_hash, dependency);
        self.waiting.entry(dependency).or_default().push(msg);
        true
    }

    /// Releases everything waiting on `dependency`.
    pub fn release(&mut self, dependency: &Dependency) -> Vec<Arc<Message>> {
        let released = self.waiting.remove(dependency).unwrap_or_default();
        for msg in &released {
            self.index.remove(&msg.msg_hash());
        }
        released
    }

    /// Releases every message waiting on a height at or below `height`.
    pub fn release_heights_up_to(&mut self, height: u32) -> Vec<Arc<Message>> {
        let mut ready: Vec<Dependency> = self
            .waiting
            .keys()
            .filter(|dep| matches!(dep, Dependency::Height(h) if *h <= height))
            .copied()
            .collect();
        ready.sort_by_key(|dep| match dep {
            Dependency::Height(h) => *h,
            _ => 0,
        });
        ready.iter().flat_map(|dep| self.release(dep)).collect()
    }

    pub fn get(&self, msg_hash: &Hash) -> Option<Arc<Message>> {
        let dependency = self.index.get(msg_hash)?;
        self.waiting
            .get(dependency)?
            .iter()
            .find(|m| &m.msg_hash() == msg_hash)
            .cloned()
    }

    pub fn remove(&mut self, msg_hash: &Hash) -> Option<Arc<Message>> {
        let dependency = self.index.remove(msg_hash)?;
        let list = self.waiting.get_mut(&dependency)?;
        let position = list.iter().position(|m| &m.msg_hash() == msg_hash)?;
        let msg = list.swap_remove(position);
        if list.is_empty() {
            self.waiting.remove(&dependency);
        }
        Some(msg)
    }

    /// Drops parked messages with a timestamp before `cutoff`.
    pub fn expire(&mut self, cutoff: Timestamp) -> usize {
        let mut removed = 0;
        let index = &mut self.index;
        self.waiting.retain(|_, list| {
            list.retain(|m| {
                let keep = m.timestamp() >= cutoff;
                if !keep {
                    index.remove(&m.msg_hash());
                    removed += 1;
                }
                keep
            });
            !list.is_empty()
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }
}
