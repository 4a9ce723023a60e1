//! Directory-block bookkeeping: known headers, saved/completed heights and
//! DBStates received ahead of the saved height.

use super::block::DirectoryBlockHeader;
use super::message::Message;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Default)]
pub struct BlockLedger {
    headers: BTreeMap<u32, DirectoryBlockHeader>,
    highest_saved: Option<u32>,
    highest_completed: Option<u32>,
}

impl BlockLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a block whose header is final (sealed here or received).
    pub fn record_completed(&mut self, header: DirectoryBlockHeader) {
        let height = header.db_height;
        self.headers.insert(height, header);
        if self.highest_completed.map_or(true, |h| height > h) {
            self.highest_completed = Some(height);
        }
    }

    pub fn mark_saved(&mut self, db_height: u32) {
        if self.highest_saved.map_or(true, |h| db_height > h) {
            self.highest_saved = Some(db_height);
        }
    }

    pub fn header(&self, db_height: u32) -> Option<&DirectoryBlockHeader> {
        self.headers.get(&db_height)
    }

    pub fn highest_saved(&self) -> Option<u32> {
        self.highest_saved
    }

    pub fn highest_completed(&self) -> Option<u32> {
        self.highest_completed
    }

    /// True if `db_height` is at or below the highest saved block.
    pub fn is_saved(&self, db_height: u32) -> bool {
        self.highest_saved.is_some_and(|h| db_height <= h)
    }

    /// Height the next saved block must have.
    pub fn next_to_save(&self) -> u32 {
        self.highest_saved.map_or(0, |h| h + 1)
    }

    /// Drops headers below `db_height`.
    pub fn trim_below(&mut self, db_height: u32) {
        self.headers = self.headers.split_off(&db_height);
    }
}

/// DBStates that arrived before the blocks preceding them were saved.
#[derive(Default)]
pub struct DbStateBuffer {
    received: BTreeMap<u32, Arc<Message>>,
}

impl DbStateBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Buffers a DBState; the first one received for a height wins.
    pub fn insert(&mut self, db_height: u32, msg: Arc<Message>) -> bool {
        if self.received.contains_key(&db_height) {
            return false;
        }
        self.received.insert(db_height, msg);
        true
    }

    /// Drops everything at or below the saved height.
    pub fn trim(&mut self, saved: Option<u32>) {
        if let Some(saved) = saved {
            self.received = self.received.split_off(&(saved + 1));
        }
    }

    /// Removes and returns the DBState for `db_height`, if buffered.
    pub fn take(&mut self, db_height: u32) -> Option<Arc<Message>> {
        self.received.remove(&db_height)
    }

    pub fn len(&self) -> usize {
        self.received.len()
    }

    pub fn is_empty(&self) -> bool {
        self.received.is_empty()
    }
}
