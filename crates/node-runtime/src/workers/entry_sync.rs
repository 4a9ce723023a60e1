//! Entry-sync worker.
//!
//! Walks saved directory blocks and collects the entries they reference that
//! are not in the store. Missing entries are requested from peers on every
//! pass; the pause between passes grows quadratically while anything is still
//! missing and resets once everything has arrived.

use fc_consensus::ports::{ChainStore, MissingMessageRequester, MissingRequest};
use shared_types::{short_hex, Hash, StoreError};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{debug, info, warn};

const BACKOFF_UNIT: Duration = Duration::from_millis(100);

/// An entry still missing from the store.
#[derive(Clone, Debug, PartialEq, Eq)]
struct Recheck {
    entry_hash: Hash,
    db_height: u32,
    tries: u32,
}

pub struct EntrySync {
    store: Arc<dyn ChainStore>,
    requester: Arc<dyn MissingMessageRequester>,
    /// Highest block whose entries have been collected.
    highest_checked: Option<u32>,
    missing: Vec<Recheck>,
    /// Passes since the missing list was last empty.
    pass: u32,
    max_backoff: Duration,
}

impl EntrySync {
    pub fn new(
        store: Arc<dyn ChainStore>,
        requester: Arc<dyn MissingMessageRequester>,
        max_backoff: Duration,
    ) -> Self {
        Self {
            store,
            requester,
            highest_checked: None,
            missing: Vec::new(),
            pass: 0,
            max_backoff,
        }
    }

    /// Collects missing entries of blocks saved since the last scan.
    /// Returns how many were added.
    pub fn scan(&mut self) -> Result<usize, StoreError> {
        let Some(highest_saved) = self.store.highest_saved_height()? else {
            return Ok(0);
        };
        let from = self.highest_checked.map_or(0, |h| h + 1);
        let mut added = 0;
        for db_height in from..=highest_saved {
            if self.store.fetch_dblock(db_height)?.is_none() {
                // Not written yet; pick it up on the next scan.
                break;
            }
            for entry_hash in self.store.fetch_dblock_entries(db_height)? {
                if !self.store.has_entry(&entry_hash)? {
                    self.missing.push(Recheck {
                        entry_hash,
                        db_height,
                        tries: 0,
                    });
                    added += 1;
                }
            }
            self.highest_checked = Some(db_height);
        }
        if added > 0 {
            debug!(added, highest_checked = ?self.highest_checked, "Found missing entries");
        }
        Ok(added)
    }

    /// Drops entries that have arrived and requests the rest. Returns how many
    /// are still missing.
    pub fn recheck(&mut self) -> Result<usize, StoreError> {
        if self.missing.is_empty() {
            self.pass = 0;
            return Ok(0);
        }
        self.pass += 1;

        let mut still_missing = Vec::with_capacity(self.missing.len());
        for mut recheck in std::mem::take(&mut self.missing) {
            if self.store.has_entry(&recheck.entry_hash)? {
                if recheck.tries > 0 {
                    debug!(
                        entry = %short_hex(&recheck.entry_hash),
                        height = recheck.db_height,
                        tries = recheck.tries,
                        "Found entry"
                    );
                }
                continue;
            }
            recheck.tries += 1;
            self.requester.request(MissingRequest::Entry {
                entry_hash: recheck.entry_hash,
                db_height: recheck.db_height,
            });
            still_missing.push(recheck);
        }
        self.missing = still_missing;
        if self.missing.is_empty() {
            info!(complete = ?self.complete_height(), "Entry sync caught up");
            self.pass = 0;
        }
        Ok(self.missing.len())
    }

    /// Extra pause before the next pass: `pass² × 100ms`, capped.
    pub fn backoff(&self) -> Duration {
        let pass = self.pass.min(1_000);
        (BACKOFF_UNIT * pass * pass).min(self.max_backoff)
    }

    /// Highest height below which no entry is missing.
    pub fn complete_height(&self) -> Option<u32> {
        match self.missing.iter().map(|r| r.db_height).min() {
            Some(0) => None,
            Some(lowest) => Some(lowest - 1),
            None => self.highest_checked,
        }
    }

    pub fn missing_count(&self) -> usize {
        self.missing.len()
    }

    pub async fn run(mut self, interval: Duration, mut shutdown: watch::Receiver<bool>) {
        info!(interval_ms = interval.as_millis() as u64, "Entry sync started");
        loop {
            let pause = interval + self.backoff();
            tokio::select! {
                _ = shutdown.changed() => break,
                _ = tokio::time::sleep(pause) => {}
            }
            if let Err(err) = self.scan().and_then(|_| self.recheck()) {
                warn!(error = %err, "Entry sync pass failed");
            }
        }
        info!("Entry sync stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_consensus::adapters::{HashChainAssembler, InMemoryChainStore, RecordingRequester};
    use fc_consensus::domain::{BlockCandidate, EntryBlock, SealedBlock};
    use fc_consensus::ports::BlockAssembler;
    use shared_types::{Entry, Timestamp, ZERO_HASH};

    fn block_with(db_height: u32, prev: Option<&SealedBlock>, entries: &[&Entry]) -> SealedBlock {
        let entry_blocks = entries
            .iter()
            .map(|entry| {
                let mut eblock = EntryBlock::new(entry.chain_id, db_height);
                eblock.add_entry(entry.hash());
                eblock
            })
            .collect();
        let candidate = BlockCandidate {
            db_height,
            prev_key_mr: prev.map_or(ZERO_HASH, |p| p.header.key_mr()),
            timestamp: Timestamp::from_secs(1_700_000_000),
            entry_blocks,
            ..Default::default()
        };
        HashChainAssembler::default()
            .seal(candidate, prev.map(|p| &p.header))
            .unwrap()
    }

    fn create_test_sync() -> (EntrySync, Arc<InMemoryChainStore>, Arc<RecordingRequester>) {
        let store = Arc::new(InMemoryChainStore::new());
        let requester = Arc::new(RecordingRequester::new());
        let sync = EntrySync::new(store.clone(), requester.clone(), Duration::from_secs(60));
        (sync, store, requester)
    }

    #[test]
    fn test_missing_entries_requested_until_found() {
        let (mut sync, store, requester) = create_test_sync();
        let present = Entry::new([1u8; 32], vec![], b"present".to_vec());
        let absent = Entry::new([2u8; 32], vec![], b"absent".to_vec());
        store.insert_entry(&present).unwrap();
        store
            .save_dblock(&block_with(0, None, &[&present, &absent]))
            .unwrap();

        assert_eq!(sync.scan().unwrap(), 1);
        assert_eq!(sync.recheck().unwrap(), 1);
        assert_eq!(sync.recheck().unwrap(), 1);
        assert_eq!(requester.requests().len(), 2);
        assert_eq!(
            requester.requests()[0],
            MissingRequest::Entry {
                entry_hash: absent.hash(),
                db_height: 0,
            }
        );
        assert_eq!(sync.complete_height(), None);

        store.insert_entry(&absent).unwrap();
        assert_eq!(sync.recheck().unwrap(), 0);
        assert_eq!(sync.complete_height(), Some(0));
        assert_eq!(sync.backoff(), Duration::ZERO);
    }

    #[test]
    fn test_scan_resumes_after_checked_height() {
        let (mut sync, store, _) = create_test_sync();
        let first = Entry::new([3u8; 32], vec![], b"a".to_vec());
        let second = Entry::new([4u8; 32], vec![], b"b".to_vec());
        let genesis = block_with(0, None, &[&first]);
        store.save_dblock(&genesis).unwrap();

        assert_eq!(sync.scan().unwrap(), 1);
        assert_eq!(sync.scan().unwrap(), 0);

        store.save_dblock(&block_with(1, Some(&genesis), &[&second])).unwrap();
        assert_eq!(sync.scan().unwrap(), 1);
        assert_eq!(sync.missing_count(), 2);
    }

    #[test]
    fn test_backoff_grows_quadratically_and_caps() {
        let (mut sync, store, _) = create_test_sync();
        let absent = Entry::new([5u8; 32], vec![], b"c".to_vec());
        store.save_dblock(&block_with(0, None, &[&absent])).unwrap();
        sync.scan().unwrap();

        sync.recheck().unwrap();
        assert_eq!(sync.backoff(), Duration::from_millis(100));
        sync.recheck().unwrap();
        assert_eq!(sync.backoff(), Duration::from_millis(400));
        sync.recheck().unwrap();
        assert_eq!(sync.backoff(), Duration::from_millis(900));

        for _ in 0..100 {
            sync.recheck().unwrap();
        }
        assert_eq!(sync.backoff(), Duration::from_secs(60));
    }
}
