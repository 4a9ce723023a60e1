//! Write-back worker.
//!
//! Persists revealed entries and sealed blocks handed over by the engine. The
//! channel is unbounded so the engine never waits on disk; on shutdown the
//! worker drains what is already queued before returning.

use fc_consensus::adapters::WriteBackEvent;
use fc_consensus::ports::ChainStore;
use shared_types::{short_hex, StoreError};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info};

pub struct WriteBackWorker {
    store: Arc<dyn ChainStore>,
}

impl WriteBackWorker {
    pub fn new(store: Arc<dyn ChainStore>) -> Self {
        Self { store }
    }

    pub fn apply(&self, event: WriteBackEvent) -> Result<(), StoreError> {
        match event {
            WriteBackEvent::Entry(entry) => {
                if !self.store.has_entry(&entry.hash())? {
                    self.store.insert_entry(&entry)?;
                    debug!(entry = %short_hex(&entry.hash()), "Entry written");
                }
            }
            WriteBackEvent::Block(block) => {
                for entry in &block.entries {
                    if !self.store.has_entry(&entry.hash())? {
                        self.store.insert_entry(entry)?;
                    }
                }
                self.store.save_dblock(&block.block)?;
                info!(
                    height = block.block.db_height(),
                    key_mr = %short_hex(&block.block.header.key_mr()),
                    entries = block.entries.len(),
                    "Directory block saved"
                );
            }
        }
        Ok(())
    }

    fn apply_logged(&self, event: WriteBackEvent) {
        if let Err(err) = self.apply(event) {
            error!(error = %err, "Write-back failed");
        }
    }

    pub async fn run(
        self,
        mut events: mpsc::UnboundedReceiver<WriteBackEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("Write-back worker started");
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                event = events.recv() => match event {
                    Some(event) => self.apply_logged(event),
                    None => return,
                },
            }
        }
        let mut drained = 0;
        while let Ok(event) = events.try_recv() {
            self.apply_logged(event);
            drained += 1;
        }
        info!(drained, "Write-back worker stopping");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fc_consensus::adapters::{ChannelWriteBack, HashChainAssembler, InMemoryChainStore};
    use fc_consensus::domain::{BlockCandidate, BlockWithEntries, EntryBlock};
    use fc_consensus::ports::{BlockAssembler, WriteBack};
    use shared_types::{Entry, Timestamp, ZERO_HASH};

    fn block_with(entry: &Entry) -> BlockWithEntries {
        let mut eblock = EntryBlock::new(entry.chain_id, 0);
        eblock.add_entry(entry.hash());
        let block = HashChainAssembler::default()
            .seal(
                BlockCandidate {
                    db_height: 0,
                    prev_key_mr: ZERO_HASH,
                    timestamp: Timestamp::from_secs(1_700_000_000),
                    entry_blocks: vec![eblock],
                    ..Default::default()
                },
                None,
            )
            .unwrap();
        BlockWithEntries {
            block,
            entries: vec![entry.clone()],
        }
    }

    #[test]
    fn test_block_and_entries_persisted() {
        let store = Arc::new(InMemoryChainStore::new());
        let worker = WriteBackWorker::new(store.clone());
        let entry = Entry::new([1u8; 32], vec![], b"data".to_vec());

        worker
            .apply(WriteBackEvent::Block(Box::new(block_with(&entry))))
            .unwrap();

        assert_eq!(store.highest_saved_height().unwrap(), Some(0));
        assert!(store.has_entry(&entry.hash()).unwrap());
        assert!(store.fetch_eblock_head(&entry.chain_id).unwrap().is_some());
    }

    #[test]
    fn test_entry_written_once() {
        let store = Arc::new(InMemoryChainStore::new());
        let worker = WriteBackWorker::new(store.clone());
        let entry = Entry::new([2u8; 32], vec![], b"once".to_vec());

        worker.apply(WriteBackEvent::Entry(entry.clone())).unwrap();
        worker.apply(WriteBackEvent::Entry(entry)).unwrap();
        assert_eq!(store.entry_count(), 1);
    }

    #[tokio::test]
    async fn test_queued_events_drained_on_shutdown() {
        let store = Arc::new(InMemoryChainStore::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let sink = ChannelWriteBack::new(tx);

        for n in 0..3u8 {
            sink.write_entry(Entry::new([n; 32], vec![], vec![n]));
        }
        shutdown_tx.send(true).unwrap();
        WriteBackWorker::new(store.clone())
            .run(rx, shutdown_rx)
            .await;

        assert_eq!(store.entry_count(), 3);
    }
}
