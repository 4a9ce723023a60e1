//! Leader-duty coordinator.
//!
//! Once per minute (`block_seconds / 10`) a leading node hands the engine an
//! unsigned local EOM for its current position and VM. The engine signs and
//! acks it, or drops it when the round has already moved on.

use fc_consensus::domain::{Eom, Payload};
use fc_consensus::ports::TimeSource;
use fc_consensus::{Message, QueueHandles, RoundStatus, SubmitError};
use shared_types::Timestamp;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Local EOM for the round in `status`.
pub fn eom_template(status: &RoundStatus, timestamp: Timestamp) -> Arc<Message> {
    Message::local(Payload::Eom(Eom {
        timestamp,
        db_height: status.position.db_height,
        vm_index: status.leader_vm,
        minute: status.position.minute,
        chain_id: status.identity,
        signature: None,
    }))
}

pub struct LeaderDuty {
    handles: QueueHandles,
    round: watch::Receiver<RoundStatus>,
    time: Arc<dyn TimeSource>,
    minute: Duration,
}

impl LeaderDuty {
    pub fn new(
        handles: QueueHandles,
        round: watch::Receiver<RoundStatus>,
        time: Arc<dyn TimeSource>,
        minute: Duration,
    ) -> Self {
        Self {
            handles,
            round,
            time,
            minute,
        }
    }

    /// Issues the EOM for the current round if this node leads. Returns true if
    /// one was queued.
    pub fn issue(&self) -> bool {
        let status = *self.round.borrow();
        if !status.leader || status.position.minute >= 10 {
            return false;
        }
        let eom = eom_template(&status, self.time.now());
        match self.handles.submit(eom) {
            Ok(()) => {
                debug!(
                    height = status.position.db_height,
                    minute = status.position.minute,
                    vm = status.leader_vm,
                    "Issued EOM"
                );
                true
            }
            Err(SubmitError::QueueFull) => {
                warn!("Message queue full, EOM skipped this minute");
                false
            }
            Err(SubmitError::Closed) => false,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let start = tokio::time::Instant::now() + self.minute;
        let mut ticker = tokio::time::interval_at(start, self.minute);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(minute_ms = self.minute.as_millis() as u64, "Leader duty started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Leader duty stopping");
                    return;
                }
                _ = ticker.tick() => {
                    self.issue();
                }
            }
        }
    }
}
