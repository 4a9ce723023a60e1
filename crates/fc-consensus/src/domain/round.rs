//! Round position and synchronization flags.

use serde::{Deserialize, Serialize};
use shared_types::ServerId;

/// `(DBHeight, Minute)` of the node. Minute 10 is the sealing step between
/// minute 9 and minute 0 of the next height.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RoundPosition {
    pub db_height: u32,
    pub minute: u8,
}

impl RoundPosition {
    pub const fn new(db_height: u32, minute: u8) -> Self {
        Self { db_height, minute }
    }

    /// Only `(h, m+1)` and `(h+1, 0)` are reachable from `(h, m)`.
    pub fn can_move_to(&self, next: RoundPosition) -> bool {
        (next.db_height == self.db_height && next.minute == self.minute + 1 && next.minute <= 10)
            || (next.db_height == self.db_height + 1 && next.minute == 0)
    }

    /// Linear minute count, used to order EOMs across heights.
    pub fn absolute_minute(&self) -> u64 {
        u64::from(self.db_height) * 10 + u64::from(self.minute)
    }
}

/// Published after every round move.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RoundStatus {
    pub position: RoundPosition,
    pub leader: bool,
    pub leader_vm: usize,
    pub identity: ServerId,
    pub highest_saved: Option<u32>,
    pub syncing: bool,
}

/// State of the EOM and DBSig barriers.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SyncState {
    pub eom: bool,
    pub eom_processed: usize,
    pub eom_limit: usize,
    pub eom_minute: u8,
    pub eom_height: u32,
    pub dbsig: bool,
    pub dbsig_processed: usize,
    pub dbsig_limit: usize,
    pub between_blocks: bool,
}

impl SyncState {
    /// True while an EOM or DBSig barrier is open or the block is being sealed.
    pub fn is_syncing(&self) -> bool {
        self.eom || self.dbsig || self.between_blocks
    }

    /// Resets the EOM barrier for a new minute with `limit` lanes.
    pub fn reset_eom(&mut self, limit: usize) {
        self.eom = false;
        self.eom_processed = 0;
        self.eom_limit = limit;
    }

    /// Resets the DBSig barrier for a new height with `limit` lanes.
    pub fn reset_dbsig(&mut self, limit: usize) {
        self.dbsig = false;
        self.dbsig_processed = 0;
        self.dbsig_limit = limit;
    }
}
