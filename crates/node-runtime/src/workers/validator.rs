//! Validator: the task that owns the consensus engine.
//!
//! Each tick runs [`ConsensusEngine::process`] until it reports no progress or
//! the per-tick budget is spent. The loop only waits at its `select`.

use fc_consensus::{ConsensusEngine, ConsensusError};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{error, info, trace};

/// Passes of `process` allowed per tick before yielding.
const MAX_PASSES_PER_TICK: usize = 64;

pub struct Validator {
    engine: ConsensusEngine,
    tick: Duration,
}

impl Validator {
    pub fn new(engine: ConsensusEngine, tick: Duration) -> Self {
        Self { engine, tick }
    }

    /// Runs ticks until no progress is made or the budget is spent.
    pub fn run_tick(&mut self) -> Result<usize, ConsensusError> {
        let mut passes = 0;
        while passes < MAX_PASSES_PER_TICK {
            passes += 1;
            if !self.engine.process()? {
                break;
            }
        }
        Ok(passes)
    }

    pub fn engine(&self) -> &ConsensusEngine {
        &self.engine
    }

    /// Ticks until shutdown. A returned error stops the node.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> Result<(), ConsensusError> {
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(tick_ms = self.tick.as_millis() as u64, "Validator started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    info!("Validator stopping");
                    return Ok(());
                }
                _ = ticker.tick() => {
                    match self.run_tick() {
                        Ok(passes) => trace!(passes, "Tick complete"),
                        Err(err) => {
                            let position = self.engine.position();
                            error!(
                                height = position.db_height,
                                minute = position.minute,
                                fatal = err.is_fatal(),
                                error = %err,
                                "Consensus engine stopped"
                            );
                            return Err(err);
                        }
                    }
                }
            }
        }
    }
}
