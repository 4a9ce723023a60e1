//! # Consensus Metrics
//!
//! Prometheus metrics for monitoring the execution engine.
//!
//! ## Usage
//!
//! Enable with the `metrics` feature:
//! ```toml
//! fc-consensus = { path = "...", features = ["metrics"] }
//! ```
//!
//! ## Metrics Exported
//!
//! - `consensus_holding_inputs_total` / `consensus_holding_outputs_total`
//! - `consensus_executions_total` - leader/follower executions by kind
//! - `consensus_acks_total` - acks issued and received
//! - `consensus_barriers_total` - EOMs and DBSigs processed
//! - `consensus_invalid_messages_total` - messages sent to the invalid sink
//! - `consensus_reposts_total`
//! - `consensus_tick_seconds` - histogram of tick duration
//! - `consensus_leader_height` / `consensus_minute` / `consensus_highest_saved`

#[cfg(feature = "metrics")]
use lazy_static::lazy_static;

#[cfg(feature = "metrics")]
use prometheus::{
    register_counter_vec, register_histogram, register_int_counter, register_int_gauge,
    CounterVec, Histogram, IntCounter, IntGauge,
};

#[cfg(feature = "metrics")]
lazy_static! {
    pub static ref HOLDING_INPUTS: IntCounter = register_int_counter!(
        "consensus_holding_inputs_total",
        "Messages added to holding"
    )
    .expect("Failed to create HOLDING_INPUTS metric");

    pub static ref HOLDING_OUTPUTS: IntCounter = register_int_counter!(
        "consensus_holding_outputs_total",
        "Messages removed from holding"
    )
    .expect("Failed to create HOLDING_OUTPUTS metric");

    /// Executions labeled by role (leader/follower) and message kind
    pub static ref EXECUTIONS: CounterVec = register_counter_vec!(
        "consensus_executions_total",
        "Leader and follower executions",
        &["role", "kind"]
    )
    .expect("Failed to create EXECUTIONS metric");

    pub static ref ACKS: CounterVec = register_counter_vec!(
        "consensus_acks_total",
        "Acks issued by this node or received from leaders",
        &["direction"]
    )
    .expect("Failed to create ACKS metric");

    pub static ref BARRIERS: CounterVec = register_counter_vec!(
        "consensus_barriers_total",
        "EOM and DBSig messages processed",
        &["kind"]
    )
    .expect("Failed to create BARRIERS metric");

    pub static ref INVALID_MESSAGES: IntCounter = register_int_counter!(
        "consensus_invalid_messages_total",
        "Messages forwarded to the invalid sink"
    )
    .expect("Failed to create INVALID_MESSAGES metric");

    pub static ref REPOSTS: IntCounter = register_int_counter!(
        "consensus_reposts_total",
        "Messages reposted with a delay"
    )
    .expect("Failed to create REPOSTS metric");

    pub static ref TICK_LATENCY: Histogram = register_histogram!(
        "consensus_tick_seconds",
        "Duration of one engine tick in seconds",
        vec![0.0001, 0.0005, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5]
    )
    .expect("Failed to create TICK_LATENCY metric");

    pub static ref LEADER_HEIGHT: IntGauge = register_int_gauge!(
        "consensus_leader_height",
        "Directory block height being built"
    )
    .expect("Failed to create LEADER_HEIGHT metric");

    pub static ref MINUTE: IntGauge = register_int_gauge!(
        "consensus_minute",
        "Current minute of the block"
    )
    .expect("Failed to create MINUTE metric");

    pub static ref HIGHEST_SAVED: IntGauge = register_int_gauge!(
        "consensus_highest_saved",
        "Highest saved directory block"
    )
    .expect("Failed to create HIGHEST_SAVED metric");
}

#[cfg(feature = "metrics")]
pub fn record_holding_input() {
    HOLDING_INPUTS.inc();
}

#[cfg(feature = "metrics")]
pub fn record_holding_output() {
    HOLDING_OUTPUTS.inc();
}

#[cfg(feature = "metrics")]
pub fn record_execution(role: &str, kind: &str) {
    EXECUTIONS.with_label_values(&[role, kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_ack(direction: &str) {
    ACKS.with_label_values(&[direction]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_barrier(kind: &str) {
    BARRIERS.with_label_values(&[kind]).inc();
}

#[cfg(feature = "metrics")]
pub fn record_invalid_message() {
    INVALID_MESSAGES.inc();
}

#[cfg(feature = "metrics")]
pub fn record_repost() {
    REPOSTS.inc();
}

#[cfg(feature = "metrics")]
pub fn record_tick_latency(seconds: f64) {
    TICK_LATENCY.observe(seconds);
}

#[cfg(feature = "metrics")]
pub fn record_round(height: u32, minute: u8, highest_saved: Option<u32>) {
    LEADER_HEIGHT.set(i64::from(height));
    MINUTE.set(i64::from(minute));
    if let Some(saved) = highest_saved {
        HIGHEST_SAVED.set(i64::from(saved));
    }
}

// No-op implementations when metrics feature is disabled
#[cfg(not(feature = "metrics"))]
pub fn record_holding_input() {}

#[cfg(not(feature = "metrics"))]
pub fn record_holding_output() {}

#[cfg(not(feature = "metrics"))]
pub fn record_execution(_role: &str, _kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_ack(_direction: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_barrier(_kind: &str) {}

#[cfg(not(feature = "metrics"))]
pub fn record_invalid_message() {}

#[cfg(not(feature = "metrics"))]
pub fn record_repost() {}

#[cfg(not(feature = "metrics"))]
pub fn record_tick_latency(_seconds: f64) {}

#[cfg(not(feature = "metrics"))]
pub fn record_round(_height: u32, _minute: u8, _highest_saved: Option<u32>) {}
