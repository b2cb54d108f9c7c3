//! # Runtime Configuration
//!
//! Options recognized by the receive pipeline. Both structs deserialize with
//! `serde` so a host application can embed them in its own configuration
//! file; every field has a default.

use serde::Deserialize;
use std::time::Duration;

/// Minimum accepted summary cadence.
pub const SUMMARY_INTERVAL_FLOOR_MS: u32 = 5_000;

/// Diagnostics publishing options.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DiagConfig {
    /// Topic for diagnostics publications; empty disables publishing.
    pub topic: String,
    /// When false, per-packet log lines are suppressed (per-packet publishes
    /// still occur).
    pub verbose: bool,
    /// When false, the `raw` hex field is omitted from per-packet payloads
    /// and logs.
    pub publish_raw: bool,
    /// Summary cadence in milliseconds, floored to
    /// [`SUMMARY_INTERVAL_FLOOR_MS`].
    pub summary_interval_ms: u32,
}

impl Default for DiagConfig {
    fn default() -> Self {
        Self {
            topic: "wmbus/diag".to_string(),
            verbose: true,
            publish_raw: true,
            summary_interval_ms: 60_000,
        }
    }
}

impl DiagConfig {
    /// Effective summary interval with the 5 s floor applied.
    pub fn summary_interval(&self) -> Duration {
        Duration::from_millis(self.summary_interval_ms.max(SUMMARY_INTERVAL_FLOOR_MS) as u64)
    }
}

/// Receiver hop-loop timing.
///
/// The radio listens for one sync word at a time, so the receiver restarts
/// RX on every hop to alternate between the T1 and C1 sync words. Tests
/// shrink these windows to drive the loop without real time.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Total wait budget of one `receive_frame` invocation.
    #[serde(with = "duration_ms")]
    pub rx_window: Duration,
    /// Length of one sync-word hop slice.
    #[serde(with = "duration_ms")]
    pub hop_interval: Duration,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            rx_window: Duration::from_secs(60),
            hop_interval: Duration::from_millis(500),
        }
    }
}

mod duration_ms {
    use serde::{Deserialize, Deserializer};
    use std::time::Duration;

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}
