//! Usage accounting: one coarse-grained record per finished connection,
//! fanned out to zero or more pluggable sinks.

#[cfg(feature = "database")]
pub mod database;
pub mod log_file;
pub mod memory;

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::warn;

use crate::relay::mood::Mood;

/// Depth of the bounded channel between `UsageTracker::record` (called
/// from inside the registry lock) and the dedicated writer task. Kept
/// small: a sink that can't keep up should shed load, not let the queue
/// become an unbounded memory leak.
const QUEUE_DEPTH: usize = 256;

/// One completed connection (or connection pair)'s accounting row.
#[derive(Debug, Clone, Serialize)]
pub struct UsageRecord {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub started: u64,
    pub total_time: u64,
    /// `|started - buddy_started|` for a paired connection; `None` when
    /// there was never a partner to compare against (lonely, errory,
    /// impatient, redundant, empty).
    pub waiting_time: Option<u64>,
    pub total_bytes: u64,
    pub mood: Mood,
}

/// A destination for finished `UsageRecord`s. Implementations must not
/// block the caller for long: `UsageTracker` already runs sinks on a
/// dedicated task off the registry lock, but a sink that blocks for
/// seconds still delays every other record behind it.
pub trait UsageSink: Send {
    fn record(&mut self, record: &UsageRecord);
}

/// Rounds a byte count to a coarse bucket so usage logs can't be used to
/// fingerprint exact transfer sizes: below 1e6 bytes, rounds up to the
/// nearest 10k; below 1e9, to the nearest 1M; above that, to the nearest
/// 100M. Zero stays zero.
pub fn blur_size(size: u64) -> u64 {
    fn round_up_to(size: u64, blur: u64) -> u64 {
        ((size + blur - 1) / blur) * blur
    }

    if size == 0 {
        0
    } else if size < 1_000_000 {
        round_up_to(size, 10_000)
    } else if size < 1_000_000_000 {
        round_up_to(size, 1_000_000)
    } else {
        round_up_to(size, 100_000_000)
    }
}

/// Rounds a unix timestamp down to the start of its `window`-second
/// bucket. A `window` of `0` disables blurring.
pub fn blur_timestamp(timestamp: u64, window: u64) -> u64 {
    if window == 0 {
        timestamp
    } else {
        timestamp - (timestamp % window)
    }
}

/// Owns the fan-out of `UsageRecord`s to every configured sink, on a
/// single background task so a slow sink (log file, sqlite) never stalls
/// the FSM's registry lock.
pub struct UsageTracker {
    tx: mpsc::Sender<UsageRecord>,
}

impl UsageTracker {
    /// Spawns the writer task and returns a handle. `sinks` are written
    /// to in order, on every record, on the spawned task.
    pub fn spawn(mut sinks: Vec<Box<dyn UsageSink>>) -> Arc<Self> {
        let (tx, mut rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(async move {
            while let Some(record) = rx.recv().await {
                for sink in sinks.iter_mut() {
                    sink.record(&record);
                }
            }
        });
        Arc::new(UsageTracker { tx })
    }

    /// Enqueues `record` for the writer task. Never blocks: under
    /// sustained overload a record is dropped (and logged) rather than
    /// stalling the caller, which is holding the connection registry
    /// lock at the time this is called.
    pub fn record(&self, record: UsageRecord) {
        if let Err(err) = self.tx.try_send(record) {
            warn!(error = %err, "usage record dropped, writer task saturated");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blur_size_matches_documented_thresholds() {
        assert_eq!(blur_size(0), 0);
        assert_eq!(blur_size(1), 10_000);
        assert_eq!(blur_size(10_000), 10_000);
        assert_eq!(blur_size(10_001), 20_000);
        assert_eq!(blur_size(999_999), 1_000_000);
        assert_eq!(blur_size(1_000_000), 1_000_000);
        assert_eq!(blur_size(1_000_001), 2_000_000);
        assert_eq!(blur_size(999_999_999), 1_000_000_000);
        assert_eq!(blur_size(1_000_000_000), 1_000_000_000);
        assert_eq!(blur_size(1_000_000_001), 1_100_000_000);
    }

    #[test]
    fn blur_timestamp_rounds_down_to_window() {
        assert_eq!(blur_timestamp(3_661, 3_600), 3_600);
        assert_eq!(blur_timestamp(3_661, 0), 3_661);
    }
}
