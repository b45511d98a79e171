//! In-process usage sink, for tests and for the CLI's own stats endpoint.

use parking_lot::Mutex;
use std::sync::Arc;

use super::{UsageRecord, UsageSink};

/// Keeps every record it's given in memory. Bounded only by the process
/// lifetime; intended for tests and small deployments, not long-running
/// production relays (pair with `LogFileUsageSink` or `DatabaseUsageSink`
/// there instead).
#[derive(Default)]
pub struct MemoryUsageSink {
    records: Arc<Mutex<Vec<UsageRecord>>>,
}

impl MemoryUsageSink {
    pub fn new() -> Self {
        MemoryUsageSink::default()
    }

    /// A cloneable view of the recorded rows, usable after the sink has
    /// been handed off to `UsageTracker::spawn`.
    pub fn records_handle(&self) -> Arc<Mutex<Vec<UsageRecord>>> {
        self.records.clone()
    }
}

impl UsageSink for MemoryUsageSink {
    fn record(&mut self, record: &UsageRecord) {
        self.records.lock().push(record.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retains_every_record() {
        let mut sink = MemoryUsageSink::new();
        let handle = sink.records_handle();
        sink.record(&UsageRecord {
            kind: "transit",
            started: 1,
            total_time: 2,
            waiting_time: Some(0),
            total_bytes: 3,
            mood: crate::relay::mood::Mood::Happy,
        });
        assert_eq!(handle.lock().len(), 1);
    }
}
