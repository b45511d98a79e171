//! Append-only, newline-delimited-JSON usage sink.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use tracing::error;

use crate::relay::error::{ErrorKind, Result, ResultWrappedExt};
use super::{UsageRecord, UsageSink};

/// Appends one JSON object per line to a file, flushing after every
/// write. Simple and durable enough for the volumes a transit relay
/// produces; a buffered, fsync-batching writer isn't worth the
/// complexity here.
pub struct LogFileUsageSink {
    writer: BufWriter<File>,
}

impl LogFileUsageSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .wrapped(ErrorKind::Sink)?;
        Ok(LogFileUsageSink {
            writer: BufWriter::new(file),
        })
    }
}

impl UsageSink for LogFileUsageSink {
    fn record(&mut self, record: &UsageRecord) {
        let line = match serde_json::to_string(record) {
            Ok(line) => line,
            Err(err) => {
                error!(error = %err, "failed to serialize usage record");
                return;
            }
        };
        if let Err(err) = writeln!(self.writer, "{}", line).and_then(|_| self.writer.flush()) {
            error!(error = %err, "failed to append usage record");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{BufRead, BufReader};

    #[test]
    fn appends_one_json_line_per_record() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("usage.log");
        {
            let mut sink = LogFileUsageSink::open(&path).unwrap();
            sink.record(&UsageRecord {
                kind: "transit",
                started: 10,
                total_time: 5,
                waiting_time: None,
                total_bytes: 0,
                mood: crate::relay::mood::Mood::Lonely,
            });
        }
        let reader = BufReader::new(File::open(&path).unwrap());
        let lines: Vec<_> = reader.lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 1);
        assert!(lines[0].contains("\"mood\":\"lonely\""));
    }
}
