//! Built-in destinations for observed query records.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::Path;

use parking_lot::Mutex;
use tracing::{info, warn};

use pgscope_common::{Query, QuerySink, Result};

/// Emits each record through the process log.
pub struct TracingSink;

impl QuerySink for TracingSink {
    fn write(&self, query: &Query) {
        if query.error.is_empty() {
            info!(query = %query.query, "query completed");
        } else {
            info!(query = %query.query, error = %query.error, "query failed");
        }
    }
}

/// Appends one JSON object per record to a file.
pub struct JsonLineSink {
    out: Mutex<BufWriter<File>>,
}

impl JsonLineSink {
    /// Open `path` for appending, creating it if needed.
    pub fn create(path: &Path) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            out: Mutex::new(BufWriter::new(file)),
        })
    }
}

impl QuerySink for JsonLineSink {
    fn write(&self, query: &Query) {
        let line = match serde_json::to_string(query) {
            Ok(line) => line,
            Err(e) => {
                warn!("Failed to serialize query record: {}", e);
                return;
            }
        };
        let mut out = self.out.lock();
        if let Err(e) = writeln!(out, "{}", line).and_then(|_| out.flush()) {
            warn!("Failed to write query record: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_json_line_sink_appends_records() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queries.jsonl");

        let sink = JsonLineSink::create(&path).unwrap();
        sink.write(&Query::completed("SELECT 1"));
        sink.write(&Query::failed("SELECT broken", "syntax error"));

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"query\":\"SELECT 1\""));
        assert!(lines[1].contains("\"error\":\"syntax error\""));
    }
}
