//! Append-only enrichment metrics: one JSON object per line in
//! `<repo>/logs/enrichment_metrics.jsonl`.

use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::Result;

/// One metrics line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricEvent {
    /// RFC3339 timestamp.
    pub ts: String,
    pub span_hash: String,
    pub tier: String,
    pub model: String,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub duration_ms: u64,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl MetricEvent {
    pub fn success(
        span_hash: impl Into<String>,
        tier: impl Into<String>,
        model: impl Into<String>,
        tokens_in: u64,
        tokens_out: u64,
        duration_ms: u64,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            span_hash: span_hash.into(),
            tier: tier.into(),
            model: model.into(),
            tokens_in,
            tokens_out,
            duration_ms,
            success: true,
            reason: None,
        }
    }

    pub fn failure(
        span_hash: impl Into<String>,
        tier: impl Into<String>,
        model: impl Into<String>,
        duration_ms: u64,
        reason: impl Into<String>,
    ) -> Self {
        Self {
            ts: chrono::Utc::now().to_rfc3339(),
            span_hash: span_hash.into(),
            tier: tier.into(),
            model: model.into(),
            tokens_in: 0,
            tokens_out: 0,
            duration_ms,
            success: false,
            reason: Some(reason.into()),
        }
    }
}

/// Line-buffered JSONL sink. Failing to write a metric never fails the
/// pipeline; it logs and moves on.
pub struct MetricsWriter {
    path: PathBuf,
    file: Mutex<Option<std::fs::File>>,
}

impl MetricsWriter {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn record(&self, event: &MetricEvent) {
        if let Err(e) = self.try_record(event) {
            warn!("metrics write failed: {e}");
        }
    }

    fn try_record(&self, event: &MetricEvent) -> Result<()> {
        let mut guard = self.file.lock();
        if guard.is_none() {
            if let Some(parent) = self.path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            *guard = Some(
                std::fs::OpenOptions::new()
                    .create(true)
                    .append(true)
                    .open(&self.path)?,
            );
        }
        let file = guard.as_mut().expect("opened above");
        let mut line = serde_json::to_string(event)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_jsonl_append() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("logs/enrichment_metrics.jsonl");
        let writer = MetricsWriter::new(&path);

        writer.record(&MetricEvent::success("h1", "local_small", "m", 100, 40, 900));
        writer.record(&MetricEvent::failure("h2", "local_small", "m", 50, "parse_error"));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: MetricEvent = serde_json::from_str(lines[0]).unwrap();
        assert!(first.success);
        assert!(first.reason.is_none());

        let second: MetricEvent = serde_json::from_str(lines[1]).unwrap();
        assert!(!second.success);
        assert_eq!(second.reason.as_deref(), Some("parse_error"));
    }
}
