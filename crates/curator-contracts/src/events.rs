use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use serde_json::{Map, Value};

use crate::progress::JobKind;
use crate::runs::summary::now_utc_iso;

/// Lifecycle events of one batch, serialized with a `type` tag.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchEvent {
    BatchStarted {
        kind: JobKind,
        total: u64,
    },
    ItemSkipped {
        item_id: String,
        reason: String,
    },
    PassCompleted {
        item_id: String,
        pass: usize,
        provider: String,
        width: u32,
        height: u32,
    },
    ProviderFailed {
        item_id: String,
        pass: usize,
        provider: String,
        reason: String,
    },
    ItemCompleted {
        item_id: String,
        width: u32,
        height: u32,
        persisted: bool,
    },
    ItemFailed {
        item_id: String,
        reason: String,
    },
    JobCompleted {
        job_index: u64,
        model: String,
        item_id: String,
        file_name: String,
    },
    JobFailed {
        job_index: u64,
        model: String,
        reason: String,
    },
    BatchCancelled {
        current: u64,
        total: u64,
    },
    BatchFinished {
        total: u64,
        succeeded: u64,
        failed: u64,
        skipped: u64,
    },
}

/// Append-only writer for `events.jsonl`.
///
/// - default fields are `type`, `run_id`, `ts`
/// - event fields are merged last and can override `run_id`/`ts`
/// - one compact JSON object per line
#[derive(Debug, Clone)]
pub struct EventWriter {
    inner: Arc<EventWriterInner>,
}

#[derive(Debug)]
struct EventWriterInner {
    path: PathBuf,
    run_id: String,
    lock: Mutex<()>,
}

impl EventWriter {
    pub fn new(path: impl Into<PathBuf>, run_id: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(EventWriterInner {
                path: path.into(),
                run_id: run_id.into(),
                lock: Mutex::new(()),
            }),
        }
    }

    pub fn path(&self) -> &Path {
        &self.inner.path
    }

    pub fn run_id(&self) -> &str {
        &self.inner.run_id
    }

    pub fn emit(&self, event: &BatchEvent) -> anyhow::Result<Value> {
        let mut record = Map::new();
        record.insert(
            "run_id".to_string(),
            Value::String(self.inner.run_id.clone()),
        );
        record.insert("ts".to_string(), Value::String(now_utc_iso()));
        if let Value::Object(fields) = serde_json::to_value(event)? {
            for (key, value) in fields {
                record.insert(key, value);
            }
        }

        if let Some(parent) = self.inner.path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let line = serde_json::to_string(&record)?;
        let _guard = self
            .inner
            .lock
            .lock()
            .map_err(|_| anyhow::anyhow!("event writer lock poisoned"))?;
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.inner.path)?;
        file.write_all(line.as_bytes())?;
        file.write_all(b"\n")?;

        Ok(Value::Object(record))
    }
}

#[cfg(test)]
mod tests {
    use std::fs;

    use chrono::DateTime;

    use super::*;

    #[test]
    fn emit_writes_compact_jsonl_line() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        let emitted = writer.emit(&BatchEvent::BatchStarted {
            kind: JobKind::Generate,
            total: 6,
        })?;

        let content = fs::read_to_string(&path)?;
        let line = content.lines().next().unwrap_or("");
        let parsed: Value = serde_json::from_str(line)?;

        assert_eq!(parsed, emitted);
        assert_eq!(parsed["type"], Value::String("batch_started".to_string()));
        assert_eq!(parsed["run_id"], Value::String("run-123".to_string()));
        assert_eq!(parsed["kind"], Value::String("generate".to_string()));
        assert_eq!(parsed["total"], Value::from(6));

        let ts = parsed["ts"].as_str().unwrap_or("");
        DateTime::parse_from_rfc3339(ts)?;
        Ok(())
    }

    #[test]
    fn emit_appends_lines_in_order() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("nested").join("events.jsonl");
        let writer = EventWriter::new(&path, "run-123");

        writer.emit(&BatchEvent::ItemSkipped {
            item_id: "a".to_string(),
            reason: "already at target".to_string(),
        })?;
        writer.emit(&BatchEvent::BatchFinished {
            total: 1,
            succeeded: 0,
            failed: 0,
            skipped: 1,
        })?;

        let content = fs::read_to_string(&path)?;
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 2);

        let first: Value = serde_json::from_str(lines[0])?;
        let second: Value = serde_json::from_str(lines[1])?;
        assert_eq!(first["type"], Value::String("item_skipped".to_string()));
        assert_eq!(first["item_id"], Value::String("a".to_string()));
        assert_eq!(second["type"], Value::String("batch_finished".to_string()));
        assert_eq!(second["skipped"], Value::from(1));
        Ok(())
    }
}
