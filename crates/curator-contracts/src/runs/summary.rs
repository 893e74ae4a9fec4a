use std::path::Path;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::progress::{JobKind, LifecycleState};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub kind: JobKind,
    pub started_at: String,
    pub finished_at: String,
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub skipped: u64,
    pub state: LifecycleState,
}

impl BatchSummary {
    /// Jobs that ran to completion one way or another.
    pub fn processed(&self) -> u64 {
        self.succeeded + self.failed + self.skipped
    }
}

pub fn write_summary(
    path: &Path,
    summary: &BatchSummary,
    extra: Option<&Map<String, Value>>,
) -> anyhow::Result<()> {
    let mut payload = match serde_json::to_value(summary)? {
        Value::Object(fields) => fields,
        _ => Map::new(),
    };
    payload.insert("ts".to_string(), Value::String(now_utc_iso()));
    if let Some(extra) = extra {
        for (key, value) in extra {
            payload.insert(key.clone(), value.clone());
        }
    }

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, serde_json::to_string_pretty(&Value::Object(payload))?)?;
    Ok(())
}

pub fn now_utc_iso() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, false)
}

#[cfg(test)]
mod tests {
    use serde_json::{json, Map, Value};

    use super::{write_summary, BatchSummary};
    use crate::progress::{JobKind, LifecycleState};

    #[test]
    fn write_summary_generates_expected_payload() -> anyhow::Result<()> {
        let temp = tempfile::tempdir()?;
        let path = temp.path().join("summary.json");

        let summary = BatchSummary {
            batch_id: "batch-123".to_string(),
            kind: JobKind::Generate,
            started_at: "2026-02-19T00:00:00+00:00".to_string(),
            finished_at: "2026-02-19T00:10:00+00:00".to_string(),
            total: 6,
            succeeded: 1,
            failed: 1,
            skipped: 0,
            state: LifecycleState::Cancelled,
        };
        let mut extra = Map::new();
        extra.insert("models".to_string(), json!(["sdxl", "flux"]));
        write_summary(&path, &summary, Some(&extra))?;

        let parsed: Value = serde_json::from_str(&std::fs::read_to_string(path)?)?;
        assert_eq!(parsed["batch_id"], json!("batch-123"));
        assert_eq!(parsed["kind"], json!("generate"));
        assert_eq!(parsed["state"], json!("cancelled"));
        assert_eq!(parsed["total"], json!(6));
        assert_eq!(parsed["models"][1], json!("flux"));
        assert!(parsed.get("ts").and_then(Value::as_str).is_some());
        assert_eq!(summary.processed(), 2);
        Ok(())
    }
}
