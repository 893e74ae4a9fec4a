use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    Upscale,
    Generate,
}

impl JobKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upscale => "upscale",
            Self::Generate => "generate",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleState {
    #[default]
    Idle,
    Running,
    Done,
    Cancelled,
}

impl LifecycleState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Done | Self::Cancelled)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub current: u64,
    pub total: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_model: Option<String>,
}

/// What observers see: a coarse lifecycle tag plus counters while a run exists.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub state: LifecycleState,
    pub progress: Option<Progress>,
}

impl ProgressSnapshot {
    pub fn idle() -> Self {
        Self::default()
    }

    pub fn current(&self) -> u64 {
        self.progress.as_ref().map(|p| p.current).unwrap_or(0)
    }

    pub fn total(&self) -> u64 {
        self.progress.as_ref().map(|p| p.total).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn idle_snapshot_serializes_with_null_progress() -> anyhow::Result<()> {
        let value = serde_json::to_value(ProgressSnapshot::idle())?;
        assert_eq!(value, json!({"state": "idle", "progress": null}));
        Ok(())
    }

    #[test]
    fn running_snapshot_uses_camel_case_model_key() -> anyhow::Result<()> {
        let snapshot = ProgressSnapshot {
            state: LifecycleState::Running,
            progress: Some(Progress {
                current: 2,
                total: 6,
                current_model: Some("sdxl".to_string()),
            }),
        };
        let value = serde_json::to_value(&snapshot)?;
        assert_eq!(value["progress"]["currentModel"], json!("sdxl"));
        assert_eq!(snapshot.current(), 2);
        assert_eq!(snapshot.total(), 6);
        assert!(!snapshot.state.is_terminal());
        Ok(())
    }
}
