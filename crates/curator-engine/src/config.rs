use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};

pub const DEFAULT_LOCAL_ENDPOINT: &str = "http://127.0.0.1:8000";

/// Orchestrator settings. Every field has a default so a partial TOML file is valid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CuratorConfig {
    pub local_endpoint: String,
    pub stability_api_base: String,
    pub replicate_api_base: String,
    /// Enabled upscale providers, tried in this order on every pass.
    pub upscale_providers: Vec<String>,
    pub probe_ttl_secs: u64,
    pub done_grace_ms: u64,
    /// Per-request timeout. Unset means provider calls may run indefinitely.
    pub request_timeout_secs: Option<u64>,
}

impl Default for CuratorConfig {
    fn default() -> Self {
        Self {
            local_endpoint: DEFAULT_LOCAL_ENDPOINT.to_string(),
            stability_api_base: "https://api.stability.ai".to_string(),
            replicate_api_base: "https://api.replicate.com/v1".to_string(),
            upscale_providers: vec!["ai3".to_string(), "stability".to_string()],
            probe_ttl_secs: 30,
            done_grace_ms: 3000,
            request_timeout_secs: None,
        }
    }
}

impl CuratorConfig {
    /// Reads the optional TOML file, then applies environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let mut config = match path {
            Some(path) => {
                let raw = std::fs::read_to_string(path)
                    .with_context(|| format!("failed reading config {}", path.display()))?;
                Self::from_toml_str(&raw)
                    .with_context(|| format!("invalid config {}", path.display()))?
            }
            None => Self::default(),
        };
        config.apply_overrides(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn from_toml_str(raw: &str) -> anyhow::Result<Self> {
        Ok(toml::from_str(raw)?)
    }

    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        let non_empty = |key: &str| {
            lookup(key)
                .map(|value| value.trim().trim_end_matches('/').to_string())
                .filter(|value| !value.is_empty())
        };
        if let Some(value) = non_empty("CURATOR_LOCAL_ENDPOINT") {
            self.local_endpoint = value;
        }
        if let Some(value) = non_empty("STABILITY_API_BASE") {
            self.stability_api_base = value;
        }
        if let Some(value) = non_empty("REPLICATE_API_BASE") {
            self.replicate_api_base = value;
        }
    }

    pub fn http_client(&self) -> anyhow::Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder();
        if let Some(secs) = self.request_timeout_secs.filter(|secs| *secs > 0) {
            builder = builder.timeout(Duration::from_secs(secs));
        }
        builder.build().context("failed building HTTP client")
    }

    pub fn probe_ttl(&self) -> Duration {
        Duration::from_secs(self.probe_ttl_secs)
    }

    pub fn done_grace(&self) -> Duration {
        Duration::from_millis(self.done_grace_ms)
    }
}
