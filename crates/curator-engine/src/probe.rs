use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use curator_contracts::providers::{
    list_static, local_generate_descriptor, local_upscale_descriptor, ProviderCatalog,
    ProviderDescriptor, ProviderKind,
};
use reqwest::Client as HttpClient;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::OrchestratorError;
use crate::providers::{response_json_or_error, trim_api_base};

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum CapabilityRecord {
    Upscale { model: String, scale: u32 },
    Image { model: String },
    Caption { model: String },
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CapabilitiesResponse {
    pub capabilities: Vec<CapabilityRecord>,
    pub device: String,
    #[serde(alias = "gpuMemoryGb", default)]
    pub gpu_memory_gb: f64,
}

/// Reachability and capability queries against a local server.
#[async_trait]
pub trait CapabilitySource: Send + Sync {
    async fn ping(&self, endpoint: &str) -> Result<bool>;
    async fn capabilities(&self, endpoint: &str) -> Result<CapabilitiesResponse>;
}

#[derive(Debug, Clone)]
pub struct HttpCapabilitySource {
    http: HttpClient,
}

impl HttpCapabilitySource {
    pub fn new(http: HttpClient) -> Self {
        Self { http }
    }
}

#[async_trait]
impl CapabilitySource for HttpCapabilitySource {
    async fn ping(&self, endpoint: &str) -> Result<bool> {
        let url = format!("{}/api/ping", trim_api_base(endpoint));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("ping failed ({url})"))?;
        Ok(response.status().is_success())
    }

    async fn capabilities(&self, endpoint: &str) -> Result<CapabilitiesResponse> {
        let url = format!("{}/api/capabilities", trim_api_base(endpoint));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("capability query failed ({url})"))?;
        let payload = response_json_or_error("capabilities", response).await?;
        serde_json::from_value(payload).context("malformed capabilities payload")
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LocalCapabilities {
    pub descriptors: Vec<ProviderDescriptor>,
    pub device: String,
    pub gpu_memory_gb: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProbeOutcome {
    Available(LocalCapabilities),
    Unavailable { reason: String },
}

impl ProbeOutcome {
    /// Descriptors to merge into the catalogue; empty when unavailable.
    pub fn descriptors(&self) -> &[ProviderDescriptor] {
        match self {
            Self::Available(capabilities) => &capabilities.descriptors,
            Self::Unavailable { .. } => &[],
        }
    }

    pub fn into_result(self, endpoint: &str) -> Result<LocalCapabilities, OrchestratorError> {
        match self {
            Self::Available(capabilities) => Ok(capabilities),
            Self::Unavailable { reason } => Err(OrchestratorError::ProviderUnreachable {
                endpoint: endpoint.to_string(),
                reason,
            }),
        }
    }
}

impl From<CapabilitiesResponse> for LocalCapabilities {
    fn from(response: CapabilitiesResponse) -> Self {
        let mut scales = Vec::new();
        let mut descriptors = Vec::new();
        for record in &response.capabilities {
            match record {
                CapabilityRecord::Upscale { scale, .. } => scales.push(*scale),
                CapabilityRecord::Image { model } => {
                    descriptors.push(local_generate_descriptor(model))
                }
                CapabilityRecord::Caption { .. } | CapabilityRecord::Other => {}
            }
        }
        // Smaller steps first: 2x when the server has it, otherwise its largest.
        let scale = if scales.contains(&2) {
            Some(2)
        } else {
            scales.iter().copied().max()
        };
        if let Some(scale) = scale {
            descriptors.insert(0, local_upscale_descriptor(scale));
        }
        Self {
            descriptors,
            device: response.device,
            gpu_memory_gb: response.gpu_memory_gb,
        }
    }
}

#[derive(Debug, Clone)]
struct CachedProbe {
    fetched_at: Instant,
    outcome: ProbeOutcome,
}

/// Time-boxed probe cache keyed by endpoint. Unavailable outcomes are cached
/// too, so a flapping server is not queried on every batch.
pub struct CapabilityProbe {
    source: Arc<dyn CapabilitySource>,
    ttl: Duration,
    cache: Mutex<HashMap<String, CachedProbe>>,
}

impl CapabilityProbe {
    pub fn new(source: Arc<dyn CapabilitySource>, ttl: Duration) -> Self {
        Self {
            source,
            ttl,
            cache: Mutex::new(HashMap::new()),
        }
    }

    pub async fn probe(&self, endpoint: &str) -> ProbeOutcome {
        let key = trim_api_base(endpoint);
        if let Some(cached) = self.cached(&key) {
            debug!(endpoint = %key, "capability probe served from cache");
            return cached;
        }

        let outcome = self.query(&key).await;
        if let ProbeOutcome::Unavailable { reason } = &outcome {
            warn!(endpoint = %key, %reason, "local provider unavailable");
        }
        if let Ok(mut cache) = self.cache.lock() {
            cache.insert(
                key,
                CachedProbe {
                    fetched_at: Instant::now(),
                    outcome: outcome.clone(),
                },
            );
        }
        outcome
    }

    pub fn invalidate(&self, endpoint: &str) {
        if let Ok(mut cache) = self.cache.lock() {
            cache.remove(&trim_api_base(endpoint));
        }
    }

    fn cached(&self, key: &str) -> Option<ProbeOutcome> {
        let cache = self.cache.lock().ok()?;
        let entry = cache.get(key)?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        Some(entry.outcome.clone())
    }

    async fn query(&self, endpoint: &str) -> ProbeOutcome {
        match self.source.ping(endpoint).await {
            Ok(true) => {}
            Ok(false) => {
                return ProbeOutcome::Unavailable {
                    reason: "ping returned a non-success status".to_string(),
                }
            }
            Err(err) => {
                return ProbeOutcome::Unavailable {
                    reason: format!("{err:#}"),
                }
            }
        }
        match self.source.capabilities(endpoint).await {
            Ok(response) => ProbeOutcome::Available(response.into()),
            Err(err) => ProbeOutcome::Unavailable {
                reason: format!("{err:#}"),
            },
        }
    }
}

/// Static catalogue plus whatever the configured local endpoint reports.
pub struct CapabilityRegistry {
    probe: CapabilityProbe,
    local_endpoint: Option<String>,
}

impl CapabilityRegistry {
    pub fn new(probe: CapabilityProbe, local_endpoint: Option<String>) -> Self {
        Self {
            probe,
            local_endpoint,
        }
    }

    pub fn list_static(&self, kind: ProviderKind) -> Vec<ProviderDescriptor> {
        list_static(kind)
    }

    pub fn local_endpoint(&self) -> Option<&str> {
        self.local_endpoint.as_deref()
    }

    pub async fn probe(&self, endpoint: &str) -> ProbeOutcome {
        self.probe.probe(endpoint).await
    }

    pub async fn catalog(&self) -> ProviderCatalog {
        let mut catalog = ProviderCatalog::default();
        if let Some(endpoint) = self.local_endpoint.as_deref() {
            catalog.extend(self.probe.probe(endpoint).await.descriptors().to_vec());
        }
        catalog
    }

    pub fn invalidate(&self) {
        if let Some(endpoint) = self.local_endpoint.as_deref() {
            self.probe.invalidate(endpoint);
        }
    }
}
