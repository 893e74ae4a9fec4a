use std::collections::BTreeMap;
use std::fmt;
use std::io::Cursor;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use image::{DynamicImage, ImageFormat};
use reqwest::Response as HttpResponse;
use serde_json::Value;

use crate::config::CuratorConfig;

mod dryrun;
mod local;
mod replicate;
mod stability;

pub use dryrun::DryrunProvider;
pub use local::LocalAiProvider;
pub use replicate::ReplicateProvider;
pub use stability::{nearest_aspect_ratio, StabilityProvider};

/// Raw bytes returned by a provider, not yet decoded.
#[derive(Clone, PartialEq, Eq)]
pub struct ArtifactBlob {
    pub bytes: Vec<u8>,
    pub mime_type: Option<String>,
}

impl fmt::Debug for ArtifactBlob {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArtifactBlob")
            .field("len", &self.bytes.len())
            .field("mime_type", &self.mime_type)
            .finish()
    }
}

impl ArtifactBlob {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: Some("image/png".to_string()),
        }
    }

    pub fn format(&self) -> Option<ImageFormat> {
        image::guess_format(&self.bytes).ok()
    }
}

#[derive(Clone, PartialEq)]
pub struct UpscaleRequest {
    pub image: Arc<[u8]>,
    pub file_name: String,
    pub model: String,
    pub scale: u32,
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
}

impl fmt::Debug for UpscaleRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UpscaleRequest")
            .field("image_len", &self.image.len())
            .field("file_name", &self.file_name)
            .field("model", &self.model)
            .field("scale", &self.scale)
            .field("prompt", &self.prompt)
            .field("seed", &self.seed)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GenerateRequest {
    pub model: String,
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub seed: Option<u64>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderOperation {
    Upscale(UpscaleRequest),
    Generate(GenerateRequest),
}

impl ProviderOperation {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Upscale(_) => "upscale",
            Self::Generate(_) => "generate",
        }
    }
}

/// A backend reachable over HTTP (or simulated offline). Implementations
/// return `anyhow` errors freely; the adapter turns them into typed failures.
#[async_trait]
pub trait MediaProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn upscale(&self, request: &UpscaleRequest) -> Result<ArtifactBlob> {
        bail!(
            "{} does not support upscaling ({})",
            self.name(),
            request.model
        )
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ArtifactBlob> {
        bail!(
            "{} does not support generation ({})",
            self.name(),
            request.model
        )
    }
}

#[derive(Default)]
pub struct ProviderRegistry {
    providers: BTreeMap<String, Arc<dyn MediaProvider>>,
}

impl fmt::Debug for ProviderRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderRegistry")
            .field("providers", &self.names())
            .finish()
    }
}

impl ProviderRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<P: MediaProvider + 'static>(&mut self, provider: P) {
        self.register_shared(Arc::new(provider));
    }

    pub fn register_shared(&mut self, provider: Arc<dyn MediaProvider>) {
        self.providers.insert(provider.name().to_string(), provider);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn MediaProvider>> {
        self.providers.get(name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.providers.keys().cloned().collect()
    }
}

pub fn default_provider_registry(
    config: &CuratorConfig,
    http: reqwest::Client,
) -> ProviderRegistry {
    let mut providers = ProviderRegistry::new();
    providers.register(DryrunProvider);
    providers.register(LocalAiProvider::new(&config.local_endpoint, http.clone()));
    providers.register(StabilityProvider::new(
        &config.stability_api_base,
        http.clone(),
    ));
    providers.register(ReplicateProvider::new(&config.replicate_api_base, http));
    providers
}

pub(crate) async fn image_response_or_error(
    provider: &str,
    response: HttpResponse,
) -> Result<ArtifactBlob> {
    let status = response.status();
    let code = status.as_u16();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let mime_type = content_type(&response);
    let bytes = response
        .bytes()
        .await
        .with_context(|| format!("failed reading {provider} image bytes"))?
        .to_vec();
    Ok(ArtifactBlob { bytes, mime_type })
}

pub(crate) async fn response_json_or_error(provider: &str, response: HttpResponse) -> Result<Value> {
    let status = response.status();
    let code = status.as_u16();
    let body = response
        .text()
        .await
        .with_context(|| format!("{provider} response body read failed"))?;
    if !status.is_success() {
        bail!(
            "{provider} request failed ({code}): {}",
            truncate_text(&body, 512)
        );
    }
    let parsed: Value = serde_json::from_str(&body)
        .with_context(|| format!("{provider} returned invalid JSON payload"))?;
    Ok(parsed)
}

pub(crate) fn content_type(response: &HttpResponse) -> Option<String> {
    response
        .headers()
        .get(reqwest::header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_ascii_lowercase())
}

pub(crate) fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|value| value.trim().to_string())
        .filter(|value| !value.is_empty())
}

pub(crate) fn trim_api_base(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}

pub(crate) fn encode_png(image: &DynamicImage) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut buffer), ImageFormat::Png)
        .context("PNG encode failed")?;
    Ok(buffer)
}

pub(crate) fn error_chain_text(err: &anyhow::Error, max_chars: usize) -> String {
    let mut parts = Vec::new();
    for cause in err.chain() {
        let text = cause.to_string();
        let trimmed = text.trim();
        if trimmed.is_empty() {
            continue;
        }
        if parts
            .last()
            .map(|existing| existing == trimmed)
            .unwrap_or(false)
        {
            continue;
        }
        parts.push(trimmed.to_string());
    }
    if parts.is_empty() {
        return truncate_text(&err.to_string(), max_chars);
    }
    truncate_text(&parts.join(" | caused by: "), max_chars)
}

pub(crate) fn truncate_text(value: &str, max_chars: usize) -> String {
    if value.chars().count() <= max_chars {
        return value.to_string();
    }
    value.chars().take(max_chars).collect::<String>() + "…"
}
