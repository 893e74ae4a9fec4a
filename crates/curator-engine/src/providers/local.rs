use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::Client as HttpClient;
use serde::Serialize;

use super::{
    image_response_or_error, trim_api_base, ArtifactBlob, GenerateRequest, MediaProvider,
    UpscaleRequest,
};

/// The self-hosted GPU server. One request runs at a time on its side, so the
/// orchestrator never sends it concurrent work.
pub struct LocalAiProvider {
    api_base: String,
    http: HttpClient,
}

#[derive(Debug, Serialize)]
struct LocalImagePayload<'a> {
    prompt: &'a str,
    model: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    negative_prompt: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    width: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    height: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    seed: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    steps: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    guidance: Option<f64>,
}

impl LocalAiProvider {
    pub fn new(api_base: &str, http: HttpClient) -> Self {
        Self {
            api_base: trim_api_base(api_base),
            http,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}/api/{}", self.api_base, path)
    }
}

#[async_trait]
impl MediaProvider for LocalAiProvider {
    fn name(&self) -> &str {
        "ai3"
    }

    async fn upscale(&self, request: &UpscaleRequest) -> Result<ArtifactBlob> {
        let endpoint = self.endpoint("upscale");
        let image = MultipartPart::bytes(request.image.to_vec())
            .file_name(request.file_name.clone())
            .mime_str("application/octet-stream")?;
        let mut form = MultipartForm::new()
            .part("image", image)
            .text("scale", request.scale.to_string());
        if let Some(prompt) = &request.prompt {
            form = form.text("prompt", prompt.clone());
        }
        if let Some(negative_prompt) = &request.negative_prompt {
            form = form.text("negative_prompt", negative_prompt.clone());
        }
        if let Some(seed) = request.seed {
            form = form.text("seed", seed.to_string());
        }
        if let Some(steps) = request.steps {
            form = form.text("steps", steps.to_string());
        }
        if let Some(guidance) = request.guidance {
            form = form.text("guidance", guidance.to_string());
        }

        let response = self
            .http
            .post(&endpoint)
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("ai3 request failed ({endpoint})"))?;
        image_response_or_error("ai3", response).await
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ArtifactBlob> {
        let endpoint = self.endpoint("image");
        let payload = LocalImagePayload {
            prompt: &request.prompt,
            model: &request.model,
            negative_prompt: request.negative_prompt.as_deref(),
            width: request.width,
            height: request.height,
            seed: request.seed,
            steps: request.steps,
            guidance: request.guidance,
        };
        let response = self
            .http
            .post(&endpoint)
            .json(&payload)
            .send()
            .await
            .with_context(|| format!("ai3 request failed ({endpoint})"))?;
        image_response_or_error("ai3", response).await
    }
}
