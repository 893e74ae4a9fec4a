use std::time::Duration;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::Client as HttpClient;
use serde_json::{json, Map, Value};
use tokio::time::Instant;

use super::{
    image_response_or_error, non_empty_env, response_json_or_error, trim_api_base, ArtifactBlob,
    GenerateRequest, MediaProvider, UpscaleRequest,
};

const POLL_INTERVAL: Duration = Duration::from_secs(1);
const POLL_TIMEOUT: Duration = Duration::from_secs(300);

pub struct ReplicateProvider {
    api_base: String,
    http: HttpClient,
}

impl ReplicateProvider {
    pub fn new(api_base: &str, http: HttpClient) -> Self {
        Self {
            api_base: trim_api_base(api_base),
            http,
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("REPLICATE_API_TOKEN").or_else(|| non_empty_env("REPLICATE_API_KEY"))
    }

    fn predictions_endpoint(&self) -> String {
        format!("{}/predictions", self.api_base)
    }

    async fn poll_prediction(&self, poll_url: &str, api_key: &str) -> Result<Value> {
        let started = Instant::now();
        loop {
            let response = self
                .http
                .get(poll_url)
                .bearer_auth(api_key)
                .send()
                .await
                .with_context(|| format!("Replicate poll request failed ({poll_url})"))?;
            let payload = response_json_or_error("Replicate poll", response).await?;
            match prediction_status(&payload).as_str() {
                "succeeded" => return Ok(payload),
                "failed" | "canceled" => bail!("Replicate prediction failed: {}", payload),
                _ => {}
            }
            if started.elapsed() >= POLL_TIMEOUT {
                bail!(
                    "Replicate polling timed out after {:.1}s",
                    POLL_TIMEOUT.as_secs_f64()
                );
            }
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    }

    async fn run_prediction(&self, model: &str, input: Map<String, Value>) -> Result<ArtifactBlob> {
        let Some(api_key) = Self::api_key() else {
            bail!("REPLICATE_API_TOKEN not set");
        };
        let endpoint = self.predictions_endpoint();
        let response = self
            .http
            .post(&endpoint)
            .bearer_auth(&api_key)
            .header("Prefer", "wait")
            .json(&json!({ "model": model, "input": input }))
            .send()
            .await
            .with_context(|| format!("Replicate request failed ({endpoint})"))?;
        let mut prediction = response_json_or_error("Replicate", response).await?;

        let status = prediction_status(&prediction);
        if status != "succeeded" {
            if !matches!(status.as_str(), "starting" | "processing") {
                bail!("Replicate prediction failed: {}", prediction);
            }
            let poll_url = prediction
                .get("urls")
                .and_then(|urls| urls.get("get"))
                .and_then(Value::as_str)
                .map(str::to_string)
                .ok_or_else(|| anyhow::anyhow!("Replicate response missing poll URL"))?;
            prediction = self.poll_prediction(&poll_url, &api_key).await?;
        }

        let mut urls = Vec::new();
        extract_output_urls(prediction.get("output").unwrap_or(&Value::Null), &mut urls);
        let Some(url) = urls.first() else {
            bail!("Replicate prediction returned no output URL");
        };
        let response = self
            .http
            .get(url)
            .send()
            .await
            .with_context(|| format!("failed downloading Replicate image ({url})"))?;
        image_response_or_error("Replicate download", response).await
    }
}

#[async_trait]
impl MediaProvider for ReplicateProvider {
    fn name(&self) -> &str {
        "replicate"
    }

    async fn upscale(&self, request: &UpscaleRequest) -> Result<ArtifactBlob> {
        let mime = image::guess_format(&request.image)
            .map(|format| format.to_mime_type())
            .unwrap_or("image/png");
        let mut input = Map::new();
        input.insert(
            "image".to_string(),
            Value::String(format!("data:{mime};base64,{}", BASE64.encode(&request.image))),
        );
        input.insert("scale".to_string(), Value::from(request.scale));
        self.run_prediction(&request.model, input).await
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ArtifactBlob> {
        let mut input = Map::new();
        input.insert("prompt".to_string(), Value::String(request.prompt.clone()));
        if let Some(negative_prompt) = &request.negative_prompt {
            input.insert(
                "negative_prompt".to_string(),
                Value::String(negative_prompt.clone()),
            );
        }
        if let Some(width) = request.width {
            input.insert("width".to_string(), Value::from(width));
        }
        if let Some(height) = request.height {
            input.insert("height".to_string(), Value::from(height));
        }
        if let Some(seed) = request.seed {
            input.insert("seed".to_string(), Value::from(seed));
        }
        if let Some(steps) = request.steps {
            input.insert("num_inference_steps".to_string(), Value::from(steps));
        }
        if let Some(guidance) = request.guidance {
            input.insert("guidance_scale".to_string(), Value::from(guidance));
        }
        self.run_prediction(&request.model, input).await
    }
}

fn prediction_status(payload: &Value) -> String {
    payload
        .get("status")
        .and_then(Value::as_str)
        .map(|value| value.to_ascii_lowercase())
        .unwrap_or_default()
}

fn extract_output_urls(value: &Value, out: &mut Vec<String>) {
    match value {
        Value::String(url) => {
            let trimmed = url.trim();
            if !trimmed.is_empty()
                && trimmed.starts_with("http")
                && !out.iter().any(|existing| existing == trimmed)
            {
                out.push(trimmed.to_string());
            }
        }
        Value::Array(rows) => {
            for row in rows {
                extract_output_urls(row, out);
            }
        }
        Value::Object(obj) => {
            for key in ["url", "urls", "output"] {
                if let Some(nested) = obj.get(key) {
                    extract_output_urls(nested, out);
                }
            }
        }
        _ => {}
    }
}
