use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use reqwest::multipart::{Form as MultipartForm, Part as MultipartPart};
use reqwest::Client as HttpClient;
use serde_json::Value;

use super::{
    content_type, non_empty_env, trim_api_base, truncate_text, ArtifactBlob, GenerateRequest,
    MediaProvider, UpscaleRequest,
};

pub struct StabilityProvider {
    api_base: String,
    http: HttpClient,
}

impl StabilityProvider {
    pub fn new(api_base: &str, http: HttpClient) -> Self {
        Self {
            api_base: trim_api_base(api_base),
            http,
        }
    }

    fn api_key() -> Option<String> {
        non_empty_env("STABILITY_API_KEY")
    }

    fn generate_endpoint(&self, model: &str) -> String {
        let route = if model.starts_with("sd3") { "sd3" } else { "core" };
        format!("{}/v2beta/stable-image/generate/{route}", self.api_base)
    }

    fn upscale_endpoint(&self) -> String {
        format!("{}/v2beta/stable-image/upscale/fast", self.api_base)
    }

    fn aspect_ratio_for(request: &GenerateRequest) -> String {
        if let Some(ratio) = request.aspect_ratio.as_deref() {
            return ratio.to_string();
        }
        match (request.width, request.height) {
            (Some(width), Some(height)) => nearest_aspect_ratio(width, height).to_string(),
            _ => "1:1".to_string(),
        }
    }

    fn decode_json_image(payload: &Value) -> Result<ArtifactBlob> {
        let image_b64 = payload
            .get("image")
            .or_else(|| payload.get("base64"))
            .or_else(|| {
                payload
                    .get("artifacts")
                    .and_then(Value::as_array)
                    .and_then(|rows| rows.first())
                    .and_then(Value::as_object)
                    .and_then(|row| row.get("base64"))
            })
            .and_then(Value::as_str)
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or_else(|| anyhow::anyhow!("Stability JSON response missing image bytes"))?;
        let bytes = BASE64
            .decode(image_b64.as_bytes())
            .context("Stability image base64 decode failed")?;
        Ok(ArtifactBlob::png(bytes))
    }

    async fn send(&self, endpoint: &str, form: MultipartForm) -> Result<ArtifactBlob> {
        let Some(api_key) = Self::api_key() else {
            bail!("STABILITY_API_KEY not set");
        };
        let response = self
            .http
            .post(endpoint)
            .bearer_auth(&api_key)
            .header("Accept", "image/*")
            .multipart(form)
            .send()
            .await
            .with_context(|| format!("Stability request failed ({endpoint})"))?;
        let status_code = response.status().as_u16();
        if !response.status().is_success() {
            let body = response.text().await.unwrap_or_default();
            bail!(
                "Stability request failed ({status_code}): {}",
                truncate_text(&body, 512)
            );
        }

        let mime_type = content_type(&response).unwrap_or_default();
        if mime_type.starts_with("image/") {
            return Ok(ArtifactBlob {
                bytes: response
                    .bytes()
                    .await
                    .context("failed reading Stability image bytes")?
                    .to_vec(),
                mime_type: Some(mime_type),
            });
        }
        let payload: Value = response
            .json()
            .await
            .context("failed parsing Stability JSON response")?;
        Self::decode_json_image(&payload)
    }
}

#[async_trait]
impl MediaProvider for StabilityProvider {
    fn name(&self) -> &str {
        "stability"
    }

    async fn upscale(&self, request: &UpscaleRequest) -> Result<ArtifactBlob> {
        let image = MultipartPart::bytes(request.image.to_vec())
            .file_name(request.file_name.clone())
            .mime_str("application/octet-stream")?;
        let form = MultipartForm::new()
            .part("image", image)
            .text("output_format", "png");
        self.send(&self.upscale_endpoint(), form).await
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ArtifactBlob> {
        let endpoint = self.generate_endpoint(&request.model);
        let mut form = MultipartForm::new()
            .text("prompt", request.prompt.clone())
            .text("aspect_ratio", Self::aspect_ratio_for(request))
            .text("output_format", "png");
        if request.model.starts_with("sd3") {
            form = form.text("model", request.model.clone());
        }
        if let Some(seed) = request.seed {
            form = form.text("seed", seed.to_string());
        }
        if let Some(negative_prompt) = &request.negative_prompt {
            form = form.text("negative_prompt", negative_prompt.clone());
        }
        if let Some(guidance) = request.guidance {
            form = form.text("cfg_scale", guidance.to_string());
        }
        self.send(&endpoint, form).await
    }
}

/// Closest ratio from the set Stability accepts.
pub fn nearest_aspect_ratio(width: u32, height: u32) -> &'static str {
    if width == 0 || height == 0 {
        return "1:1";
    }
    let ratio = width as f64 / height as f64;
    let candidates = [
        ("1:1", 1.0),
        ("16:9", 16.0 / 9.0),
        ("9:16", 9.0 / 16.0),
        ("21:9", 21.0 / 9.0),
        ("9:21", 9.0 / 21.0),
        ("3:2", 3.0 / 2.0),
        ("2:3", 2.0 / 3.0),
        ("4:5", 4.0 / 5.0),
        ("5:4", 5.0 / 4.0),
    ];
    let mut best = "1:1";
    let mut best_delta = f64::MAX;
    for (name, value) in candidates {
        let delta = (ratio - value).abs();
        if delta < best_delta {
            best_delta = delta;
            best = name;
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn aspect_ratio_prefers_explicit_value() {
        let request = GenerateRequest {
            aspect_ratio: Some("3:2".to_string()),
            width: Some(1080),
            height: Some(1920),
            ..GenerateRequest::default()
        };
        assert_eq!(StabilityProvider::aspect_ratio_for(&request), "3:2");
    }

    #[test]
    fn aspect_ratio_derives_from_dimensions() {
        assert_eq!(nearest_aspect_ratio(1920, 1080), "16:9");
        assert_eq!(nearest_aspect_ratio(1080, 1920), "9:16");
        assert_eq!(nearest_aspect_ratio(1024, 1024), "1:1");
        assert_eq!(nearest_aspect_ratio(0, 1024), "1:1");
        assert_eq!(
            StabilityProvider::aspect_ratio_for(&GenerateRequest::default()),
            "1:1"
        );
    }

    #[test]
    fn generate_endpoint_routes_sd3_models() {
        let provider = StabilityProvider::new("https://api.stability.ai/", HttpClient::new());
        assert_eq!(
            provider.generate_endpoint("sd3-large"),
            "https://api.stability.ai/v2beta/stable-image/generate/sd3"
        );
        assert_eq!(
            provider.generate_endpoint("core"),
            "https://api.stability.ai/v2beta/stable-image/generate/core"
        );
    }

    #[test]
    fn decode_json_image_reads_artifacts_shape() -> anyhow::Result<()> {
        let payload = json!({"artifacts": [{"base64": BASE64.encode([1u8, 2, 3])}]});
        let blob = StabilityProvider::decode_json_image(&payload)?;
        assert_eq!(blob.bytes, vec![1, 2, 3]);
        assert!(StabilityProvider::decode_json_image(&json!({})).is_err());
        Ok(())
    }
}
