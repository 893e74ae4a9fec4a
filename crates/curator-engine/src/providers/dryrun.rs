use anyhow::{Context, Result};
use async_trait::async_trait;
use image::imageops::FilterType;
use image::{DynamicImage, Rgb, RgbImage};
use sha2::{Digest, Sha256};

use super::{encode_png, ArtifactBlob, GenerateRequest, MediaProvider, UpscaleRequest};

const DEFAULT_SIZE: u32 = 512;

/// Offline backend: solid-color images keyed on prompt and seed, nearest-neighbour upscales.
pub struct DryrunProvider;

#[async_trait]
impl MediaProvider for DryrunProvider {
    fn name(&self) -> &str {
        "dryrun"
    }

    async fn upscale(&self, request: &UpscaleRequest) -> Result<ArtifactBlob> {
        let source = image::load_from_memory(&request.image)
            .with_context(|| format!("dryrun could not decode {}", request.file_name))?;
        let width = source.width().saturating_mul(request.scale);
        let height = source.height().saturating_mul(request.scale);
        let upscaled = source.resize_exact(width, height, FilterType::Nearest);
        Ok(ArtifactBlob::png(encode_png(&upscaled)?))
    }

    async fn generate(&self, request: &GenerateRequest) -> Result<ArtifactBlob> {
        let width = request.width.unwrap_or(DEFAULT_SIZE);
        let height = request.height.unwrap_or(DEFAULT_SIZE);
        let (r, g, b) = color_from_prompt(&request.prompt, request.seed.unwrap_or_default());
        let mut image = RgbImage::new(width, height);
        for pixel in image.pixels_mut() {
            *pixel = Rgb([r, g, b]);
        }
        Ok(ArtifactBlob::png(encode_png(&DynamicImage::ImageRgb8(
            image,
        ))?))
    }
}

fn color_from_prompt(prompt: &str, seed: u64) -> (u8, u8, u8) {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    hasher.update(seed.to_be_bytes());
    let digest = hasher.finalize();
    (digest[0], digest[1], digest[2])
}
