use serde::{Deserialize, Serialize};

/// Hard cap on upscale passes per item.
pub const MAX_UPSCALE_PASSES: usize = 5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dimensions {
    pub width: u32,
    pub height: u32,
}

impl Dimensions {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_known(&self) -> bool {
        self.width > 0 && self.height > 0
    }

    /// Both axes at or above `target`.
    pub fn meets(&self, target: Dimensions) -> bool {
        self.width >= target.width && self.height >= target.height
    }

    pub fn scaled(&self, factor: u32) -> Self {
        Self {
            width: self.width.saturating_mul(factor),
            height: self.height.saturating_mul(factor),
        }
    }

    /// Parses `WxH` (also accepts `x`/`X`/`*` separators).
    pub fn parse(raw: &str) -> Option<Self> {
        let normalized = raw.trim().to_ascii_lowercase().replace('*', "x");
        let (width, height) = normalized.split_once('x')?;
        let width = parse_positive_u32(width)?;
        let height = parse_positive_u32(height)?;
        Some(Self { width, height })
    }
}

impl std::fmt::Display for Dimensions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Optional guidance forwarded to upscale backends that accept it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct UpscaleSettings {
    pub prompt: Option<String>,
    pub negative_prompt: Option<String>,
    pub seed: Option<u64>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UpscaleJobPlan {
    pub item_id: String,
    pub target: Dimensions,
    pub providers: Vec<String>,
    pub max_passes: usize,
}

impl UpscaleJobPlan {
    pub fn new(item_id: impl Into<String>, target: Dimensions, providers: Vec<String>) -> Self {
        Self {
            item_id: item_id.into(),
            target,
            providers,
            max_passes: MAX_UPSCALE_PASSES,
        }
    }
}

/// Generation form values exactly as the caller typed them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawGenerateSettings {
    pub prompt: String,
    #[serde(default)]
    pub negative_prompt: String,
    #[serde(default)]
    pub width: String,
    #[serde(default)]
    pub height: String,
    #[serde(default)]
    pub aspect_ratio: String,
    #[serde(default)]
    pub seed: String,
    #[serde(default)]
    pub steps: String,
    #[serde(default)]
    pub guidance: String,
}

/// Parsed generation parameters. `None` means "leave it to the provider".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GenerateSettings {
    pub prompt: String,
    pub negative_prompt: Option<String>,
    pub width: Option<u32>,
    pub height: Option<u32>,
    pub aspect_ratio: Option<String>,
    pub seed: Option<u64>,
    pub steps: Option<u32>,
    pub guidance: Option<f64>,
}

impl GenerateSettings {
    pub fn parse(raw: &RawGenerateSettings) -> Self {
        Self {
            prompt: raw.prompt.trim().to_string(),
            negative_prompt: non_empty(&raw.negative_prompt),
            width: parse_positive_u32(&raw.width),
            height: parse_positive_u32(&raw.height),
            aspect_ratio: non_empty(&raw.aspect_ratio),
            seed: parse_positive_u64(&raw.seed),
            steps: parse_positive_u32(&raw.steps),
            guidance: parse_positive_f64(&raw.guidance),
        }
    }
}

/// Largest number of model x repeat jobs one generation batch may hold.
pub const MAX_BATCH_JOBS: u64 = 10_000;

#[derive(Debug, Clone, PartialEq)]
pub struct GenerateJobPlan {
    pub models: Vec<String>,
    pub settings: GenerateSettings,
    pub repeat: u32,
}

/// One model/iteration combination of a generation batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenerateJob {
    pub model: String,
    pub repeat_index: u32,
    pub job_index: u64,
    pub seed: Option<u64>,
}

impl GenerateJobPlan {
    pub fn total_jobs(&self) -> u64 {
        self.models.len() as u64 * u64::from(self.repeat)
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.models.is_empty() {
            return Err("No models selected.".to_string());
        }
        if self.repeat == 0 {
            return Err("Repeat count must be at least 1.".to_string());
        }
        if self.total_jobs() > MAX_BATCH_JOBS {
            return Err(format!(
                "Batch of {} jobs exceeds the limit of {MAX_BATCH_JOBS}.",
                self.total_jobs()
            ));
        }
        if self.settings.prompt.is_empty() {
            return Err("Prompt is empty.".to_string());
        }
        Ok(())
    }

    /// Jobs in execution order: models in caller order, repeats within each model.
    pub fn jobs(&self) -> Vec<GenerateJob> {
        let mut jobs = Vec::with_capacity(self.total_jobs().min(MAX_BATCH_JOBS) as usize);
        for model in &self.models {
            for repeat_index in 0..self.repeat {
                jobs.push(GenerateJob {
                    model: model.clone(),
                    repeat_index,
                    job_index: jobs.len() as u64,
                    seed: self
                        .settings
                        .seed
                        .map(|base| base.saturating_add(u64::from(repeat_index))),
                });
            }
        }
        jobs
    }
}

fn non_empty(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(trimmed.to_string())
}

pub fn parse_positive_u32(raw: &str) -> Option<u32> {
    raw.trim().parse::<u32>().ok().filter(|value| *value > 0)
}

pub fn parse_positive_u64(raw: &str) -> Option<u64> {
    raw.trim().parse::<u64>().ok().filter(|value| *value > 0)
}

pub fn parse_positive_f64(raw: &str) -> Option<f64> {
    raw.trim()
        .parse::<f64>()
        .ok()
        .filter(|value| value.is_finite() && *value > 0.0)
}
