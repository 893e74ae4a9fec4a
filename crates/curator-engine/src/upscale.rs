use std::io::Cursor;
use std::sync::Arc;

use curator_contracts::events::BatchEvent;
use curator_contracts::media::{MediaItem, MediaStore};
use curator_contracts::plans::{Dimensions, UpscaleJobPlan, UpscaleSettings};
use curator_contracts::providers::ProviderDescriptor;
use image::imageops::FilterType;
use image::{ImageError, ImageReader};
use tracing::{debug, info, warn};

use crate::adapter::ProviderAdapter;
use crate::error::OrchestratorError;
use crate::materialize::{Directory, Materializer};
use crate::providers::{encode_png, ArtifactBlob, ProviderOperation, UpscaleRequest};
use crate::run::{BatchReport, RunContext};

/// One provider pass that made the image larger.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassRecord {
    pub pass: usize,
    pub provider: String,
    pub dimensions: Dimensions,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    Skipped { reason: String },
    Upscaled {
        blob: ArtifactBlob,
        dimensions: Dimensions,
        passes: Vec<PassRecord>,
    },
    Failed { reason: String },
}

/// Everything one upscale batch needs besides the shared stores.
#[derive(Debug, Clone)]
pub struct UpscaleBatch {
    pub items: Vec<MediaItem>,
    pub target: Dimensions,
    pub providers: Vec<ProviderDescriptor>,
    pub settings: UpscaleSettings,
}

/// Drives repeated upscale passes for one item at a time.
pub struct UpscaleEngine {
    adapter: Arc<ProviderAdapter>,
    materializer: Materializer,
}

impl UpscaleEngine {
    pub fn new(adapter: Arc<ProviderAdapter>) -> Self {
        Self {
            adapter,
            materializer: Materializer,
        }
    }

    /// Brings `item` toward `plan.target`. Providers are tried in the given
    /// order on every pass; the first success wins the pass.
    pub async fn upscale_item(
        &self,
        item: &MediaItem,
        plan: &UpscaleJobPlan,
        providers: &[ProviderDescriptor],
        settings: &UpscaleSettings,
        run: &RunContext,
    ) -> ItemOutcome {
        let start = item.dimensions();
        if !start.is_known() {
            return ItemOutcome::Skipped {
                reason: "dimensions unknown".to_string(),
            };
        }
        if start.meets(plan.target) {
            return ItemOutcome::Skipped {
                reason: format!("already at {start}, target {}", plan.target),
            };
        }

        let mut current = start;
        let mut content = item.content.clone();
        let mut best: Option<ArtifactBlob> = None;
        let mut passes = Vec::new();
        let mut last_failure = None;

        for pass in 1..=plan.max_passes {
            if current.meets(plan.target) {
                break;
            }
            let mut advanced = false;
            for descriptor in providers {
                let request = upscale_request(item, &content, descriptor, settings);
                let outcome = self
                    .adapter
                    .invoke(&descriptor.provider, &ProviderOperation::Upscale(request))
                    .await
                    .map_err(|failure| failure.reason)
                    .and_then(|blob| {
                        let measured = measure(&blob.bytes).map_err(|err| {
                            format!("could not measure result: {err}")
                        })?;
                        if !grew(current, measured) {
                            return Err(format!(
                                "result {measured} is not larger than {current}"
                            ));
                        }
                        Ok((blob, measured))
                    });

                match outcome {
                    Ok((blob, measured)) => {
                        debug!(item = %item.id, pass, provider = %descriptor.id, from = %current, to = %measured, "upscale pass completed");
                        run.emit(BatchEvent::PassCompleted {
                            item_id: item.id.clone(),
                            pass,
                            provider: descriptor.id.clone(),
                            width: measured.width,
                            height: measured.height,
                        });
                        passes.push(PassRecord {
                            pass,
                            provider: descriptor.id.clone(),
                            dimensions: measured,
                        });
                        content = Arc::from(blob.bytes.as_slice());
                        best = Some(blob);
                        current = measured;
                        advanced = true;
                        break;
                    }
                    Err(reason) => {
                        info!(item = %item.id, pass, provider = %descriptor.id, %reason, "upscale provider failed, trying next");
                        run.emit(BatchEvent::ProviderFailed {
                            item_id: item.id.clone(),
                            pass,
                            provider: descriptor.id.clone(),
                            reason: reason.clone(),
                        });
                        last_failure = Some(format!("{}: {reason}", descriptor.id));
                    }
                }
            }
            if !advanced {
                debug!(item = %item.id, pass, "no provider made progress; stopping");
                break;
            }
        }

        let Some(blob) = best else {
            let reason = match (providers.is_empty(), last_failure) {
                (true, _) => "no upscale provider available".to_string(),
                (false, Some(last)) => format!("every provider failed ({last})"),
                (false, None) => "no provider made progress".to_string(),
            };
            return ItemOutcome::Failed { reason };
        };

        if current.meets(plan.target) && current != plan.target {
            return match fit_to_target(&blob, plan.target) {
                Ok(bytes) => ItemOutcome::Upscaled {
                    blob: ArtifactBlob::png(bytes),
                    dimensions: plan.target,
                    passes,
                },
                Err(err) => ItemOutcome::Failed {
                    reason: format!("final resize failed: {err}"),
                },
            };
        }
        ItemOutcome::Upscaled {
            blob,
            dimensions: current,
            passes,
        }
    }

    /// Processes the batch items strictly one after another, patching each
    /// improved item into `media`. Progress advances by one per item, skipped or not.
    pub async fn run_batch(
        &self,
        media: &dyn MediaStore,
        batch: &UpscaleBatch,
        directory: Option<&dyn Directory>,
        run: &RunContext,
    ) -> BatchReport {
        let mut report = BatchReport::new(batch.items.len() as u64);
        let provider_ids = batch
            .providers
            .iter()
            .map(|descriptor| descriptor.id.clone())
            .collect::<Vec<String>>();

        for item in &batch.items {
            if run.is_cancelled() {
                report.cancelled = true;
                break;
            }
            let plan = UpscaleJobPlan::new(item.id.clone(), batch.target, provider_ids.clone());
            let outcome = self
                .upscale_item(item, &plan, &batch.providers, &batch.settings, run)
                .await;
            match outcome {
                ItemOutcome::Skipped { reason } => {
                    debug!(item = %item.id, %reason, "item skipped");
                    run.emit(BatchEvent::ItemSkipped {
                        item_id: item.id.clone(),
                        reason,
                    });
                    report.skipped += 1;
                }
                ItemOutcome::Upscaled { blob, .. } => {
                    match self.persist(media, item, blob, directory).await {
                        Ok((width, height, persisted)) => {
                            info!(item = %item.id, width, height, persisted, "item upscaled");
                            run.emit(BatchEvent::ItemCompleted {
                                item_id: item.id.clone(),
                                width,
                                height,
                                persisted,
                            });
                            report.succeeded += 1;
                        }
                        Err(err) => {
                            warn!(item = %item.id, error = %err, "upscaled item could not be stored");
                            run.emit(BatchEvent::ItemFailed {
                                item_id: item.id.clone(),
                                reason: err.to_string(),
                            });
                            report.failed += 1;
                        }
                    }
                }
                ItemOutcome::Failed { reason } => {
                    warn!(item = %item.id, %reason, "item not upscaled");
                    run.emit(BatchEvent::ItemFailed {
                        item_id: item.id.clone(),
                        reason,
                    });
                    report.failed += 1;
                }
            }
            run.progress.advance();
        }
        report
    }

    async fn persist(
        &self,
        media: &dyn MediaStore,
        item: &MediaItem,
        blob: ArtifactBlob,
        directory: Option<&dyn Directory>,
    ) -> Result<(u32, u32, bool), OrchestratorError> {
        let result = self
            .materializer
            .materialize(blob, &item.file_name, directory, false)
            .await?;
        let summary = (result.width, result.height, result.persisted);
        if !media.apply(result.into_patch(item.id.clone())) {
            return Err(OrchestratorError::InvalidPlan(format!(
                "item {} is no longer in the collection",
                item.id
            )));
        }
        Ok(summary)
    }
}

fn upscale_request(
    item: &MediaItem,
    content: &Arc<[u8]>,
    descriptor: &ProviderDescriptor,
    settings: &UpscaleSettings,
) -> UpscaleRequest {
    let features = descriptor.features;
    UpscaleRequest {
        image: content.clone(),
        file_name: item.file_name.clone(),
        model: descriptor.model.clone(),
        scale: descriptor.upscale_factor(),
        prompt: settings.prompt.clone().filter(|_| features.prompt),
        negative_prompt: settings
            .negative_prompt
            .clone()
            .filter(|_| features.negative_prompt),
        seed: settings.seed.filter(|_| features.seed),
        steps: settings.steps.filter(|_| features.steps),
        guidance: settings.guidance.filter(|_| features.guidance),
    }
}

/// A pass counts only if it grows at least one axis and shrinks neither.
fn grew(before: Dimensions, after: Dimensions) -> bool {
    after.width >= before.width
        && after.height >= before.height
        && (after.width > before.width || after.height > before.height)
}

fn measure(bytes: &[u8]) -> Result<Dimensions, ImageError> {
    let (width, height) = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(ImageError::IoError)?
        .into_dimensions()?;
    Ok(Dimensions::new(width, height))
}

fn fit_to_target(blob: &ArtifactBlob, target: Dimensions) -> anyhow::Result<Vec<u8>> {
    let decoded = image::load_from_memory(&blob.bytes)?;
    let fitted = decoded.resize_to_fill(target.width, target.height, FilterType::Lanczos3);
    encode_png(&fitted)
}
