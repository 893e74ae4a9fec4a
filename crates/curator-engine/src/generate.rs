use std::sync::Arc;

use chrono::Utc;
use curator_contracts::events::BatchEvent;
use curator_contracts::media::{MediaItem, MediaStore};
use curator_contracts::plans::{GenerateJob, GenerateJobPlan, GenerateSettings};
use curator_contracts::providers::{ProviderCatalog, ProviderDescriptor, ProviderKind, ProviderSelector};
use tracing::{info, warn};

use crate::adapter::ProviderAdapter;
use crate::error::{OrchestratorError, Result};
use crate::materialize::{Directory, Materializer};
use crate::providers::{nearest_aspect_ratio, GenerateRequest, ProviderOperation};
use crate::run::{BatchReport, RunContext};

/// Runs model x repeat generation jobs one at a time.
pub struct GenerationScheduler {
    adapter: Arc<ProviderAdapter>,
    materializer: Materializer,
}

impl GenerationScheduler {
    pub fn new(adapter: Arc<ProviderAdapter>) -> Self {
        Self {
            adapter,
            materializer: Materializer,
        }
    }

    /// Executes every job of `plan` in order. A failed job is counted and the
    /// batch moves on; cancellation is observed only between jobs.
    pub async fn run(
        &self,
        plan: &GenerateJobPlan,
        catalog: &ProviderCatalog,
        media: &dyn MediaStore,
        directory: &dyn Directory,
        run: &RunContext,
    ) -> BatchReport {
        let mut report = BatchReport::new(plan.total_jobs());
        let selector = ProviderSelector::new(catalog);
        let stamp = Utc::now().format("%Y%m%dT%H%M%S").to_string();

        for job in plan.jobs() {
            if run.is_cancelled() {
                report.cancelled = true;
                break;
            }
            run.progress.set_active_model(&job.model);

            let outcome = match selector.select(&job.model, ProviderKind::Generate) {
                Ok(descriptor) => {
                    self.run_job(&job, &descriptor, &plan.settings, directory, &stamp)
                        .await
                }
                Err(reason) => Err(OrchestratorError::InvalidPlan(reason)),
            };
            match outcome {
                Ok(item) => {
                    info!(job = job.job_index, model = %job.model, file_name = %item.file_name, "generation job completed");
                    run.emit(BatchEvent::JobCompleted {
                        job_index: job.job_index,
                        model: job.model.clone(),
                        item_id: item.id.clone(),
                        file_name: item.file_name.clone(),
                    });
                    media.append(item);
                    report.succeeded += 1;
                }
                Err(err) => {
                    warn!(job = job.job_index, model = %job.model, error = %err, "generation job failed");
                    run.emit(BatchEvent::JobFailed {
                        job_index: job.job_index,
                        model: job.model.clone(),
                        reason: err.to_string(),
                    });
                    report.failed += 1;
                }
            }
            run.progress.advance();
        }
        report
    }

    async fn run_job(
        &self,
        job: &GenerateJob,
        descriptor: &ProviderDescriptor,
        settings: &GenerateSettings,
        directory: &dyn Directory,
        stamp: &str,
    ) -> Result<MediaItem> {
        let request = generate_request(descriptor, settings, job);
        let blob = self
            .adapter
            .invoke(&descriptor.provider, &ProviderOperation::Generate(request))
            .await?;
        let extension = blob
            .format()
            .and_then(|format| format.extensions_str().first().copied())
            .unwrap_or("png");
        let file_name = format!(
            "gen-{}-{stamp}-{:02}.{extension}",
            model_slug(&descriptor.id),
            job.job_index
        );
        let result = self
            .materializer
            .materialize(blob, &file_name, Some(directory), true)
            .await?;
        Ok(result.into_item(Some(settings.prompt.clone())))
    }
}

/// Builds the provider request for one job. Optional values are forwarded
/// only when the model declares support for them.
pub fn generate_request(
    descriptor: &ProviderDescriptor,
    settings: &GenerateSettings,
    job: &GenerateJob,
) -> GenerateRequest {
    let features = descriptor.features;
    let (width, height) = if features.dimensions {
        (settings.width, settings.height)
    } else {
        (None, None)
    };
    let aspect_ratio = if features.aspect_ratio && !features.dimensions {
        settings.aspect_ratio.clone().or_else(|| {
            settings
                .width
                .zip(settings.height)
                .map(|(width, height)| nearest_aspect_ratio(width, height).to_string())
        })
    } else if features.aspect_ratio {
        settings.aspect_ratio.clone()
    } else {
        None
    };

    GenerateRequest {
        model: descriptor.model.clone(),
        prompt: settings.prompt.clone(),
        negative_prompt: settings
            .negative_prompt
            .clone()
            .filter(|_| features.negative_prompt),
        width,
        height,
        aspect_ratio,
        seed: job.seed.filter(|_| features.seed),
        steps: settings.steps.filter(|_| features.steps),
        guidance: settings.guidance.filter(|_| features.guidance),
    }
}

fn model_slug(model: &str) -> String {
    let slug = model
        .chars()
        .map(|ch| {
            if ch.is_ascii_alphanumeric() {
                ch.to_ascii_lowercase()
            } else {
                '-'
            }
        })
        .collect::<String>();
    let trimmed = slug.trim_matches('-');
    if trimmed.is_empty() {
        return "model".to_string();
    }
    trimmed.to_string()
}
