use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use curator_contracts::events::{BatchEvent, EventWriter};
use curator_contracts::media::MediaStore;
use curator_contracts::plans::{Dimensions, GenerateJobPlan, UpscaleSettings};
use curator_contracts::progress::{JobKind, LifecycleState, ProgressSnapshot};
use curator_contracts::providers::{ProviderKind, ProviderSelector};
use curator_contracts::runs::summary::{now_utc_iso, BatchSummary};
use tokio::sync::watch;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::adapter::ProviderAdapter;
use crate::config::CuratorConfig;
use crate::error::{OrchestratorError, Result};
use crate::generate::GenerationScheduler;
use crate::materialize::Directory;
use crate::probe::{CapabilityProbe, CapabilityRegistry, HttpCapabilitySource};
use crate::progress::ProgressStore;
use crate::providers::default_provider_registry;
use crate::run::{BatchReport, RunContext};
use crate::upscale::{UpscaleBatch, UpscaleEngine};

/// Collaborators an [`Orchestrator`] is assembled from.
pub struct OrchestratorParts {
    pub adapter: ProviderAdapter,
    pub capabilities: CapabilityRegistry,
    pub media: Arc<dyn MediaStore>,
    pub directory: Option<Arc<dyn Directory>>,
    pub events: Option<EventWriter>,
    pub done_grace: Duration,
}

/// The context object behind the batch entry points. Clones share progress
/// stores and cancellation state.
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<OrchestratorInner>,
}

struct OrchestratorInner {
    capabilities: CapabilityRegistry,
    upscale_engine: UpscaleEngine,
    scheduler: GenerationScheduler,
    media: Arc<dyn MediaStore>,
    directory: Option<Arc<dyn Directory>>,
    events: Option<EventWriter>,
    upscale: BatchSlot,
    generate: BatchSlot,
}

struct BatchSlot {
    progress: ProgressStore,
    cancel: Mutex<CancellationToken>,
}

impl BatchSlot {
    fn new(kind: JobKind, grace: Duration) -> Self {
        Self {
            progress: ProgressStore::new(kind, grace),
            cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Enters `running` and hands out a fresh token for this run.
    fn begin(&self, total: u64) -> Result<CancellationToken> {
        let mut cancel = self
            .cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        self.progress.begin(total)?;
        *cancel = CancellationToken::new();
        Ok(cancel.clone())
    }

    fn cancel(&self) {
        self.cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .cancel();
    }
}

impl Orchestrator {
    /// Wires the default providers and the HTTP capability probe from `config`.
    pub fn new(
        config: &CuratorConfig,
        media: Arc<dyn MediaStore>,
        directory: Option<Arc<dyn Directory>>,
        events: Option<EventWriter>,
    ) -> anyhow::Result<Self> {
        let http = config.http_client()?;
        let probe = CapabilityProbe::new(
            Arc::new(HttpCapabilitySource::new(http.clone())),
            config.probe_ttl(),
        );
        Ok(Self::from_parts(OrchestratorParts {
            adapter: ProviderAdapter::new(default_provider_registry(config, http)),
            capabilities: CapabilityRegistry::new(probe, Some(config.local_endpoint.clone())),
            media,
            directory,
            events,
            done_grace: config.done_grace(),
        }))
    }

    pub fn from_parts(parts: OrchestratorParts) -> Self {
        let adapter = Arc::new(parts.adapter);
        Self {
            inner: Arc::new(OrchestratorInner {
                capabilities: parts.capabilities,
                upscale_engine: UpscaleEngine::new(adapter.clone()),
                scheduler: GenerationScheduler::new(adapter),
                media: parts.media,
                directory: parts.directory,
                events: parts.events,
                upscale: BatchSlot::new(JobKind::Upscale, parts.done_grace),
                generate: BatchSlot::new(JobKind::Generate, parts.done_grace),
            }),
        }
    }

    pub fn capabilities(&self) -> &CapabilityRegistry {
        &self.inner.capabilities
    }

    pub fn subscribe(&self, kind: JobKind) -> watch::Receiver<ProgressSnapshot> {
        self.slot(kind).progress.subscribe()
    }

    pub fn snapshot(&self, kind: JobKind) -> ProgressSnapshot {
        self.slot(kind).progress.snapshot()
    }

    /// Requests cancellation of every active batch. Takes effect before the
    /// next item or job; an in-flight provider call always completes.
    pub fn cancel(&self) {
        self.inner.upscale.cancel();
        self.inner.generate.cancel();
    }

    /// Returns the store for `kind` to idle. A running batch is left alone.
    pub fn reset_state(&self, kind: JobKind) -> ProgressSnapshot {
        let progress = &self.slot(kind).progress;
        let current = progress.snapshot();
        if current.state == LifecycleState::Running {
            warn!(kind = kind.as_str(), "reset ignored while a batch is running");
            return current;
        }
        progress.reset()
    }

    /// Upscales every item in the collection toward `target`, trying the enabled
    /// providers in the given order.
    #[instrument(skip_all, fields(target_size = %target))]
    pub async fn start_upscale_batch(
        &self,
        target: Dimensions,
        providers: &[String],
        settings: UpscaleSettings,
    ) -> Result<BatchSummary> {
        if !target.is_known() {
            return Err(OrchestratorError::InvalidPlan(format!(
                "target {target} must be positive on both axes"
            )));
        }
        let catalog = self.inner.capabilities.catalog().await;
        let selection = ProviderSelector::new(&catalog).resolve_order(providers, ProviderKind::Upscale);
        for skipped in &selection.skipped {
            warn!(provider = %skipped.id, reason = %skipped.reason, "upscale provider skipped");
        }
        if self.inner.directory.is_none() {
            warn!("no destination directory; upscaled images stay in memory");
        }

        let items = self.inner.media.snapshot();
        let batch = UpscaleBatch {
            items,
            target,
            providers: selection.resolved,
            settings,
        };
        let total = batch.items.len() as u64;
        let started = self.start(JobKind::Upscale, total)?;

        let inner = self.inner.clone();
        let run = started.run.clone();
        Self::supervise(started, async move {
            inner
                .upscale_engine
                .run_batch(&*inner.media, &batch, inner.directory.as_deref(), &run)
                .await
        })
        .await
    }

    /// Runs every model x repeat job of `plan`. Fails before any provider call
    /// when the plan is empty or no destination directory is configured.
    #[instrument(skip_all, fields(models = plan.models.len(), repeat = plan.repeat))]
    pub async fn start_generate_batch(&self, plan: GenerateJobPlan) -> Result<BatchSummary> {
        plan.validate().map_err(OrchestratorError::InvalidPlan)?;
        let Some(directory) = self.inner.directory.clone() else {
            return Err(OrchestratorError::DestinationMissing);
        };
        let catalog = self.inner.capabilities.catalog().await;
        let started = self.start(JobKind::Generate, plan.total_jobs())?;

        let inner = self.inner.clone();
        let run = started.run.clone();
        Self::supervise(started, async move {
            inner
                .scheduler
                .run(&plan, &catalog, &*inner.media, &*directory, &run)
                .await
        })
        .await
    }

    fn slot(&self, kind: JobKind) -> &BatchSlot {
        match kind {
            JobKind::Upscale => &self.inner.upscale,
            JobKind::Generate => &self.inner.generate,
        }
    }

    fn start(&self, kind: JobKind, total: u64) -> Result<StartedBatch> {
        let slot = self.slot(kind);
        let cancel = slot.begin(total)?;
        let batch_id = uuid::Uuid::new_v4().to_string();
        let run = RunContext::new(slot.progress.clone(), cancel, self.inner.events.clone());
        info!(kind = kind.as_str(), batch_id = %batch_id, total, "batch started");
        run.emit(BatchEvent::BatchStarted { kind, total });
        Ok(StartedBatch {
            kind,
            batch_id,
            started_at: now_utc_iso(),
            run,
        })
    }

    /// Runs `batch` and its terminal transition on the runtime, detached from
    /// the caller. Dropping the returned future does not leave the store running.
    async fn supervise<F>(started: StartedBatch, batch: F) -> Result<BatchSummary>
    where
        F: Future<Output = BatchReport> + Send + 'static,
    {
        let kind = started.kind;
        let progress = started.run.progress.clone();
        let supervisor = tokio::spawn(async move {
            let joined = tokio::spawn(batch).await;
            Self::finish(started, joined)
        });
        match supervisor.await {
            Ok(result) => result,
            Err(err) => {
                warn!(kind = kind.as_str(), error = %err, "batch supervisor aborted");
                progress.reset();
                Err(OrchestratorError::BatchAborted {
                    kind,
                    reason: err.to_string(),
                })
            }
        }
    }

    fn finish(
        started: StartedBatch,
        joined: std::result::Result<BatchReport, JoinError>,
    ) -> Result<BatchSummary> {
        let StartedBatch {
            kind,
            batch_id,
            started_at,
            run,
        } = started;
        let report = match joined {
            Ok(report) => report,
            Err(err) => {
                warn!(kind = kind.as_str(), batch_id = %batch_id, error = %err, "batch task aborted");
                run.progress.reset();
                return Err(OrchestratorError::BatchAborted {
                    kind,
                    reason: err.to_string(),
                });
            }
        };

        let current = run.progress.snapshot().current();
        let state = if report.cancelled {
            run.progress.cancel();
            info!(kind = kind.as_str(), batch_id = %batch_id, current, total = report.total, "batch cancelled");
            run.emit(BatchEvent::BatchCancelled {
                current,
                total: report.total,
            });
            LifecycleState::Cancelled
        } else {
            run.progress.finish();
            info!(
                kind = kind.as_str(),
                batch_id = %batch_id,
                succeeded = report.succeeded,
                failed = report.failed,
                skipped = report.skipped,
                "batch finished"
            );
            LifecycleState::Done
        };
        run.emit(BatchEvent::BatchFinished {
            total: report.total,
            succeeded: report.succeeded,
            failed: report.failed,
            skipped: report.skipped,
        });

        Ok(BatchSummary {
            batch_id,
            kind,
            started_at,
            finished_at: now_utc_iso(),
            total: report.total,
            succeeded: report.succeeded,
            failed: report.failed,
            skipped: report.skipped,
            state,
        })
    }
}

struct StartedBatch {
    kind: JobKind,
    batch_id: String,
    started_at: String,
    run: RunContext,
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::OnceLock;

    use anyhow::{bail, Result};
    use async_trait::async_trait;
    use curator_contracts::media::{MediaCollection, MediaItem};
    use curator_contracts::plans::{GenerateSettings, RawGenerateSettings};
    use image::{DynamicImage, RgbImage};
    use serde_json::{json, Value};

    use super::*;
    use crate::materialize::FsDirectory;
    use crate::probe::{CapabilitiesResponse, CapabilitySource};
    use crate::providers::{
        encode_png, ArtifactBlob, DryrunProvider, GenerateRequest, MediaProvider,
        ProviderRegistry, UpscaleRequest,
    };

    struct LocalServer {
        reachable: bool,
    }

    #[async_trait]
    impl CapabilitySource for LocalServer {
        async fn ping(&self, _endpoint: &str) -> Result<bool> {
            if !self.reachable {
                bail!("connection refused");
            }
            Ok(true)
        }

        async fn capabilities(&self, _endpoint: &str) -> Result<CapabilitiesResponse> {
            Ok(serde_json::from_value(json!({
                "capabilities": [
                    {"kind": "upscale", "model": "realesrgan-x2plus", "scale": 2},
                    {"kind": "image", "model": "sdxl"},
                    {"kind": "image", "model": "flux"}
                ],
                "device": "cuda",
                "gpu_memory_gb": 24
            }))?)
        }
    }

    /// Upscales by `request.scale`, or fails; generates via the dryrun backend.
    /// Optionally cancels the orchestrator on its n-th generate call.
    struct Scripted {
        name: &'static str,
        fail: bool,
        calls: Arc<AtomicUsize>,
        cancel_on_call: Option<(usize, Arc<OnceLock<Orchestrator>>)>,
        delay: Option<Duration>,
    }

    #[async_trait]
    impl MediaProvider for Scripted {
        fn name(&self) -> &str {
            self.name
        }

        async fn upscale(&self, request: &UpscaleRequest) -> Result<ArtifactBlob> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                bail!("{} is down", self.name);
            }
            let source = image::load_from_memory(&request.image)?;
            let out = RgbImage::new(source.width() * request.scale, source.height() * request.scale);
            Ok(ArtifactBlob::png(encode_png(&DynamicImage::ImageRgb8(out))?))
        }

        async fn generate(&self, request: &GenerateRequest) -> Result<ArtifactBlob> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if let Some((at, hook)) = &self.cancel_on_call {
                if call == *at {
                    if let Some(orchestrator) = hook.get() {
                        orchestrator.cancel();
                    }
                }
            }
            if self.fail {
                bail!("{} is down", self.name);
            }
            DryrunProvider
                .generate(&GenerateRequest {
                    prompt: format!("{} {}", request.model, request.prompt),
                    seed: Some(call as u64),
                    width: Some(8),
                    height: Some(8),
                    ..request.clone()
                })
                .await
        }
    }

    struct Harness {
        orchestrator: Orchestrator,
        collection: MediaCollection,
        ai3_calls: Arc<AtomicUsize>,
        stability_calls: Arc<AtomicUsize>,
    }

    #[derive(Default)]
    struct Setup {
        ai3_fails: bool,
        directory: Option<Arc<dyn Directory>>,
        cancel_on_call: Option<usize>,
        events: Option<EventWriter>,
        delay: Option<Duration>,
    }

    fn harness(setup: Setup, items: Vec<MediaItem>) -> Harness {
        let hook = Arc::new(OnceLock::new());
        let ai3_calls = Arc::new(AtomicUsize::new(0));
        let stability_calls = Arc::new(AtomicUsize::new(0));
        let mut registry = ProviderRegistry::new();
        registry.register(Scripted {
            name: "ai3",
            fail: setup.ai3_fails,
            calls: ai3_calls.clone(),
            cancel_on_call: setup.cancel_on_call.map(|at| (at, hook.clone())),
            delay: setup.delay,
        });
        registry.register(Scripted {
            name: "stability",
            fail: false,
            calls: stability_calls.clone(),
            cancel_on_call: None,
            delay: None,
        });

        let collection = MediaCollection::new(items);
        let capabilities = CapabilityRegistry::new(
            CapabilityProbe::new(Arc::new(LocalServer { reachable: true }), Duration::from_secs(30)),
            Some("http://127.0.0.1:8000".to_string()),
        );
        let orchestrator = Orchestrator::from_parts(OrchestratorParts {
            adapter: ProviderAdapter::new(registry),
            capabilities,
            media: Arc::new(collection.clone()),
            directory: setup.directory,
            events: setup.events,
            done_grace: Duration::from_millis(3000),
        });
        let _ = hook.set(orchestrator.clone());
        Harness {
            orchestrator,
            collection,
            ai3_calls,
            stability_calls,
        }
    }

    fn item(name: &str, width: u32, height: u32) -> Result<MediaItem> {
        let bytes = encode_png(&DynamicImage::ImageRgb8(RgbImage::new(width, height)))?;
        Ok(MediaItem::from_content(name, bytes, width, height))
    }

    fn providers(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|id| (*id).to_string()).collect()
    }

    fn generate_plan(models: &[&str], repeat: u32) -> GenerateJobPlan {
        GenerateJobPlan {
            models: models.iter().map(|model| (*model).to_string()).collect(),
            settings: GenerateSettings::parse(&RawGenerateSettings {
                prompt: "a lighthouse at dusk".to_string(),
                ..RawGenerateSettings::default()
            }),
            repeat,
        }
    }

    #[tokio::test]
    async fn upscale_batch_composes_local_passes_to_exact_target() -> Result<()> {
        let source = item("a.png", 512, 512)?;
        let h = harness(Setup::default(), vec![source.clone()]);

        let summary = h
            .orchestrator
            .start_upscale_batch(
                Dimensions::new(2048, 2048),
                &providers(&["ai3", "stability"]),
                UpscaleSettings::default(),
            )
            .await?;
        assert_eq!((summary.succeeded, summary.state), (1, LifecycleState::Done));
        assert_eq!(h.ai3_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.stability_calls.load(Ordering::SeqCst), 0);

        let patched = h.collection.get(&source.id).unwrap_or(source);
        assert_eq!(patched.dimensions(), Dimensions::new(2048, 2048));
        let snapshot = h.orchestrator.snapshot(JobKind::Upscale);
        assert_eq!((snapshot.current(), snapshot.total()), (1, 1));
        Ok(())
    }

    #[tokio::test]
    async fn upscale_batch_falls_back_when_local_provider_fails() -> Result<()> {
        let source = item("a.png", 512, 512)?;
        let h = harness(
            Setup {
                ai3_fails: true,
                ..Setup::default()
            },
            vec![source.clone()],
        );

        let summary = h
            .orchestrator
            .start_upscale_batch(
                Dimensions::new(2048, 2048),
                &providers(&["ai3", "stability"]),
                UpscaleSettings::default(),
            )
            .await?;
        assert_eq!(summary.succeeded, 1);
        assert_eq!(h.ai3_calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.stability_calls.load(Ordering::SeqCst), 1);
        let patched = h.collection.get(&source.id).unwrap_or(source);
        assert_eq!(patched.dimensions(), Dimensions::new(2048, 2048));
        Ok(())
    }

    #[tokio::test]
    async fn items_at_target_are_untouched_but_counted() -> Result<()> {
        let large = item("large.png", 4096, 2048)?;
        let h = harness(Setup::default(), vec![large.clone()]);

        let summary = h
            .orchestrator
            .start_upscale_batch(
                Dimensions::new(2048, 2048),
                &providers(&["ai3"]),
                UpscaleSettings::default(),
            )
            .await?;
        assert_eq!((summary.skipped, summary.total), (1, 1));
        assert_eq!(h.orchestrator.snapshot(JobKind::Upscale).current(), 1);
        assert_eq!(h.collection.get(&large.id), Some(large));
        assert_eq!(h.ai3_calls.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn generate_batch_cancelled_after_second_job() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(
            Setup {
                directory: Some(Arc::new(FsDirectory::new(dir.path()))),
                cancel_on_call: Some(2),
                ..Setup::default()
            },
            Vec::new(),
        );

        let summary = h
            .orchestrator
            .start_generate_batch(generate_plan(&["sdxl", "flux"], 3))
            .await?;
        assert_eq!(summary.total, 6);
        assert_eq!(summary.state, LifecycleState::Cancelled);
        assert_eq!(summary.processed(), 2);

        let snapshot = h.orchestrator.snapshot(JobKind::Generate);
        assert_eq!(snapshot.state, LifecycleState::Cancelled);
        assert_eq!((snapshot.current(), snapshot.total()), (2, 6));
        assert_eq!(h.ai3_calls.load(Ordering::SeqCst), 2);
        assert_eq!(h.collection.len(), 2);

        assert!(matches!(
            h.orchestrator
                .start_generate_batch(generate_plan(&["sdxl"], 1))
                .await,
            Err(OrchestratorError::BatchAlreadyRunning(JobKind::Generate))
        ));
        assert_eq!(
            h.orchestrator.reset_state(JobKind::Generate),
            ProgressSnapshot::idle()
        );
        assert_eq!(
            h.orchestrator.reset_state(JobKind::Generate),
            ProgressSnapshot::idle()
        );
        Ok(())
    }

    #[tokio::test]
    async fn generate_without_directory_fails_before_any_call() {
        let h = harness(Setup::default(), Vec::new());
        let result = h
            .orchestrator
            .start_generate_batch(generate_plan(&["sdxl"], 2))
            .await;
        assert!(matches!(result, Err(OrchestratorError::DestinationMissing)));
        assert_eq!(h.ai3_calls.load(Ordering::SeqCst), 0);
        assert_eq!(
            h.orchestrator.snapshot(JobKind::Generate),
            ProgressSnapshot::idle()
        );
    }

    #[tokio::test]
    async fn invalid_plans_are_rejected_up_front() {
        let h = harness(Setup::default(), Vec::new());
        let result = h
            .orchestrator
            .start_generate_batch(generate_plan(&[], 2))
            .await;
        assert!(matches!(result, Err(OrchestratorError::InvalidPlan(_))));

        let result = h
            .orchestrator
            .start_upscale_batch(Dimensions::new(0, 10), &[], UpscaleSettings::default())
            .await;
        assert!(matches!(result, Err(OrchestratorError::InvalidPlan(_))));
    }

    #[tokio::test]
    async fn abandoned_caller_still_completes_the_batch() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(
            Setup {
                directory: Some(Arc::new(FsDirectory::new(dir.path()))),
                delay: Some(Duration::from_millis(100)),
                ..Setup::default()
            },
            Vec::new(),
        );

        let abandoned = tokio::time::timeout(
            Duration::from_millis(30),
            h.orchestrator
                .start_generate_batch(generate_plan(&["sdxl"], 2)),
        )
        .await;
        assert!(abandoned.is_err());

        let mut rx = h.orchestrator.subscribe(JobKind::Generate);
        tokio::time::timeout(
            Duration::from_secs(5),
            rx.wait_for(|snapshot| snapshot.state != LifecycleState::Running),
        )
        .await??;

        let snapshot = h.orchestrator.snapshot(JobKind::Generate);
        assert_eq!(snapshot.state, LifecycleState::Done);
        assert_eq!((snapshot.current(), snapshot.total()), (2, 2));
        assert_eq!(h.collection.len(), 2);
        assert_eq!(
            h.orchestrator.reset_state(JobKind::Generate),
            ProgressSnapshot::idle()
        );
        h.orchestrator
            .start_generate_batch(generate_plan(&["sdxl"], 1))
            .await?;
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn finished_batch_returns_to_idle_after_grace() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let h = harness(
            Setup {
                directory: Some(Arc::new(FsDirectory::new(dir.path()))),
                ..Setup::default()
            },
            Vec::new(),
        );
        let mut rx = h.orchestrator.subscribe(JobKind::Generate);

        let summary = h
            .orchestrator
            .start_generate_batch(generate_plan(&["sdxl"], 2))
            .await?;
        assert_eq!(summary.state, LifecycleState::Done);
        assert_eq!(rx.borrow_and_update().state, LifecycleState::Done);
        assert_eq!(
            h.orchestrator.reset_state(JobKind::Upscale),
            ProgressSnapshot::idle()
        );

        tokio::time::sleep(Duration::from_millis(3100)).await;
        assert_eq!(
            h.orchestrator.snapshot(JobKind::Generate),
            ProgressSnapshot::idle()
        );
        Ok(())
    }

    #[tokio::test]
    async fn batch_lifecycle_is_written_to_the_event_log() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let events_path = dir.path().join("events.jsonl");
        let h = harness(
            Setup {
                events: Some(EventWriter::new(&events_path, "batch-test")),
                ..Setup::default()
            },
            vec![item("a.png", 256, 256)?, item("b.png", 1024, 1024)?],
        );

        h.orchestrator
            .start_upscale_batch(
                Dimensions::new(512, 512),
                &providers(&["ai3", "missing"]),
                UpscaleSettings::default(),
            )
            .await?;

        let types = std::fs::read_to_string(&events_path)?
            .lines()
            .map(serde_json::from_str::<Value>)
            .collect::<std::result::Result<Vec<Value>, _>>()?
            .into_iter()
            .filter_map(|event| event["type"].as_str().map(str::to_string))
            .collect::<Vec<String>>();
        assert_eq!(
            types,
            vec![
                "batch_started",
                "pass_completed",
                "item_completed",
                "item_skipped",
                "batch_finished"
            ]
        );
        Ok(())
    }

    #[tokio::test]
    async fn unreachable_local_server_means_no_local_provider() -> Result<()> {
        let source = item("a.png", 512, 512)?;
        let collection = MediaCollection::new([source.clone()]);
        let mut registry = ProviderRegistry::new();
        registry.register(DryrunProvider);
        let orchestrator = Orchestrator::from_parts(OrchestratorParts {
            adapter: ProviderAdapter::new(registry),
            capabilities: CapabilityRegistry::new(
                CapabilityProbe::new(
                    Arc::new(LocalServer { reachable: false }),
                    Duration::from_secs(30),
                ),
                Some("http://127.0.0.1:8000".to_string()),
            ),
            media: Arc::new(collection.clone()),
            directory: None,
            events: None,
            done_grace: Duration::from_millis(3000),
        });

        let summary = orchestrator
            .start_upscale_batch(
                Dimensions::new(1024, 1024),
                &providers(&["ai3", "dryrun"]),
                UpscaleSettings::default(),
            )
            .await?;
        assert_eq!(summary.succeeded, 1);
        let patched = collection.get(&source.id).unwrap_or(source);
        assert_eq!(patched.dimensions(), Dimensions::new(1024, 1024));
        Ok(())
    }
}
