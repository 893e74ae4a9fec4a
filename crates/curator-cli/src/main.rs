use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use curator_contracts::events::EventWriter;
use curator_contracts::media::{MediaCollection, MediaItem, MediaStore};
use curator_contracts::plans::{
    parse_positive_f64, parse_positive_u32, parse_positive_u64, Dimensions, GenerateJobPlan,
    GenerateSettings, RawGenerateSettings, UpscaleSettings,
};
use curator_contracts::progress::{JobKind, LifecycleState, ProgressSnapshot};
use curator_contracts::providers::{ProviderDescriptor, ProviderKind};
use curator_contracts::runs::summary::{write_summary, BatchSummary};
use curator_engine::{CuratorConfig, Directory, FsDirectory, Orchestrator, ProbeOutcome};
use serde_json::{json, Map, Value};
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const IMAGE_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg", "webp", "bmp", "gif", "tif", "tiff"];

#[derive(Debug, Parser)]
#[command(name = "curator", version, about = "Batch upscaling and generation for image datasets")]
struct Cli {
    /// TOML settings file.
    #[arg(long, global = true, env = "CURATOR_CONFIG")]
    config: Option<PathBuf>,
    /// Local AI server base URL; overrides the config file and environment.
    #[arg(long, global = true)]
    local_endpoint: Option<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// List static providers and whatever the local server reports.
    Providers(ProvidersArgs),
    /// Upscale every image in a folder toward a target resolution.
    Upscale(UpscaleArgs),
    /// Run a model x repeat generation batch into a folder.
    Generate(GenerateArgs),
}

#[derive(Debug, Clone, Copy, ValueEnum)]
enum KindArg {
    Upscale,
    Generate,
}

impl From<KindArg> for ProviderKind {
    fn from(value: KindArg) -> Self {
        match value {
            KindArg::Upscale => ProviderKind::Upscale,
            KindArg::Generate => ProviderKind::Generate,
        }
    }
}

#[derive(Debug, Parser)]
struct ProvidersArgs {
    #[arg(long, value_enum)]
    kind: Option<KindArg>,
    /// Drop any cached probe result first.
    #[arg(long)]
    refresh: bool,
    #[arg(long)]
    json: bool,
}

#[derive(Debug, Parser)]
struct OutputArgs {
    /// Append lifecycle events to this file (default: <dir>/events.jsonl).
    #[arg(long)]
    events: Option<PathBuf>,
    /// Where to write the batch summary (default: <dir>/summary.json).
    #[arg(long)]
    summary: Option<PathBuf>,
}

#[derive(Debug, Parser)]
struct UpscaleArgs {
    /// Folder holding the dataset images; results are written back in place.
    #[arg(long)]
    dir: PathBuf,
    /// Target resolution as WIDTHxHEIGHT.
    #[arg(long, value_parser = parse_dimensions)]
    target: Dimensions,
    /// Enabled providers in priority order (default from config).
    #[arg(long, value_delimiter = ',')]
    providers: Vec<String>,
    /// Keep results in memory only; the folder is not modified.
    #[arg(long)]
    in_memory: bool,
    /// Use the offline dryrun provider only.
    #[arg(long)]
    dryrun: bool,
    #[arg(long)]
    prompt: Option<String>,
    #[arg(long)]
    negative_prompt: Option<String>,
    #[arg(long, default_value = "")]
    seed: String,
    #[arg(long, default_value = "")]
    steps: String,
    #[arg(long, default_value = "")]
    guidance: String,
    #[command(flatten)]
    output: OutputArgs,
}

#[derive(Debug, Parser)]
struct GenerateArgs {
    /// Destination folder. Required; the batch refuses to run without one.
    #[arg(long)]
    out: Option<PathBuf>,
    /// Model ids in execution order.
    #[arg(long = "model", value_delimiter = ',')]
    models: Vec<String>,
    #[arg(long, default_value_t = 1)]
    repeat: u32,
    #[arg(long)]
    prompt: String,
    #[arg(long, default_value = "")]
    negative_prompt: String,
    #[arg(long, default_value = "")]
    width: String,
    #[arg(long, default_value = "")]
    height: String,
    #[arg(long, default_value = "")]
    aspect_ratio: String,
    /// Base seed; job n of a model uses seed + n. Zero leaves seeding to the provider.
    #[arg(long, default_value = "")]
    seed: String,
    #[arg(long, default_value = "")]
    steps: String,
    #[arg(long, default_value = "")]
    guidance: String,
    /// Use the offline dryrun model only.
    #[arg(long)]
    dryrun: bool,
    #[command(flatten)]
    output: OutputArgs,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "curator=info,curator_engine=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    match run().await {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("curator error: {err:#}");
            std::process::exit(1);
        }
    }
}

async fn run() -> Result<i32> {
    let cli = Cli::parse();
    let mut config = CuratorConfig::load(cli.config.as_deref())?;
    if let Some(endpoint) = cli.local_endpoint.as_deref() {
        config.local_endpoint = endpoint.trim().trim_end_matches('/').to_string();
    }
    match cli.command {
        Command::Providers(args) => run_providers(&config, args).await,
        Command::Upscale(args) => run_upscale(&config, args).await,
        Command::Generate(args) => run_generate(&config, args).await,
    }
}

async fn run_providers(config: &CuratorConfig, args: ProvidersArgs) -> Result<i32> {
    let orchestrator = Orchestrator::new(config, Arc::new(MediaCollection::default()), None, None)?;
    let capabilities = orchestrator.capabilities();
    if args.refresh {
        capabilities.invalidate();
    }
    let probe = capabilities.probe(&config.local_endpoint).await;
    let catalog = capabilities.catalog().await;
    let descriptors = catalog
        .list()
        .filter(|descriptor| {
            args.kind
                .map(|kind| descriptor.is(kind.into()))
                .unwrap_or(true)
        })
        .cloned()
        .collect::<Vec<ProviderDescriptor>>();

    if args.json {
        let local = match &probe {
            ProbeOutcome::Available(local) => json!({
                "available": true,
                "device": local.device,
                "gpu_memory_gb": local.gpu_memory_gb,
            }),
            ProbeOutcome::Unavailable { reason } => json!({
                "available": false,
                "reason": reason,
            }),
        };
        let payload = json!({ "local": local, "providers": descriptors });
        println!("{}", serde_json::to_string_pretty(&payload)?);
        return Ok(0);
    }

    match &probe {
        ProbeOutcome::Available(local) => println!(
            "local server {}: {} ({:.1} GB)",
            config.local_endpoint, local.device, local.gpu_memory_gb
        ),
        ProbeOutcome::Unavailable { reason } => {
            println!("local server {}: unavailable ({reason})", config.local_endpoint)
        }
    }
    for descriptor in &descriptors {
        println!("{}", describe_provider(descriptor));
    }
    Ok(0)
}

async fn run_upscale(config: &CuratorConfig, args: UpscaleArgs) -> Result<i32> {
    let items = load_folder(&args.dir)?;
    if items.is_empty() {
        bail!("no images found in {}", args.dir.display());
    }
    info!(count = items.len(), dir = %args.dir.display(), "dataset loaded");

    let collection = MediaCollection::new(items);
    let directory: Option<Arc<dyn Directory>> = if args.in_memory {
        None
    } else {
        Some(Arc::new(FsDirectory::new(&args.dir)))
    };
    let events = EventWriter::new(
        args.output
            .events
            .clone()
            .unwrap_or_else(|| args.dir.join("events.jsonl")),
        format!("upscale-{}", compact_timestamp()),
    );
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(collection.clone()),
        directory,
        Some(events),
    )?;

    let providers = if args.dryrun {
        vec!["dryrun".to_string()]
    } else if args.providers.is_empty() {
        config.upscale_providers.clone()
    } else {
        args.providers.clone()
    };
    let settings = UpscaleSettings {
        prompt: non_empty(args.prompt.as_deref()),
        negative_prompt: non_empty(args.negative_prompt.as_deref()),
        seed: parse_positive_u64(&args.seed),
        steps: parse_positive_u32(&args.steps),
        guidance: parse_positive_f64(&args.guidance),
    };

    let watcher = spawn_progress_renderer(orchestrator.subscribe(JobKind::Upscale));
    let interrupt = spawn_interrupt_handler(orchestrator.clone());
    let result = orchestrator
        .start_upscale_batch(args.target, &providers, settings)
        .await;
    interrupt.abort();
    watcher.abort();
    eprintln!();
    let summary = result?;

    let summary_path = args
        .output
        .summary
        .clone()
        .unwrap_or_else(|| args.dir.join("summary.json"));
    let mut extra = Map::new();
    extra.insert("target".to_string(), Value::String(args.target.to_string()));
    extra.insert("providers".to_string(), json!(providers));
    extra.insert(
        "items".to_string(),
        Value::Array(collection.snapshot().iter().map(item_record).collect()),
    );
    finish_summary(&summary_path, &summary, extra)
}

async fn run_generate(config: &CuratorConfig, args: GenerateArgs) -> Result<i32> {
    let collection = MediaCollection::default();
    let directory = args
        .out
        .as_ref()
        .map(|out| Arc::new(FsDirectory::new(out)) as Arc<dyn Directory>);
    let events = args.out.as_ref().map(|out| {
        EventWriter::new(
            args.output
                .events
                .clone()
                .unwrap_or_else(|| out.join("events.jsonl")),
            format!("generate-{}", compact_timestamp()),
        )
    });
    let orchestrator = Orchestrator::new(config, Arc::new(collection.clone()), directory, events)?;

    let models = if args.dryrun {
        vec!["dryrun-image".to_string()]
    } else {
        args.models.clone()
    };
    let plan = GenerateJobPlan {
        models,
        settings: GenerateSettings::parse(&RawGenerateSettings {
            prompt: args.prompt.clone(),
            negative_prompt: args.negative_prompt.clone(),
            width: args.width.clone(),
            height: args.height.clone(),
            aspect_ratio: args.aspect_ratio.clone(),
            seed: args.seed.clone(),
            steps: args.steps.clone(),
            guidance: args.guidance.clone(),
        }),
        repeat: args.repeat,
    };

    let watcher = spawn_progress_renderer(orchestrator.subscribe(JobKind::Generate));
    let interrupt = spawn_interrupt_handler(orchestrator.clone());
    let result = orchestrator.start_generate_batch(plan.clone()).await;
    interrupt.abort();
    watcher.abort();
    eprintln!();
    let summary = result?;

    let Some(out) = args.out.as_ref() else {
        bail!("generation finished without a destination folder");
    };
    let summary_path = args
        .output
        .summary
        .clone()
        .unwrap_or_else(|| out.join("summary.json"));
    let mut extra = Map::new();
    extra.insert("models".to_string(), json!(plan.models));
    extra.insert("repeat".to_string(), json!(plan.repeat));
    extra.insert("prompt".to_string(), Value::String(plan.settings.prompt.clone()));
    extra.insert(
        "items".to_string(),
        Value::Array(collection.snapshot().iter().map(item_record).collect()),
    );
    finish_summary(&summary_path, &summary, extra)
}

fn finish_summary(path: &Path, summary: &BatchSummary, extra: Map<String, Value>) -> Result<i32> {
    write_summary(path, summary, Some(&extra))
        .with_context(|| format!("failed writing {}", path.display()))?;
    println!(
        "{} batch {}: {} succeeded, {} failed, {} skipped of {} ({})",
        summary.kind.as_str(),
        state_label(summary.state),
        summary.succeeded,
        summary.failed,
        summary.skipped,
        summary.total,
        path.display()
    );
    if summary.state == LifecycleState::Cancelled {
        return Ok(130);
    }
    Ok(0)
}

fn spawn_progress_renderer(
    mut rx: watch::Receiver<ProgressSnapshot>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while rx.changed().await.is_ok() {
            let line = render_progress(&rx.borrow_and_update());
            let mut stderr = io::stderr();
            let _ = write!(stderr, "\r{line:<60}");
            let _ = stderr.flush();
        }
    })
}

fn spawn_interrupt_handler(orchestrator: Orchestrator) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; cancelling after the current item");
            orchestrator.cancel();
        }
    })
}

fn render_progress(snapshot: &ProgressSnapshot) -> String {
    let label = state_label(snapshot.state);
    match &snapshot.progress {
        Some(progress) => match progress.current_model.as_deref() {
            Some(model) => format!("[{label}] {}/{} {model}", progress.current, progress.total),
            None => format!("[{label}] {}/{}", progress.current, progress.total),
        },
        None => format!("[{label}]"),
    }
}

fn state_label(state: LifecycleState) -> &'static str {
    match state {
        LifecycleState::Idle => "idle",
        LifecycleState::Running => "running",
        LifecycleState::Done => "done",
        LifecycleState::Cancelled => "cancelled",
    }
}

fn describe_provider(descriptor: &ProviderDescriptor) -> String {
    let mut line = format!(
        "{:<9} {:<16} {:<28} {}",
        descriptor.kind.as_str(),
        descriptor.id,
        descriptor.model,
        descriptor.label
    );
    if let Some(scale) = descriptor.scale {
        line.push_str(&format!(" [{scale}x]"));
    }
    if let Some(steps) = descriptor.default_steps {
        line.push_str(&format!(" [steps {steps}]"));
    }
    line
}

/// Reads every image file directly inside `dir`, sorted by name. Files whose
/// header cannot be read are kept with unknown dimensions.
fn load_folder(dir: &Path) -> Result<Vec<MediaItem>> {
    let mut paths = fs::read_dir(dir)
        .with_context(|| format!("failed reading {}", dir.display()))?
        .filter_map(|entry| entry.ok().map(|entry| entry.path()))
        .filter(|path| path.is_file() && has_image_extension(path))
        .collect::<Vec<PathBuf>>();
    paths.sort();

    let mut items = Vec::with_capacity(paths.len());
    for path in paths {
        let Some(file_name) = path.file_name().and_then(|name| name.to_str()) else {
            continue;
        };
        let bytes = fs::read(&path).with_context(|| format!("failed reading {}", path.display()))?;
        let (width, height) = match image::image_dimensions(&path) {
            Ok(dimensions) => dimensions,
            Err(err) => {
                warn!(path = %path.display(), error = %err, "could not read image header");
                (0, 0)
            }
        };
        items.push(MediaItem::from_content(file_name, bytes, width, height));
    }
    Ok(items)
}

fn has_image_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| IMAGE_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

fn item_record(item: &MediaItem) -> Value {
    json!({
        "id": item.id,
        "file_name": item.file_name,
        "width": item.width,
        "height": item.height,
        "caption": item.caption,
    })
}

fn parse_dimensions(raw: &str) -> std::result::Result<Dimensions, String> {
    Dimensions::parse(raw).ok_or_else(|| format!("expected WIDTHxHEIGHT, got '{raw}'"))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

fn compact_timestamp() -> String {
    Utc::now().timestamp_millis().to_string()
}
