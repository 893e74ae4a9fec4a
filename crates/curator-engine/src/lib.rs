//! Batch orchestration for multi-provider upscaling and image generation.

pub mod adapter;
pub mod config;
pub mod error;
pub mod generate;
pub mod materialize;
pub mod orchestrator;
pub mod probe;
pub mod progress;
pub mod providers;
pub mod run;
pub mod upscale;

pub use adapter::ProviderAdapter;
pub use config::CuratorConfig;
pub use error::{OrchestratorError, ProviderCallFailure};
pub use materialize::{Directory, FsDirectory, Materializer, WritableFile};
pub use orchestrator::{Orchestrator, OrchestratorParts};
pub use probe::{CapabilityProbe, CapabilityRegistry, ProbeOutcome};
pub use progress::ProgressStore;
