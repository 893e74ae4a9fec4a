use curator_contracts::progress::JobKind;
use thiserror::Error;

/// A single provider call that was rejected or could not be completed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{provider} call failed: {reason}")]
pub struct ProviderCallFailure {
    pub provider: String,
    pub reason: String,
}

impl ProviderCallFailure {
    pub fn new(provider: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, OrchestratorError>;

#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("provider endpoint {endpoint} unreachable: {reason}")]
    ProviderUnreachable { endpoint: String, reason: String },

    #[error(transparent)]
    ProviderCall(#[from] ProviderCallFailure),

    #[error("could not decode artifact {file_name}: {source}")]
    Decode {
        file_name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("could not re-encode {file_name}: {source}")]
    Encode {
        file_name: String,
        #[source]
        source: image::ImageError,
    },

    #[error("no destination directory configured")]
    DestinationMissing,

    #[error("failed writing {file_name}: {source}")]
    Write {
        file_name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("a {} batch is already active", .0.as_str())]
    BatchAlreadyRunning(JobKind),

    #[error("invalid plan: {0}")]
    InvalidPlan(String),

    #[error("{} batch aborted: {reason}", .kind.as_str())]
    BatchAborted { kind: JobKind, reason: String },
}

impl OrchestratorError {
    pub fn decode(file_name: impl Into<String>, source: image::ImageError) -> Self {
        Self::Decode {
            file_name: file_name.into(),
            source,
        }
    }

    pub fn encode(file_name: impl Into<String>, source: image::ImageError) -> Self {
        Self::Encode {
            file_name: file_name.into(),
            source,
        }
    }

    pub fn write(file_name: impl Into<String>, source: std::io::Error) -> Self {
        Self::Write {
            file_name: file_name.into(),
            source,
        }
    }
}
