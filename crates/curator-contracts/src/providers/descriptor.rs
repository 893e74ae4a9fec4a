use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Upscale,
    Generate,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upscale => "upscale",
            Self::Generate => "generate",
        }
    }
}

/// Where a descriptor came from. Probed descriptors are only as fresh as the
/// last capability query against the local server.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DescriptorOrigin {
    Static,
    Probed,
}

/// Declared per-backend parameter support. A caller-level value is forwarded to
/// the provider only when the matching flag is set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeatureFlags {
    pub prompt: bool,
    pub negative_prompt: bool,
    pub dimensions: bool,
    pub aspect_ratio: bool,
    pub seed: bool,
    pub steps: bool,
    pub guidance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    /// Identifier used in user configuration (enabled upscale order, selected models).
    pub id: String,
    /// Backend that serves this descriptor, e.g. `ai3`, `stability`.
    pub provider: String,
    /// Model name handed to the backend.
    pub model: String,
    pub kind: ProviderKind,
    pub label: String,
    pub features: FeatureFlags,
    pub default_steps: Option<u32>,
    /// Fixed resolution multiplier; upscale descriptors only.
    pub scale: Option<u32>,
    pub origin: DescriptorOrigin,
}

impl ProviderDescriptor {
    pub fn is(&self, kind: ProviderKind) -> bool {
        self.kind == kind
    }

    pub fn upscale_factor(&self) -> u32 {
        self.scale.unwrap_or(1)
    }
}
