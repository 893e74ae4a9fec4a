use indexmap::IndexMap;

use super::descriptor::{DescriptorOrigin, FeatureFlags, ProviderDescriptor, ProviderKind};

pub const LOCAL_PROVIDER: &str = "ai3";

#[derive(Debug, Clone)]
pub struct ProviderCatalog {
    descriptors: IndexMap<String, ProviderDescriptor>,
}

impl Default for ProviderCatalog {
    fn default() -> Self {
        Self::new(None)
    }
}

impl ProviderCatalog {
    pub fn new(descriptors: Option<IndexMap<String, ProviderDescriptor>>) -> Self {
        Self {
            descriptors: descriptors.unwrap_or_else(static_descriptors),
        }
    }

    pub fn get(&self, id: &str) -> Option<&ProviderDescriptor> {
        self.descriptors.get(id)
    }

    pub fn list(&self) -> impl Iterator<Item = &ProviderDescriptor> {
        self.descriptors.values()
    }

    pub fn by_kind(&self, kind: ProviderKind) -> Vec<ProviderDescriptor> {
        self.descriptors
            .values()
            .filter(|descriptor| descriptor.is(kind))
            .cloned()
            .collect()
    }

    pub fn ensure(&self, id: &str, kind: ProviderKind) -> Option<ProviderDescriptor> {
        let descriptor = self.get(id)?;
        if descriptor.is(kind) {
            return Some(descriptor.clone());
        }
        None
    }

    /// Adds probed descriptors, replacing any entry with the same id.
    pub fn extend(&mut self, descriptors: impl IntoIterator<Item = ProviderDescriptor>) {
        for descriptor in descriptors {
            self.descriptors.insert(descriptor.id.clone(), descriptor);
        }
    }
}

/// The fixed table of cloud and offline backends. Local server descriptors are
/// never listed here; they only exist after a successful probe.
pub fn list_static(kind: ProviderKind) -> Vec<ProviderDescriptor> {
    static_descriptors()
        .into_values()
        .filter(|descriptor| descriptor.is(kind))
        .collect()
}

fn static_descriptors() -> IndexMap<String, ProviderDescriptor> {
    let mut map = IndexMap::new();

    let mut insert = |id: &str,
                      provider: &str,
                      model: &str,
                      kind: ProviderKind,
                      label: &str,
                      features: FeatureFlags,
                      default_steps: Option<u32>,
                      scale: Option<u32>| {
        map.insert(
            id.to_string(),
            ProviderDescriptor {
                id: id.to_string(),
                provider: provider.to_string(),
                model: model.to_string(),
                kind,
                label: label.to_string(),
                features,
                default_steps,
                scale,
                origin: DescriptorOrigin::Static,
            },
        );
    };

    insert(
        "stability",
        "stability",
        "fast",
        ProviderKind::Upscale,
        "Stability fast upscale",
        FeatureFlags::default(),
        None,
        Some(4),
    );
    insert(
        "replicate",
        "replicate",
        "nightmareai/real-esrgan",
        ProviderKind::Upscale,
        "Replicate Real-ESRGAN",
        FeatureFlags::default(),
        None,
        Some(4),
    );
    insert(
        "dryrun",
        "dryrun",
        "dryrun-upscale",
        ProviderKind::Upscale,
        "Offline 2x upscale",
        FeatureFlags::default(),
        None,
        Some(2),
    );
    insert(
        "stability-core",
        "stability",
        "core",
        ProviderKind::Generate,
        "Stable Image Core",
        FeatureFlags {
            prompt: true,
            negative_prompt: true,
            aspect_ratio: true,
            seed: true,
            ..FeatureFlags::default()
        },
        None,
        None,
    );
    insert(
        "sd3-large",
        "stability",
        "sd3-large",
        ProviderKind::Generate,
        "Stable Diffusion 3 Large",
        FeatureFlags {
            prompt: true,
            negative_prompt: true,
            aspect_ratio: true,
            seed: true,
            ..FeatureFlags::default()
        },
        None,
        None,
    );
    insert(
        "replicate-sdxl",
        "replicate",
        "stability-ai/sdxl",
        ProviderKind::Generate,
        "SDXL (Replicate)",
        FeatureFlags {
            prompt: true,
            negative_prompt: true,
            dimensions: true,
            seed: true,
            steps: true,
            guidance: true,
            ..FeatureFlags::default()
        },
        Some(30),
        None,
    );
    insert(
        "dryrun-image",
        "dryrun",
        "dryrun-image",
        ProviderKind::Generate,
        "Offline solid-color image",
        FeatureFlags {
            prompt: true,
            dimensions: true,
            seed: true,
            ..FeatureFlags::default()
        },
        None,
        None,
    );

    map
}

/// Descriptor for the local server's upscaler at the given fixed scale.
pub fn local_upscale_descriptor(scale: u32) -> ProviderDescriptor {
    ProviderDescriptor {
        id: LOCAL_PROVIDER.to_string(),
        provider: LOCAL_PROVIDER.to_string(),
        model: format!("realesrgan-x{scale}plus"),
        kind: ProviderKind::Upscale,
        label: format!("Local Real-ESRGAN {scale}x"),
        features: FeatureFlags {
            prompt: true,
            negative_prompt: true,
            seed: true,
            steps: true,
            guidance: true,
            ..FeatureFlags::default()
        },
        default_steps: None,
        scale: Some(scale),
        origin: DescriptorOrigin::Probed,
    }
}

/// Descriptor for a generation model reported by the local server. Unknown
/// models get the conservative prompt/dimensions/seed set.
pub fn local_generate_descriptor(model: &str) -> ProviderDescriptor {
    let base = FeatureFlags {
        prompt: true,
        dimensions: true,
        seed: true,
        ..FeatureFlags::default()
    };
    let (label, features, default_steps) = match model {
        "sdxl" => (
            "SDXL (local)",
            FeatureFlags {
                negative_prompt: true,
                steps: true,
                guidance: true,
                ..base
            },
            Some(30),
        ),
        "flux" => (
            "FLUX.1 schnell (local)",
            FeatureFlags {
                steps: true,
                ..base
            },
            Some(4),
        ),
        "flux2" => (
            "FLUX.2 dev (local)",
            FeatureFlags {
                steps: true,
                guidance: true,
                ..base
            },
            Some(28),
        ),
        "zimage-turbo" => ("Z-Image Turbo (local)", base, Some(9)),
        _ => (model, base, None),
    };
    ProviderDescriptor {
        id: model.to_string(),
        provider: LOCAL_PROVIDER.to_string(),
        model: model.to_string(),
        kind: ProviderKind::Generate,
        label: label.to_string(),
        features,
        default_steps,
        scale: None,
        origin: DescriptorOrigin::Probed,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn static_table_has_no_local_descriptors() {
        let catalog = ProviderCatalog::default();
        assert!(catalog
            .list()
            .all(|descriptor| descriptor.provider != LOCAL_PROVIDER));
        assert!(catalog
            .list()
            .all(|descriptor| descriptor.origin == DescriptorOrigin::Static));
    }

    #[test]
    fn list_static_filters_by_kind_in_table_order() {
        let ids = list_static(ProviderKind::Upscale)
            .into_iter()
            .map(|descriptor| descriptor.id)
            .collect::<Vec<String>>();
        assert_eq!(ids, vec!["stability", "replicate", "dryrun"]);
        assert!(list_static(ProviderKind::Generate)
            .iter()
            .all(|descriptor| descriptor.scale.is_none()));
    }

    #[test]
    fn ensure_rejects_kind_mismatch() {
        let catalog = ProviderCatalog::default();
        assert!(catalog.ensure("stability", ProviderKind::Upscale).is_some());
        assert!(catalog.ensure("stability", ProviderKind::Generate).is_none());
        assert!(catalog.ensure("missing", ProviderKind::Upscale).is_none());
    }

    #[test]
    fn extend_replaces_existing_ids() {
        let mut catalog = ProviderCatalog::default();
        catalog.extend([local_upscale_descriptor(2), local_generate_descriptor("sdxl")]);
        assert_eq!(
            catalog.get(LOCAL_PROVIDER).and_then(|d| d.scale),
            Some(2)
        );

        catalog.extend([local_upscale_descriptor(4)]);
        assert_eq!(
            catalog.get(LOCAL_PROVIDER).and_then(|d| d.scale),
            Some(4)
        );
        assert_eq!(catalog.by_kind(ProviderKind::Upscale).len(), 4);
    }

    #[test]
    fn local_models_declare_their_own_flags() {
        let sdxl = local_generate_descriptor("sdxl");
        assert!(sdxl.features.negative_prompt);
        assert!(sdxl.features.guidance);

        let flux = local_generate_descriptor("flux");
        assert!(!flux.features.negative_prompt);
        assert!(!flux.features.guidance);
        assert_eq!(flux.default_steps, Some(4));

        let turbo = local_generate_descriptor("zimage-turbo");
        assert!(!turbo.features.steps);

        let unknown = local_generate_descriptor("mystery");
        assert_eq!(unknown.label, "mystery");
        assert!(unknown.features.dimensions);
    }
}
