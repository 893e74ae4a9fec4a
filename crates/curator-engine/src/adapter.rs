use tracing::debug;

use crate::error::ProviderCallFailure;
use crate::providers::{error_chain_text, ArtifactBlob, ProviderOperation, ProviderRegistry};

const MAX_REASON_CHARS: usize = 512;

/// Uniform entry point for provider calls. Stateless and without retries:
/// every outcome, including transport errors and unusable bodies, comes back
/// as a value.
#[derive(Debug)]
pub struct ProviderAdapter {
    providers: ProviderRegistry,
}

impl ProviderAdapter {
    pub fn new(providers: ProviderRegistry) -> Self {
        Self { providers }
    }

    pub fn providers(&self) -> &ProviderRegistry {
        &self.providers
    }

    pub async fn invoke(
        &self,
        provider: &str,
        operation: &ProviderOperation,
    ) -> Result<ArtifactBlob, ProviderCallFailure> {
        let Some(backend) = self.providers.get(provider) else {
            return Err(ProviderCallFailure::new(
                provider,
                format!("provider '{provider}' is not registered"),
            ));
        };
        debug!(provider, operation = operation.name(), "invoking provider");

        let result = match operation {
            ProviderOperation::Upscale(request) => backend.upscale(request).await,
            ProviderOperation::Generate(request) => backend.generate(request).await,
        };
        let blob = result.map_err(|err| {
            ProviderCallFailure::new(provider, error_chain_text(&err, MAX_REASON_CHARS))
        })?;

        if blob.bytes.is_empty() {
            return Err(ProviderCallFailure::new(provider, "empty response body"));
        }
        if blob.format().is_none() {
            return Err(ProviderCallFailure::new(
                provider,
                format!(
                    "response is not a recognized image ({})",
                    blob.mime_type.as_deref().unwrap_or("unknown content type")
                ),
            ));
        }
        Ok(blob)
    }
}
