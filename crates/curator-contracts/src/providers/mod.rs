mod catalog;
mod descriptor;
mod selectors;

pub use catalog::{
    list_static, local_generate_descriptor, local_upscale_descriptor, ProviderCatalog,
    LOCAL_PROVIDER,
};
pub use descriptor::{DescriptorOrigin, FeatureFlags, ProviderDescriptor, ProviderKind};
pub use selectors::{ProviderSelection, ProviderSelector, SkippedProvider};
