use super::catalog::ProviderCatalog;
use super::descriptor::{ProviderDescriptor, ProviderKind};

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ProviderSelection {
    pub resolved: Vec<ProviderDescriptor>,
    pub skipped: Vec<SkippedProvider>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedProvider {
    pub id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct ProviderSelector<'a> {
    catalog: &'a ProviderCatalog,
}

impl<'a> ProviderSelector<'a> {
    pub fn new(catalog: &'a ProviderCatalog) -> Self {
        Self { catalog }
    }

    /// Resolves the caller's enabled list, keeping its order. Ids the catalogue
    /// does not know for `kind` are skipped with a reason, as are duplicates.
    pub fn resolve_order(&self, requested: &[String], kind: ProviderKind) -> ProviderSelection {
        let mut selection = ProviderSelection::default();
        for id in requested {
            let id = id.trim();
            if id.is_empty() {
                continue;
            }
            if selection.resolved.iter().any(|existing| existing.id == id) {
                selection.skipped.push(SkippedProvider {
                    id: id.to_string(),
                    reason: format!("Provider '{id}' listed more than once."),
                });
                continue;
            }
            match self.select(id, kind) {
                Ok(descriptor) => selection.resolved.push(descriptor),
                Err(reason) => selection.skipped.push(SkippedProvider {
                    id: id.to_string(),
                    reason,
                }),
            }
        }
        selection
    }

    pub fn select(&self, id: &str, kind: ProviderKind) -> Result<ProviderDescriptor, String> {
        if let Some(descriptor) = self.catalog.ensure(id, kind) {
            return Ok(descriptor);
        }
        if self.catalog.get(id).is_some() {
            return Err(format!(
                "Provider '{id}' does not support '{}'.",
                kind.as_str()
            ));
        }
        Err(format!("Provider '{id}' unavailable."))
    }
}
