//! Core domain entities, rules, and traits for the provisioning database.

mod category;
mod database;
mod folders;

use thiserror::Error;

pub use category::Category;
pub use database::{Database, FolderMeta, Item, DEFAULT_MAX_PARALLEL_DOWNLOADS};
pub use folders::{FolderNode, FolderState};

/// Result type for core operations.
pub type CoreResult<T> = Result<T, CoreError>;

/// Errors returned by core validation and domain rules.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Returned when a validation rule is violated.
    #[error("validation error: {0}")]
    Validation(String),
    /// Returned when repository operations fail.
    #[error("storage error: {0}")]
    Storage(String),
    /// Returned when a named resource does not exist.
    #[error("not found: {0}")]
    NotFound(String),
    /// Returned when an external tool or service reports a failure.
    #[error("external error: {0}")]
    External(String),
}

/// Source of best-effort display names for item URLs.
pub trait NameResolver {
    /// Derive a display name for `url`, or `None` when nothing usable is known.
    fn resolve(&self, url: &str) -> Option<String>;
}

/// Resolver that never produces a name, for offline use.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoNames;

impl NameResolver for NoNames {
    fn resolve(&self, _url: &str) -> Option<String> {
        None
    }
}

impl<R: NameResolver + ?Sized> NameResolver for &R {
    fn resolve(&self, url: &str) -> Option<String> {
        (**self).resolve(url)
    }
}

/// Named store of generated scripts.
pub trait PresetRepository {
    /// List the available preset ids.
    fn list(&self) -> CoreResult<Vec<String>>;
    /// Read a preset by id, `None` when it does not exist.
    fn read(&self, id: &str) -> CoreResult<Option<String>>;
    /// Create or overwrite a preset.
    fn write(&self, id: &str, text: &str) -> CoreResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_names_resolves_nothing() {
        assert_eq!(NoNames.resolve("https://host/a.safetensors"), None);
        let by_ref: &dyn NameResolver = &NoNames;
        assert_eq!(by_ref.resolve("x"), None);
    }
}
