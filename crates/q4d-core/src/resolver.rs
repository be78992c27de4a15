//! Category code to destination lookup.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::UnknownCategory;

/// Mapping code used as the default destination when no explicit default is configured.
pub const FALLBACK_CATEGORY: &str = "ERR";

/// Read-only category resolver shared by every worker without locking.
#[derive(Debug, Clone, Default)]
pub struct TypeResolver {
    mapping: HashMap<String, PathBuf>,
    default: Option<PathBuf>,
}

impl TypeResolver {
    /// Build a resolver from a mapping and an optional default destination.
    ///
    /// When `default` is `None` and the mapping has a [`FALLBACK_CATEGORY`]
    /// entry, that entry becomes the default.
    #[must_use]
    pub fn new(mapping: HashMap<String, PathBuf>, default: Option<PathBuf>) -> Self {
        let default = default.or_else(|| mapping.get(FALLBACK_CATEGORY).cloned());
        Self { mapping, default }
    }

    /// Resolve a category code (case-sensitive) to its destination directory.
    ///
    /// # Errors
    ///
    /// Returns [`UnknownCategory`] when the code is unmapped and no default exists.
    pub fn resolve(&self, code: &str) -> Result<&Path, UnknownCategory> {
        if let Some(dir) = self.mapping.get(code) {
            return Ok(dir);
        }
        match &self.default {
            Some(dir) => {
                debug!(code, default = %dir.display(), "Unmapped category; using default destination");
                Ok(dir)
            }
            None => Err(UnknownCategory {
                code: code.to_string(),
            }),
        }
    }

    /// Default destination, if any.
    #[must_use]
    pub fn default_destination(&self) -> Option<&Path> {
        self.default.as_deref()
    }

    /// Number of mapped codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.mapping.len()
    }

    /// Whether no codes are mapped.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.mapping.is_empty()
    }
}
