//! Category code to destination directory mapping file.
//!
//! The file is a flat JSON object, e.g. `{"TV": "/media/tv", "MOV": "movies"}`.
//! Relative directories are joined onto the configured destination base.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::{ConfigError, ConfigResult};

/// Immutable category code to directory table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TypeMapping {
    entries: HashMap<String, PathBuf>,
}

impl TypeMapping {
    /// Build a mapping from already-resolved entries.
    #[must_use]
    pub const fn new(entries: HashMap<String, PathBuf>) -> Self {
        Self { entries }
    }

    /// Number of category codes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the mapping holds no codes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Borrow the underlying table.
    #[must_use]
    pub const fn entries(&self) -> &HashMap<String, PathBuf> {
        &self.entries
    }

    /// Consume the mapping into its table.
    #[must_use]
    pub fn into_entries(self) -> HashMap<String, PathBuf> {
        self.entries
    }
}

/// Load the mapping file, joining relative directories onto `base` when given.
///
/// Entries whose value is not a string are skipped with a warning.
///
/// # Errors
///
/// Returns an error when the file cannot be read, is not valid JSON, or is
/// not a JSON object.
pub fn load_type_mapping(path: &Path, base: Option<&Path>) -> ConfigResult<TypeMapping> {
    let contents = fs::read_to_string(path).map_err(|source| ConfigError::MappingIo {
        path: path.to_path_buf(),
        source,
    })?;
    let value: Value =
        serde_json::from_str(&contents).map_err(|source| ConfigError::MappingParse {
            path: path.to_path_buf(),
            source,
        })?;
    let Value::Object(object) = value else {
        return Err(ConfigError::MappingShape {
            path: path.to_path_buf(),
        });
    };

    let mut entries = HashMap::with_capacity(object.len());
    for (code, directory) in object {
        let Value::String(directory) = directory else {
            warn!(code = %code, value = %directory, "Skipping type mapping entry with non-string directory");
            continue;
        };
        let directory = PathBuf::from(directory);
        let directory = match base {
            Some(base) if directory.is_relative() => base.join(directory),
            _ => directory,
        };
        debug!(code = %code, directory = %directory.display(), "Type mapping entry");
        entries.insert(code, directory);
    }

    info!(path = %path.display(), codes = entries.len(), "Loaded type mapping");
    Ok(TypeMapping::new(entries))
}
