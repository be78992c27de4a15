//! # Design
//!
//! - Keep error messages constant while carrying context fields for debugging.
//! - Validation problems are gathered so operators fix every field in one pass.

use std::fmt;
use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Result alias for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Primary error type for configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// An explicitly requested configuration file does not exist.
    #[error("configuration file not found")]
    FileMissing {
        /// Path that was requested.
        path: PathBuf,
    },
    /// Merging the configuration sources failed.
    #[error("failed to load configuration sources")]
    Load {
        /// Operation identifier.
        operation: &'static str,
        /// Underlying loader error.
        source: config::ConfigError,
    },
    /// One or more fields failed validation.
    #[error("invalid configuration")]
    Invalid {
        /// Every problem found while validating.
        issues: Vec<ConfigIssue>,
    },
    /// The category mapping file could not be read.
    #[error("failed to read type mapping")]
    MappingIo {
        /// Mapping file path.
        path: PathBuf,
        /// Underlying IO error.
        source: io::Error,
    },
    /// The category mapping file is not valid JSON.
    #[error("type mapping is not valid json")]
    MappingParse {
        /// Mapping file path.
        path: PathBuf,
        /// Underlying serde error.
        source: serde_json::Error,
    },
    /// The category mapping file is valid JSON but not an object.
    #[error("type mapping must be a json object")]
    MappingShape {
        /// Mapping file path.
        path: PathBuf,
    },
}

/// A single configuration field that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    /// Configuration key (as written in the file, lower case).
    pub field: &'static str,
    /// Machine-readable reason for the failure.
    pub reason: &'static str,
    /// Offending value when one was supplied.
    pub value: Option<String>,
}

impl ConfigIssue {
    pub(crate) const fn missing(field: &'static str) -> Self {
        Self {
            field,
            reason: "missing",
            value: None,
        }
    }

    pub(crate) fn invalid(field: &'static str, reason: &'static str, value: &str) -> Self {
        Self {
            field,
            reason,
            value: Some(value.to_string()),
        }
    }
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.value {
            Some(value) => write!(f, "{} ({}): {value}", self.field, self.reason),
            None => write!(f, "{} ({})", self.field, self.reason),
        }
    }
}

impl ConfigError {
    pub(crate) const fn load(operation: &'static str, source: config::ConfigError) -> Self {
        Self::Load { operation, source }
    }

    /// Issues carried by an `Invalid` error; empty for other variants.
    #[must_use]
    pub fn issues(&self) -> &[ConfigIssue] {
        match self {
            Self::Invalid { issues } => issues,
            _ => &[],
        }
    }
}
