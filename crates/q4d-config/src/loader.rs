//! Layered configuration loading.
//!
//! # Design
//! - Sources merge in order: TOML file, then `Q4D_*` environment variables.
//! - An explicitly requested file must exist; the default file is optional.
//! - Everything is read as text and validated in one pass by `validate.rs`.

use std::path::Path;

use config::{Config, Environment, File, FileFormat, Map};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::model::{ClientConfig, RawClientConfig};
use crate::validate::validate;

/// Prefix shared by every environment override (`Q4D_BUS_HOST`, `Q4D_THREADS`, ...).
pub const CONFIG_ENV_PREFIX: &str = "Q4D";

/// File consulted when no explicit path is supplied.
pub const DEFAULT_CONFIG_FILE: &str = "q4d.toml";

/// Load configuration from the optional file and the process environment.
///
/// # Errors
///
/// Returns an error when the requested file is missing or unreadable, or
/// when any field fails validation.
pub fn load_config(path: Option<&Path>) -> ConfigResult<ClientConfig> {
    load_config_with_env(path, None)
}

/// Load configuration using an explicit environment map instead of the process environment.
///
/// Passing `None` reads the real process environment.
///
/// # Errors
///
/// Returns an error when the requested file is missing or unreadable, or
/// when any field fails validation.
pub fn load_config_with_env(
    path: Option<&Path>,
    env: Option<Map<String, String>>,
) -> ConfigResult<ClientConfig> {
    let mut builder = Config::builder();

    if let Some(path) = path {
        if !path.exists() {
            return Err(ConfigError::FileMissing {
                path: path.to_path_buf(),
            });
        }
        debug!(path = %path.display(), "Reading configuration file");
        builder = builder.add_source(File::from(path).format(FileFormat::Toml));
    } else {
        builder =
            builder.add_source(File::new(DEFAULT_CONFIG_FILE, FileFormat::Toml).required(false));
    }

    builder = builder.add_source(Environment::with_prefix(CONFIG_ENV_PREFIX).source(env));

    let raw: RawClientConfig = builder
        .build()
        .map_err(|err| ConfigError::load("config.build", err))?
        .try_deserialize()
        .map_err(|err| ConfigError::load("config.deserialize", err))?;

    validate(raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error;
    use std::fs;
    use std::num::NonZeroU32;
    use std::path::PathBuf;

    const SAMPLE: &str = r#"
bus_host = "broker.lan"
bus_port = 8883
user = "q4d"
pw = "secret"
host = "seedbox.example.net"
creds = "me:hunter2"
threads = 6
segments = 3
labelling = true
default_destination = "/media/unsorted"
"#;

    fn env(pairs: &[(&str, &str)]) -> Map<String, String> {
        pairs
            .iter()
            .map(|(key, value)| ((*key).to_string(), (*value).to_string()))
            .collect()
    }

    #[test]
    fn file_values_are_loaded() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("q4d.toml");
        fs::write(&path, SAMPLE)?;

        let config = load_config_with_env(Some(&path), Some(Map::new()))?;
        assert_eq!(config.bus.host, "broker.lan");
        assert_eq!(config.bus.port, 8883);
        assert_eq!(config.transfer.threads, NonZeroU32::new(6).ok_or("zero")?);
        assert_eq!(config.dispatch.workers.get(), 6);
        assert!(config.labels.enabled);
        assert_eq!(
            config.destinations.default,
            Some(PathBuf::from("/media/unsorted"))
        );
        Ok(())
    }

    #[test]
    fn environment_overrides_file() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("q4d.toml");
        fs::write(&path, SAMPLE)?;

        let overrides = env(&[
            ("Q4D_BUS_HOST", "mqtt.internal"),
            ("Q4D_THREADS", "2"),
            ("Q4D_LABELLING", "off"),
            ("Q4D_JOB_TIMEOUT_SECS", "600"),
        ]);
        let config = load_config_with_env(Some(&path), Some(overrides))?;
        assert_eq!(config.bus.host, "mqtt.internal");
        assert_eq!(config.transfer.threads.get(), 2);
        assert!(!config.labels.enabled);
        assert_eq!(
            config.transfer.job_timeout,
            Some(std::time::Duration::from_secs(600))
        );
        Ok(())
    }

    #[test]
    fn environment_alone_is_sufficient() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("empty.toml");
        fs::write(&path, "")?;
        let overrides = env(&[
            ("Q4D_BUS_HOST", "broker"),
            ("Q4D_USER", "u"),
            ("Q4D_PW", "p"),
            ("Q4D_HOST", "seedbox"),
            ("Q4D_CREDS", "u:p"),
        ]);
        let config = load_config_with_env(Some(&path), Some(overrides))?;
        assert_eq!(config.bus.port, 1883);
        assert_eq!(config.transfer.host, "seedbox");
        Ok(())
    }

    #[test]
    fn missing_explicit_file_is_an_error() {
        let result = load_config_with_env(
            Some(Path::new("/definitely/not/here/q4d.toml")),
            Some(Map::new()),
        );
        assert!(matches!(result, Err(ConfigError::FileMissing { .. })));
    }

    #[test]
    fn invalid_values_surface_as_issues() -> Result<(), Box<dyn Error>> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("q4d.toml");
        fs::write(&path, SAMPLE)?;
        let overrides = env(&[("Q4D_BUS_PORT", "0"), ("Q4D_SEGMENTS", "-1")]);
        let Err(err) = load_config_with_env(Some(&path), Some(overrides)) else {
            return Err("expected validation failure".into());
        };
        let fields: Vec<_> = err.issues().iter().map(|issue| issue.field).collect();
        assert_eq!(fields, vec!["bus_port", "segments"]);
        Ok(())
    }
}
