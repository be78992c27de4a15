//! Subscriber installation.
//!
//! # Design
//! - Pretty output on a terminal, JSON lines otherwise (service managers and
//!   log shippers).
//! - `RUST_LOG` replaces the configured filter entirely when set.
//! - The MQTT client library is held at `warn` unless the process runs at
//!   `debug` or `trace`; its per-packet chatter drowns the transfer log.

use std::io::IsTerminal;
use std::str::FromStr;

use once_cell::sync::OnceCell;
use tracing_subscriber::{EnvFilter, Layer, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use crate::error::{Result, TelemetryError};

/// Level used when configuration does not name one.
pub const DEFAULT_LOG_LEVEL: &str = "info";

static BUILD: OnceCell<String> = OnceCell::new();

/// Logging configuration.
#[derive(Debug, Clone)]
pub struct LoggingConfig<'a> {
    /// Base level or filter directives (`info`, `q4d_bus=debug,info`).
    pub level: &'a str,
    /// Output format.
    pub format: LogFormat,
    /// Build identifier attached to the process span.
    pub build_sha: &'a str,
}

impl Default for LoggingConfig<'_> {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL,
            format: LogFormat::infer(),
            build_sha: build_sha(),
        }
    }
}

/// Output format for log lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable single-line output.
    Pretty,
}

impl LogFormat {
    /// Pretty when stdout is a terminal, JSON otherwise.
    #[must_use]
    pub fn infer() -> Self {
        if std::io::stdout().is_terminal() {
            Self::Pretty
        } else {
            Self::Json
        }
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> std::result::Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "pretty" | "text" => Ok(Self::Pretty),
            other => Err(format!("unknown log format `{other}` (expected pretty or json)")),
        }
    }
}

/// Install the global tracing subscriber.
///
/// # Errors
///
/// Returns [`TelemetryError::Subscriber`] when a global subscriber is already
/// installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let _ = BUILD.set(config.build_sha.to_string());

    let output = match config.format {
        LogFormat::Json => fmt::layer()
            .json()
            .flatten_event(true)
            .with_current_span(true)
            .with_span_list(false)
            .boxed(),
        LogFormat::Pretty => fmt::layer().compact().with_target(false).boxed(),
    };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter_directives(config.level)));

    tracing_subscriber::registry()
        .with(output)
        .with(filter)
        .try_init()
        .map_err(|source| TelemetryError::Subscriber { source })
}

/// Build identifier: the value recorded at logging install, else the crate
/// version.
#[must_use]
pub fn build_sha() -> &'static str {
    BUILD
        .get()
        .map_or(env!("CARGO_PKG_VERSION"), String::as_str)
}

fn filter_directives(level: &str) -> String {
    let level = level.trim();
    let verbose = level
        .split(',')
        .any(|directive| matches!(directive.trim(), "debug" | "trace"));
    if verbose {
        level.to_string()
    } else {
        format!("{level},rumqttc=warn")
    }
}
