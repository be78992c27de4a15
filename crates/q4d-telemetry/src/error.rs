//! Error types for telemetry operations.

use std::fmt;
use std::string::FromUtf8Error;

use thiserror::Error;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type Result<T> = std::result::Result<T, TelemetryError>;

/// Stage at which a metric failed to come up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MetricStep {
    /// Constructing the collector (invalid name or labels).
    Build,
    /// Adding the collector to the registry.
    Register,
}

impl fmt::Display for MetricStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Build => "build",
            Self::Register => "register",
        })
    }
}

/// Errors raised by telemetry helpers.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// A global subscriber is already installed.
    #[error("tracing subscriber could not be installed")]
    Subscriber {
        /// Underlying installation error.
        source: TryInitError,
    },
    /// A collector could not be built or registered.
    #[error("metric setup failed")]
    Metric {
        /// Metric name.
        name: &'static str,
        /// Failing stage.
        step: MetricStep,
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// The registry could not be encoded.
    #[error("metrics exposition failed")]
    Exposition {
        /// Underlying Prometheus error.
        source: prometheus::Error,
    },
    /// Encoded exposition text was not UTF-8.
    #[error("metrics exposition was not utf-8")]
    ExpositionText {
        /// Underlying conversion error.
        source: FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn metric(
        name: &'static str,
        step: MetricStep,
        source: prometheus::Error,
    ) -> Self {
        Self::Metric { name, step, source }
    }
}
