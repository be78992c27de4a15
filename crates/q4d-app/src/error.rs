//! # Design
//!
//! - Startup failures only; once running, failures are logged where they
//!   happen and never reach `main`.
//! - Constant messages with the operation name carried as a field.

use std::io;

use thiserror::Error;

/// Result alias for application operations.
pub type AppResult<T> = Result<T, AppError>;

/// Application-level error type.
#[derive(Debug, Error)]
pub enum AppError {
    /// Configuration or mapping could not be loaded.
    #[error("configuration operation failed")]
    Config {
        /// Operation identifier.
        operation: &'static str,
        /// Source configuration error.
        source: q4d_config::ConfigError,
    },
    /// Telemetry could not be initialised.
    #[error("telemetry operation failed")]
    Telemetry {
        /// Operation identifier.
        operation: &'static str,
        /// Source telemetry error.
        source: q4d_telemetry::TelemetryError,
    },
    /// The bus connection could not be established.
    #[error("bus connection failed")]
    Bus {
        /// Operation identifier.
        operation: &'static str,
        /// Source connect error.
        source: q4d_bus::ConnectError,
    },
    /// The inbound subscription was refused.
    #[error("bus subscription failed")]
    Subscribe {
        /// Topic requested.
        topic: String,
        /// Source subscribe error.
        source: q4d_bus::SubscribeError,
    },
    /// Signal handlers could not be installed.
    #[error("signal handling failed")]
    Signal {
        /// Source IO error.
        source: io::Error,
    },
    /// Reading standard input failed.
    #[error("io operation failed")]
    Io {
        /// Operation identifier.
        operation: &'static str,
        /// Source IO error.
        source: io::Error,
    },
}

impl AppError {
    pub(crate) const fn config(operation: &'static str, source: q4d_config::ConfigError) -> Self {
        Self::Config { operation, source }
    }

    pub(crate) const fn telemetry(
        operation: &'static str,
        source: q4d_telemetry::TelemetryError,
    ) -> Self {
        Self::Telemetry { operation, source }
    }

    pub(crate) const fn bus(operation: &'static str, source: q4d_bus::ConnectError) -> Self {
        Self::Bus { operation, source }
    }

    pub(crate) fn subscribe(topic: &str, source: q4d_bus::SubscribeError) -> Self {
        Self::Subscribe {
            topic: topic.to_string(),
            source,
        }
    }

    pub(crate) const fn signal(source: io::Error) -> Self {
        Self::Signal { source }
    }

    pub(crate) const fn io(operation: &'static str, source: io::Error) -> Self {
        Self::Io { operation, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    #[test]
    fn helpers_build_variants() {
        let config = AppError::config(
            "config.load",
            q4d_config::ConfigError::FileMissing {
                path: PathBuf::from("/etc/q4d.toml"),
            },
        );
        assert!(matches!(config, AppError::Config { operation: "config.load", .. }));

        let bus = AppError::bus(
            "bus.connect",
            q4d_bus::ConnectError::Unreachable {
                reason: "connection refused".into(),
            },
        );
        assert_eq!(bus.to_string(), "bus connection failed");

        let subscribe = AppError::subscribe("Down", q4d_bus::SubscribeError::Closed);
        assert!(matches!(subscribe, AppError::Subscribe { ref topic, .. } if topic == "Down"));

        assert!(matches!(
            AppError::signal(io::Error::other("no signals")),
            AppError::Signal { .. }
        ));
        assert!(matches!(
            AppError::io("stdin.read", io::Error::other("closed")),
            AppError::Io { .. }
        ));
    }
}
