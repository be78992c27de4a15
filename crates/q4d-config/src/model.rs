//! Typed configuration consumed by the pipeline components.
//!
//! # Design
//! - Each component receives only its own settings block.
//! - Values are validated once; downstream code never re-parses strings.

use std::num::{NonZeroU32, NonZeroUsize};
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

/// Fully validated client configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Broker connection and topic settings.
    pub bus: BusSettings,
    /// External transfer tool settings.
    pub transfer: TransferSettings,
    /// Worker pool sizing and retry budget.
    pub dispatch: DispatchSettings,
    /// Label-update behaviour.
    pub labels: LabelSettings,
    /// Destination directory resolution.
    pub destinations: DestinationSettings,
    /// Time allowed for running transfers to finish on shutdown.
    pub shutdown_grace: Duration,
    /// Default log level when `RUST_LOG` is unset.
    pub log_level: String,
}

/// Broker connection settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BusSettings {
    /// Broker host name or address.
    pub host: String,
    /// Broker TCP port.
    pub port: u16,
    /// Broker user name.
    pub user: String,
    /// Broker password.
    pub password: String,
    /// Stable client identifier presented on connect.
    pub client_id: String,
    /// Topic carrying finished-torrent events.
    pub inbound_topic: String,
    /// Topic receiving label-update notifications.
    pub label_topic: String,
    /// Ask the broker to keep session state between connections.
    pub persistent_session: bool,
    /// Keep-alive interval negotiated with the broker.
    pub keep_alive: Duration,
    /// Connection attempts repeated at startup before giving up.
    pub startup_retries: u32,
    /// Upper bound on waiting for a publish acknowledgement.
    pub publish_timeout: Duration,
}

/// Settings handed to the transfer executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSettings {
    /// Seedbox SFTP host.
    pub host: String,
    /// `user:password` credentials for the seedbox.
    pub creds: String,
    /// Parallel file count for directory mirrors.
    pub threads: NonZeroU32,
    /// Segment count per file.
    pub segments: NonZeroU32,
    /// Transfer tool binary.
    pub tool: String,
    /// Optional wall-clock limit for a single job.
    pub job_timeout: Option<Duration>,
}

/// Worker pool settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatchSettings {
    /// Number of worker slots.
    pub workers: NonZeroUsize,
    /// Waiting-queue capacity per worker.
    pub queue_multiplier: NonZeroUsize,
    /// Attempts allowed per job, counting the first.
    pub max_attempts: NonZeroU32,
}

impl DispatchSettings {
    /// Number of jobs that may wait for a free worker.
    #[must_use]
    pub const fn queue_capacity(&self) -> usize {
        self.workers.get().saturating_mul(self.queue_multiplier.get())
    }
}

/// Label-update behaviour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LabelSettings {
    /// Publish a completion label after successful transfers.
    pub enabled: bool,
    /// Also publish a failure label after terminal failures.
    pub label_failures: bool,
}

/// Destination directory resolution settings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DestinationSettings {
    /// Base joined onto relative mapping directories.
    pub base: Option<PathBuf>,
    /// Directory used for categories missing from the mapping.
    pub default: Option<PathBuf>,
}

/// Untyped view of the merged configuration sources.
///
/// Every value is read as text so that validation can report all problems
/// at once instead of stopping at the first type mismatch.
#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub(crate) struct RawClientConfig {
    pub(crate) bus_host: Option<String>,
    pub(crate) bus_port: Option<String>,
    pub(crate) user: Option<String>,
    pub(crate) pw: Option<String>,
    pub(crate) client_id: Option<String>,
    pub(crate) inbound_topic: Option<String>,
    pub(crate) label_topic: Option<String>,
    pub(crate) persistent_session: Option<String>,
    pub(crate) keep_alive_secs: Option<String>,
    pub(crate) startup_retries: Option<String>,
    pub(crate) publish_timeout_secs: Option<String>,
    pub(crate) labelling: Option<String>,
    pub(crate) label_failures: Option<String>,
    pub(crate) host: Option<String>,
    pub(crate) creds: Option<String>,
    pub(crate) threads: Option<String>,
    pub(crate) segments: Option<String>,
    pub(crate) transfer_tool: Option<String>,
    pub(crate) job_timeout_secs: Option<String>,
    pub(crate) queue_multiplier: Option<String>,
    pub(crate) max_attempts: Option<String>,
    pub(crate) destination_base: Option<String>,
    pub(crate) default_destination: Option<String>,
    pub(crate) shutdown_grace_secs: Option<String>,
    pub(crate) log_level: Option<String>,
}
