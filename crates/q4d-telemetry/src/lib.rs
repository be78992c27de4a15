#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Telemetry primitives shared across the Q4D workspace.
//!
//! Layout: `init.rs` (subscriber install), `context.rs` (process span),
//! `metrics.rs` (Prometheus registry), `error.rs` (error type).

pub mod context;
pub mod error;
pub mod init;
pub mod metrics;

pub use context::{ProcessSpanGuard, record_mode};
pub use error::{MetricStep, Result, TelemetryError};
pub use init::{DEFAULT_LOG_LEVEL, LogFormat, LoggingConfig, build_sha, init_logging};
pub use metrics::{Metrics, MetricsSnapshot};
