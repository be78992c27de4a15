//! Command-line arguments.

use std::path::PathBuf;

use clap::Parser;
use q4d_telemetry::LogFormat;

/// Default location of the category mapping file.
pub const DEFAULT_TYPE_MAPPING: &str = "type_mapping.json";

/// Transfers finished torrents announced on the bus to local media folders.
#[derive(Debug, Clone, Parser)]
#[command(name = "q4d", version, about)]
pub struct Cli {
    /// Configuration file (TOML). Falls back to `q4d.toml` when present.
    #[arg(long, env = "Q4D_CONFIG")]
    pub config: Option<PathBuf>,
    /// Category to directory mapping file (JSON object).
    #[arg(long, env = "Q4D_TYPE_MAPPING", default_value = DEFAULT_TYPE_MAPPING)]
    pub type_mapping: PathBuf,
    /// Log at debug level regardless of the configured level.
    #[arg(long)]
    pub debug: bool,
    /// Log output format: `pretty` or `json`.
    #[arg(long)]
    pub log_format: Option<LogFormat>,
    /// Read events from standard input through an in-memory broker and log
    /// transfers instead of running them.
    #[arg(long)]
    pub dry_run: bool,
}

impl Cli {
    /// Level handed to the log filter.
    #[must_use]
    pub fn log_level<'a>(&self, configured: &'a str) -> &'a str {
        if self.debug { "debug" } else { configured }
    }
}
