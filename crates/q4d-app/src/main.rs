#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Binary entrypoint for the Q4D client.

use std::error::Error;
use std::process::ExitCode;

use clap::Parser;
use q4d_app::{Cli, run_app};
use tracing::error;

/// Runs the client until a shutdown signal (or end of input in dry-run mode).
#[tokio::main]
async fn main() -> ExitCode {
    match run_app(Cli::parse()).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!(error = %err, "Q4D client failed");
            eprintln!("error: {err}");
            let mut source = err.source();
            while let Some(cause) = source {
                eprintln!("  caused by: {cause}");
                source = cause.source();
            }
            ExitCode::FAILURE
        }
    }
}
