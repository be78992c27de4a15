#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Bounded worker pool that executes transfer jobs.
//!
//! Layout: `state.rs` (admission and bookkeeping under one lock),
//! `dispatcher.rs` (workers, retries, shutdown drain).

pub mod dispatcher;
mod state;

pub use dispatcher::{Dispatcher, DispatcherSettings, DispatcherStats, ShutdownSummary};
