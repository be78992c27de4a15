#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Q4D client wiring: bus intake, dispatcher, label publishing and process
//! lifecycle.
//!
//! Layout: `cli.rs` (arguments), `bootstrap.rs` (dependency wiring and
//! signal handling), `intake.rs` (bus message to job), `orchestrator.rs`
//! (start/stop and the outcome pump), `error.rs` (startup errors).

pub mod bootstrap;
pub mod cli;
pub mod error;
pub mod intake;
pub mod orchestrator;

pub use bootstrap::run_app;
pub use cli::Cli;
pub use error::{AppError, AppResult};
pub use intake::{EventIntake, IntakeRejection};
pub use orchestrator::{Orchestrator, OrchestratorSettings};
