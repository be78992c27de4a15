#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Transfer execution backed by the external `lftp` tool.
//!
//! Layout: `lftp.rs` (executor and command construction), `runner.rs`
//! (subprocess streaming and timeouts), `classify.rs` (outcome
//! classification), `permissions.rs` (post-transfer mode fix-up),
//! `error.rs` (runner errors).

mod classify;
pub mod error;
pub mod lftp;
mod permissions;
mod runner;

pub use error::{TransferError, TransferResult};
pub use lftp::{LftpConfig, LftpExecutor};
