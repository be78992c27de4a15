#![forbid(unsafe_code)]
#![warn(
    unused,
    unreachable_pub,
    clippy::all,
    clippy::pedantic,
    rustdoc::broken_intra_doc_links,
    missing_docs
)]

//! Domain types shared by the Q4D transfer pipeline.
//!
//! Layout: `event.rs` (inbound notification decoding), `job.rs` (job
//! lifecycle), `outcome.rs` (submission and transfer results, executor
//! seam), `label.rs` (label-update messages), `resolver.rs` (category
//! lookup), `error.rs` (error types).

pub mod error;
pub mod event;
pub mod job;
pub mod label;
pub mod outcome;
pub mod resolver;

pub use error::{MalformedEvent, UnknownCategory};
pub use event::{Event, NO_HASH_SENTINEL};
pub use job::{FailureCause, Job, JobKey, JobReport, JobStatus};
pub use label::{Label, LabelMessage};
pub use outcome::{SubmitOutcome, TransferExecutor, TransferOutcome, TransferRequest};
pub use resolver::{FALLBACK_CATEGORY, TypeResolver};
