//! Submission and transfer results, and the executor seam.

use std::num::NonZeroU32;
use std::path::PathBuf;

use async_trait::async_trait;
use uuid::Uuid;

use crate::job::{Job, JobKey};

/// Result of offering a job to the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// The job was queued or handed to an idle worker.
    Accepted,
    /// A job with the same key is already pending or running.
    DuplicateRejected,
    /// The waiting queue is at capacity.
    QueueFull,
    /// The dispatcher is shutting down.
    Closed,
}

impl SubmitOutcome {
    /// Lower-case label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Accepted => "accepted",
            Self::DuplicateRejected => "duplicate",
            Self::QueueFull => "queue_full",
            Self::Closed => "closed",
        }
    }
}

/// Classified result of one transfer attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransferOutcome {
    /// Payload is in place.
    Success,
    /// Worth retrying (network trouble, timeout, unrecognised exit).
    TransientFailure(String),
    /// Retrying will not help (bad path, destination not writable).
    PermanentFailure(String),
}

/// Everything the executor needs for one attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Job correlation id.
    pub job_id: Uuid,
    /// Job key, for logging.
    pub key: JobKey,
    /// Attempt number being executed.
    pub attempt: u32,
    /// Payload path on the seedbox.
    pub source_path: String,
    /// Local destination directory.
    pub destination_dir: PathBuf,
    /// Segment count passed through to the transfer tool.
    pub segments: NonZeroU32,
}

impl TransferRequest {
    /// Build the request for the job's current attempt.
    #[must_use]
    pub fn for_job(job: &Job, segments: NonZeroU32) -> Self {
        Self {
            job_id: job.id(),
            key: job.key().clone(),
            attempt: job.attempt(),
            source_path: job.source_path().to_string(),
            destination_dir: job.destination_dir().to_path_buf(),
            segments,
        }
    }
}

/// Runs a single transfer attempt to completion.
#[async_trait]
pub trait TransferExecutor: Send + Sync {
    /// Execute the transfer and classify its result.
    async fn execute(&self, request: &TransferRequest) -> TransferOutcome;
}
