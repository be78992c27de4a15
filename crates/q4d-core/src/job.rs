//! Transfer jobs and their lifecycle.
//!
//! # Design
//! - A job is created from a resolved event and then owned by the dispatcher.
//! - Status transitions are methods so an illegal edge cannot be written by hand.
//! - A retry keeps the job id and key; only `attempt` and status change.

use std::fmt;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::event::{Event, NO_HASH_SENTINEL};

/// Deduplication key for a job: the payload hash, or the source path when
/// the event carries no hash.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct JobKey(String);

impl JobKey {
    /// Derive the key for an event.
    #[must_use]
    pub fn for_event(event: &Event) -> Self {
        if event.has_hash() {
            Self(event.payload_hash().to_string())
        } else {
            Self(format!("path:{}", event.payload_path()))
        }
    }

    /// Borrow the key text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for JobKey {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Lifecycle status of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Waiting for a worker slot.
    Pending,
    /// A worker is executing the transfer.
    Running,
    /// Transfer finished successfully.
    Succeeded,
    /// Transfer will not be attempted again.
    Failed,
}

impl JobStatus {
    /// Whether the status is final.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed)
    }

    /// Lower-case label used in logs and metrics.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

/// Why a job ended in [`JobStatus::Failed`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "reason", rename_all = "snake_case")]
pub enum FailureCause {
    /// The transfer failed in a way retrying cannot fix.
    Permanent(String),
    /// Transient failures used up the attempt budget.
    RetriesExhausted(String),
    /// Shutdown discarded the job before it started.
    Shutdown,
    /// Shutdown grace expired while the transfer was running.
    Aborted,
}

impl fmt::Display for FailureCause {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Permanent(reason) => write!(f, "permanent failure: {reason}"),
            Self::RetriesExhausted(reason) => write!(f, "retries exhausted: {reason}"),
            Self::Shutdown => f.write_str("discarded at shutdown"),
            Self::Aborted => f.write_str("aborted after shutdown grace period"),
        }
    }
}

/// Unit of work handed to the dispatcher.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Job {
    id: Uuid,
    key: JobKey,
    payload_name: String,
    payload_hash: String,
    source_path: String,
    destination_dir: PathBuf,
    attempt: u32,
    status: JobStatus,
    created_at: DateTime<Utc>,
    finished_at: Option<DateTime<Utc>>,
}

impl Job {
    /// Create a pending job for an event resolved to `destination_dir`.
    #[must_use]
    pub fn from_event(event: &Event, destination_dir: impl Into<PathBuf>) -> Self {
        Self {
            id: Uuid::new_v4(),
            key: JobKey::for_event(event),
            payload_name: event.payload_name().to_string(),
            payload_hash: event.payload_hash().to_string(),
            source_path: event.payload_path().to_string(),
            destination_dir: destination_dir.into(),
            attempt: 1,
            status: JobStatus::Pending,
            created_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Correlation identifier for logs.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// Deduplication key.
    #[must_use]
    pub const fn key(&self) -> &JobKey {
        &self.key
    }

    /// Display name of the payload.
    #[must_use]
    pub fn payload_name(&self) -> &str {
        &self.payload_name
    }

    /// Hash used to address label updates.
    #[must_use]
    pub fn payload_hash(&self) -> &str {
        &self.payload_hash
    }

    /// Whether the payload carries a real hash that label updates can address.
    #[must_use]
    pub fn has_hash(&self) -> bool {
        self.payload_hash != NO_HASH_SENTINEL
    }

    /// Path of the payload on the seedbox.
    #[must_use]
    pub fn source_path(&self) -> &str {
        &self.source_path
    }

    /// Local directory receiving the payload.
    #[must_use]
    pub fn destination_dir(&self) -> &Path {
        &self.destination_dir
    }

    /// Attempt number, starting at 1.
    #[must_use]
    pub const fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> JobStatus {
        self.status
    }

    /// Creation time of the job.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Time the job reached a terminal status.
    #[must_use]
    pub const fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Pending → Running.
    pub fn mark_running(&mut self) {
        self.status = JobStatus::Running;
    }

    /// Running → Succeeded.
    pub fn mark_succeeded(&mut self) {
        self.status = JobStatus::Succeeded;
        self.finished_at = Some(Utc::now());
    }

    /// Any non-terminal status → Failed.
    pub fn mark_failed(&mut self) {
        self.status = JobStatus::Failed;
        self.finished_at = Some(Utc::now());
    }

    /// Running → Pending with the next attempt number.
    pub fn prepare_retry(&mut self) {
        self.attempt = self.attempt.saturating_add(1);
        self.status = JobStatus::Pending;
    }
}

/// Terminal notification emitted by the dispatcher for every job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct JobReport {
    /// The job in its terminal status.
    pub job: Job,
    /// Failure detail when the job failed.
    pub failure: Option<FailureCause>,
}

impl JobReport {
    /// Report for a job that finished successfully.
    #[must_use]
    pub const fn succeeded(job: Job) -> Self {
        Self { job, failure: None }
    }

    /// Report for a job that failed.
    #[must_use]
    pub const fn failed(job: Job, cause: FailureCause) -> Self {
        Self {
            job,
            failure: Some(cause),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::MalformedEvent;

    fn event(hash: &str) -> Result<Event, MalformedEvent> {
        Event::new("Show", "/downloads/Show", hash, "TV", Utc::now())
    }

    #[test]
    fn job_starts_pending_at_attempt_one() -> Result<(), MalformedEvent> {
        let job = Job::from_event(&event("abc")?, "/media/tv");
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.attempt(), 1);
        assert_eq!(job.key().as_str(), "abc");
        assert_eq!(job.destination_dir(), Path::new("/media/tv"));
        assert!(job.finished_at().is_none());
        Ok(())
    }

    #[test]
    fn sentinel_hash_keys_by_path() -> Result<(), MalformedEvent> {
        let job = Job::from_event(&event(NO_HASH_SENTINEL)?, "/media/tv");
        assert_eq!(job.key().as_str(), "path:/downloads/Show");
        assert!(!job.has_hash());
        assert!(Job::from_event(&event("abc")?, "/media/tv").has_hash());
        Ok(())
    }

    #[test]
    fn transitions_update_status_and_attempt() -> Result<(), MalformedEvent> {
        let mut job = Job::from_event(&event("abc")?, "/media/tv");
        let id = job.id();
        job.mark_running();
        assert_eq!(job.status(), JobStatus::Running);
        job.prepare_retry();
        assert_eq!(job.status(), JobStatus::Pending);
        assert_eq!(job.attempt(), 2);
        assert_eq!(job.id(), id);
        job.mark_running();
        job.mark_succeeded();
        assert!(job.status().is_terminal());
        assert!(job.finished_at().is_some());
        Ok(())
    }

    #[test]
    fn failure_causes_render_reason() {
        let cause = FailureCause::RetriesExhausted("connection refused".into());
        assert_eq!(cause.to_string(), "retries exhausted: connection refused");
        assert_eq!(
            FailureCause::Aborted.to_string(),
            "aborted after shutdown grace period"
        );
    }
}
