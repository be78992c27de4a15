//! Worker pool with deduplicated admission, retry-as-resubmission and a
//! bounded shutdown drain.
//!
//! # Design
//! - `submit` takes one short lock and never awaits, so it is safe to call
//!   from the bus delivery context.
//! - A semaphore carries one permit per pending job; closing it releases
//!   idle workers at shutdown.
//! - Transient failures are pushed back onto the queue with the next attempt
//!   number rather than retried in place, so the same capacity and shutdown
//!   rules apply to retries and fresh jobs.
//! - Every job produces exactly one terminal [`JobReport`].

use std::num::{NonZeroU32, NonZeroUsize};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use q4d_core::{
    FailureCause, Job, JobKey, JobReport, SubmitOutcome, TransferExecutor, TransferOutcome,
    TransferRequest,
};
use q4d_telemetry::Metrics;
use serde::Serialize;
use tokio::sync::{Notify, Semaphore, mpsc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::state::{DispatchState, Requeue};

/// Pool sizing and retry budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DispatcherSettings {
    /// Number of worker slots.
    pub workers: NonZeroUsize,
    /// Jobs allowed to wait when every worker is busy.
    pub queue_capacity: usize,
    /// Attempts per job, counting the first.
    pub max_attempts: NonZeroU32,
    /// Segment count forwarded to the executor.
    pub segments: NonZeroU32,
}

/// Point-in-time counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DispatcherStats {
    /// Jobs executing.
    pub running: usize,
    /// Jobs waiting for a worker.
    pub queued: usize,
    /// Distinct keys pending or running.
    pub in_flight: usize,
}

/// What shutdown did with the jobs it found.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ShutdownSummary {
    /// Jobs discarded before they started.
    pub discarded: Vec<JobKey>,
    /// Jobs still running when the grace period expired.
    pub aborted: Vec<JobKey>,
}

/// Bounded worker pool. Cheap to share behind an `Arc`.
pub struct Dispatcher {
    inner: Arc<Inner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

struct Inner {
    settings: DispatcherSettings,
    executor: Arc<dyn TransferExecutor>,
    reports: mpsc::UnboundedSender<JobReport>,
    metrics: Metrics,
    state: Mutex<DispatchState>,
    ready: Semaphore,
    settled: Notify,
}

impl Dispatcher {
    /// Spawn the worker pool. Terminal reports are sent on `reports`.
    ///
    /// Must be called from within a Tokio runtime.
    #[must_use]
    pub fn start(
        settings: DispatcherSettings,
        executor: Arc<dyn TransferExecutor>,
        reports: mpsc::UnboundedSender<JobReport>,
        metrics: Metrics,
    ) -> Self {
        let inner = Arc::new(Inner {
            settings,
            executor,
            reports,
            metrics,
            state: Mutex::new(DispatchState::new(
                settings.workers.get(),
                settings.queue_capacity,
            )),
            ready: Semaphore::new(0),
            settled: Notify::new(),
        });

        let handles = (0..settings.workers.get())
            .map(|slot| {
                let inner = Arc::clone(&inner);
                tokio::spawn(async move { inner.run_worker(slot).await })
            })
            .collect();

        info!(
            workers = settings.workers.get(),
            queue_capacity = settings.queue_capacity,
            max_attempts = settings.max_attempts.get(),
            "Dispatcher started"
        );

        Self {
            inner,
            workers: Mutex::new(handles),
        }
    }

    /// Offer a job to the pool without blocking.
    pub fn submit(&self, job: Job) -> SubmitOutcome {
        let key = job.key().clone();
        let job_id = job.id();
        let outcome = {
            let mut state = self.inner.lock_state();
            let outcome = state.admit(job);
            self.inner.publish_gauges(&state);
            outcome
        };
        if outcome == SubmitOutcome::Accepted {
            self.inner.ready.add_permits(1);
        }
        self.inner.metrics.inc_job_submitted(outcome.as_str());
        debug!(job_id = %job_id, job_key = %key, outcome = outcome.as_str(), "Job submission");
        outcome
    }

    /// Current running, queued and in-flight counts.
    #[must_use]
    pub fn stats(&self) -> DispatcherStats {
        let state = self.inner.lock_state();
        DispatcherStats {
            running: state.running_len(),
            queued: state.pending_len(),
            in_flight: state.in_flight_len(),
        }
    }

    /// Stop admission, discard queued jobs, give running jobs up to `grace`
    /// to finish, then abort the rest.
    ///
    /// Aborting a worker drops its child process handle, which kills the tool.
    pub async fn shutdown(&self, grace: Duration) -> ShutdownSummary {
        let discarded = {
            let mut state = self.inner.lock_state();
            let discarded = state.close();
            self.inner.publish_gauges(&state);
            discarded
        };
        self.inner.ready.close();

        let mut summary = ShutdownSummary::default();
        for mut job in discarded {
            summary.discarded.push(job.key().clone());
            job.mark_failed();
            self.inner.report(JobReport::failed(job, FailureCause::Shutdown));
        }
        info!(
            discarded = summary.discarded.len(),
            grace_secs = grace.as_secs_f64(),
            "Dispatcher draining"
        );

        let deadline = Instant::now() + grace;
        loop {
            let settled = self.inner.settled.notified();
            tokio::pin!(settled);
            settled.as_mut().enable();
            if self.inner.lock_state().running_len() == 0 {
                break;
            }
            if tokio::time::timeout_at(deadline, settled).await.is_err() {
                break;
            }
        }

        let handles: Vec<JoinHandle<()>> = std::mem::take(&mut *self.lock_workers());
        for handle in &handles {
            handle.abort();
        }
        for handle in handles {
            if let Err(err) = handle.await {
                if !err.is_cancelled() {
                    error!(error = %err, "Worker task panicked");
                }
            }
        }

        let aborted = {
            let mut state = self.inner.lock_state();
            let aborted = state.take_running();
            self.inner.publish_gauges(&state);
            aborted
        };
        for mut job in aborted {
            warn!(job_id = %job.id(), job_key = %job.key(), "Transfer aborted after grace period");
            summary.aborted.push(job.key().clone());
            job.mark_failed();
            self.inner.report(JobReport::failed(job, FailureCause::Aborted));
        }

        info!(
            discarded = summary.discarded.len(),
            aborted = summary.aborted.len(),
            "Dispatcher stopped"
        );
        summary
    }

    fn lock_workers(&self) -> MutexGuard<'_, Vec<JoinHandle<()>>> {
        self.workers.lock().unwrap_or_else(|poisoned| {
            error!("worker handle lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

impl Inner {
    async fn run_worker(&self, slot: usize) {
        debug!(slot, "Worker ready");
        loop {
            match self.ready.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => break,
            }
            let job = {
                let mut state = self.lock_state();
                let job = state.start_next();
                self.publish_gauges(&state);
                job
            };
            let Some(job) = job else {
                continue;
            };

            info!(
                slot,
                job_id = %job.id(),
                job_key = %job.key(),
                attempt = job.attempt(),
                source = %job.source_path(),
                destination = %job.destination_dir().display(),
                "Transfer started"
            );
            let request = TransferRequest::for_job(&job, self.settings.segments);
            let outcome = self.executor.execute(&request).await;
            self.complete(job, outcome);
        }
        debug!(slot, "Worker stopped");
    }

    fn complete(&self, mut job: Job, outcome: TransferOutcome) {
        match outcome {
            TransferOutcome::Success => {
                self.settle(&job);
                job.mark_succeeded();
                self.report(JobReport::succeeded(job));
            }
            TransferOutcome::PermanentFailure(reason) => {
                self.settle(&job);
                job.mark_failed();
                self.report(JobReport::failed(job, FailureCause::Permanent(reason)));
            }
            TransferOutcome::TransientFailure(reason)
                if job.attempt() < self.settings.max_attempts.get() =>
            {
                let key = job.key().clone();
                let attempt = job.attempt();
                let requeued = {
                    let mut state = self.lock_state();
                    let requeued = state.requeue(job);
                    self.publish_gauges(&state);
                    requeued
                };
                match requeued {
                    Requeue::Queued => {
                        warn!(
                            job_key = %key,
                            attempt,
                            next_attempt = attempt + 1,
                            reason = %reason,
                            "Transient transfer failure; job requeued"
                        );
                        self.metrics.inc_job_retry();
                        self.ready.add_permits(1);
                    }
                    Requeue::Closed(mut job) => {
                        job.mark_failed();
                        self.report(JobReport::failed(job, FailureCause::Shutdown));
                    }
                }
                self.settled.notify_waiters();
            }
            TransferOutcome::TransientFailure(reason) => {
                self.settle(&job);
                job.mark_failed();
                self.report(JobReport::failed(
                    job,
                    FailureCause::RetriesExhausted(reason),
                ));
            }
        }
    }

    /// Release a job's slot and key before its report goes out.
    fn settle(&self, job: &Job) {
        let mut state = self.lock_state();
        state.finish(job);
        self.publish_gauges(&state);
        drop(state);
        self.settled.notify_waiters();
    }

    fn report(&self, report: JobReport) {
        let status = report.job.status();
        self.metrics.inc_job_finished(status.as_str());
        if self.reports.send(report).is_err() {
            debug!("Report receiver dropped; discarding job report");
        }
    }

    fn publish_gauges(&self, state: &DispatchState) {
        self.metrics.set_jobs_running(state.running_len());
        self.metrics.set_jobs_queued(state.pending_len());
    }

    fn lock_state(&self) -> MutexGuard<'_, DispatchState> {
        self.state.lock().unwrap_or_else(|poisoned| {
            error!("dispatcher state lock poisoned; recovering");
            poisoned.into_inner()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, Result, anyhow};
    use async_trait::async_trait;
    use chrono::Utc;
    use q4d_core::{Event, JobStatus};
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Executor whose outcomes are scripted per key; optionally blocks on a gate.
    #[derive(Default)]
    struct ScriptedExecutor {
        gate: Option<Arc<Semaphore>>,
        delay: Duration,
        outcomes: Mutex<HashMap<String, VecDeque<TransferOutcome>>>,
        calls: Mutex<Vec<(String, u32)>>,
        active: AtomicUsize,
        peak: AtomicUsize,
    }

    impl ScriptedExecutor {
        fn gated(gate: &Arc<Semaphore>) -> Self {
            Self {
                gate: Some(Arc::clone(gate)),
                ..Self::default()
            }
        }

        fn script(self, key: &str, outcomes: Vec<TransferOutcome>) -> Self {
            if let Ok(mut map) = self.outcomes.lock() {
                map.insert(key.to_string(), outcomes.into());
            }
            self
        }

        fn calls(&self) -> Vec<(String, u32)> {
            self.calls.lock().map(|calls| calls.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl TransferExecutor for ScriptedExecutor {
        async fn execute(&self, request: &TransferRequest) -> TransferOutcome {
            let now = self.active.fetch_add(1, Ordering::SeqCst) + 1;
            self.peak.fetch_max(now, Ordering::SeqCst);
            if let Ok(mut calls) = self.calls.lock() {
                calls.push((request.key.to_string(), request.attempt));
            }
            if let Some(gate) = &self.gate {
                if let Ok(permit) = gate.acquire().await {
                    permit.forget();
                }
            }
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            self.active.fetch_sub(1, Ordering::SeqCst);
            self.outcomes
                .lock()
                .ok()
                .and_then(|mut map| map.get_mut(request.key.as_str()).and_then(VecDeque::pop_front))
                .unwrap_or(TransferOutcome::Success)
        }
    }

    fn settings(workers: usize, queue_capacity: usize, max_attempts: u32) -> Result<DispatcherSettings> {
        Ok(DispatcherSettings {
            workers: NonZeroUsize::new(workers).context("workers")?,
            queue_capacity,
            max_attempts: NonZeroU32::new(max_attempts).context("attempts")?,
            segments: NonZeroU32::MIN,
        })
    }

    fn job(hash: &str) -> Result<Job> {
        let event = Event::new("", format!("/downloads/{hash}"), hash, "TV", Utc::now())?;
        Ok(Job::from_event(&event, "/media/tv"))
    }

    fn start(
        settings: DispatcherSettings,
        executor: &Arc<ScriptedExecutor>,
    ) -> Result<(Dispatcher, mpsc::UnboundedReceiver<JobReport>)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let executor: Arc<dyn TransferExecutor> = executor.clone();
        Ok((Dispatcher::start(settings, executor, tx, Metrics::new()?), rx))
    }

    async fn next_report(rx: &mut mpsc::UnboundedReceiver<JobReport>) -> Result<JobReport> {
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .map_err(|_| anyhow!("timed out waiting for report"))?
            .context("report channel closed")
    }

    async fn wait_until_running(dispatcher: &Dispatcher, running: usize) -> Result<()> {
        tokio::time::timeout(Duration::from_secs(5), async {
            while dispatcher.stats().running != running {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .map_err(|_| anyhow!("workers never reached {running} running jobs"))
    }

    #[tokio::test]
    async fn pool_of_two_with_capacity_two_rejects_the_fifth_job() -> Result<()> {
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(ScriptedExecutor::gated(&gate));
        let (dispatcher, mut reports) = start(settings(2, 2, 1)?, &executor)?;

        let mut outcomes = Vec::new();
        for hash in ["a", "b", "c", "d", "e"] {
            outcomes.push(dispatcher.submit(job(hash)?));
        }
        let accepted = outcomes
            .iter()
            .filter(|outcome| **outcome == SubmitOutcome::Accepted)
            .count();
        assert_eq!(accepted, 4);
        assert_eq!(outcomes[4], SubmitOutcome::QueueFull);

        wait_until_running(&dispatcher, 2).await?;
        assert_eq!(dispatcher.stats().queued, 2);

        gate.add_permits(4);
        for _ in 0..4 {
            assert_eq!(next_report(&mut reports).await?.job.status(), JobStatus::Succeeded);
        }
        assert!(executor.peak.load(Ordering::SeqCst) <= 2);
        assert_eq!(dispatcher.stats().in_flight, 0);
        Ok(())
    }

    #[tokio::test]
    async fn duplicate_key_is_rejected_until_the_job_finishes() -> Result<()> {
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(ScriptedExecutor::gated(&gate));
        let (dispatcher, mut reports) = start(settings(2, 4, 1)?, &executor)?;

        assert_eq!(dispatcher.submit(job("same")?), SubmitOutcome::Accepted);
        assert_eq!(dispatcher.submit(job("same")?), SubmitOutcome::DuplicateRejected);
        wait_until_running(&dispatcher, 1).await?;
        assert_eq!(dispatcher.submit(job("same")?), SubmitOutcome::DuplicateRejected);

        gate.add_permits(1);
        let report = next_report(&mut reports).await?;
        assert_eq!(report.job.key().as_str(), "same");
        assert_eq!(dispatcher.submit(job("same")?), SubmitOutcome::Accepted);
        gate.add_permits(1);
        next_report(&mut reports).await?;
        assert_eq!(executor.calls().len(), 2);
        Ok(())
    }

    #[tokio::test]
    async fn transient_failures_retry_until_the_budget_is_spent() -> Result<()> {
        let transient = || TransferOutcome::TransientFailure("connection refused".into());
        let executor = Arc::new(
            ScriptedExecutor::default().script("flaky", vec![transient(), transient(), transient()]),
        );
        let (dispatcher, mut reports) = start(settings(1, 2, 3)?, &executor)?;

        assert_eq!(dispatcher.submit(job("flaky")?), SubmitOutcome::Accepted);
        let report = next_report(&mut reports).await?;

        assert_eq!(report.job.status(), JobStatus::Failed);
        assert_eq!(report.job.attempt(), 3);
        assert_eq!(
            report.failure,
            Some(FailureCause::RetriesExhausted("connection refused".into()))
        );
        let attempts: Vec<u32> = executor.calls().into_iter().map(|(_, attempt)| attempt).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert!(reports.try_recv().is_err());
        Ok(())
    }

    #[tokio::test]
    async fn transient_failure_then_success_reports_success() -> Result<()> {
        let executor = Arc::new(ScriptedExecutor::default().script(
            "blip",
            vec![TransferOutcome::TransientFailure("timed out".into())],
        ));
        let (dispatcher, mut reports) = start(settings(1, 2, 3)?, &executor)?;

        dispatcher.submit(job("blip")?);
        let report = next_report(&mut reports).await?;
        assert_eq!(report.job.status(), JobStatus::Succeeded);
        assert_eq!(report.job.attempt(), 2);
        assert!(report.failure.is_none());
        Ok(())
    }

    #[tokio::test]
    async fn permanent_failure_is_never_retried() -> Result<()> {
        let executor = Arc::new(ScriptedExecutor::default().script(
            "gone",
            vec![TransferOutcome::PermanentFailure("No such file or directory".into())],
        ));
        let (dispatcher, mut reports) = start(settings(1, 2, 5)?, &executor)?;

        dispatcher.submit(job("gone")?);
        let report = next_report(&mut reports).await?;
        assert_eq!(report.job.status(), JobStatus::Failed);
        assert!(matches!(report.failure, Some(FailureCause::Permanent(_))));
        assert_eq!(executor.calls().len(), 1);
        Ok(())
    }

    #[tokio::test]
    async fn single_worker_runs_jobs_in_submission_order() -> Result<()> {
        let executor = Arc::new(ScriptedExecutor::default());
        let (dispatcher, mut reports) = start(settings(1, 4, 1)?, &executor)?;

        for hash in ["first", "second", "third"] {
            assert_eq!(dispatcher.submit(job(hash)?), SubmitOutcome::Accepted);
        }
        for _ in 0..3 {
            next_report(&mut reports).await?;
        }
        let order: Vec<String> = executor.calls().into_iter().map(|(key, _)| key).collect();
        assert_eq!(order, vec!["first", "second", "third"]);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_discards_queued_jobs_and_aborts_after_grace() -> Result<()> {
        let gate = Arc::new(Semaphore::new(0));
        let executor = Arc::new(ScriptedExecutor::gated(&gate));
        let (dispatcher, mut reports) = start(settings(1, 2, 1)?, &executor)?;

        dispatcher.submit(job("running")?);
        wait_until_running(&dispatcher, 1).await?;
        dispatcher.submit(job("queued")?);

        let summary = dispatcher.shutdown(Duration::from_millis(100)).await;
        assert_eq!(summary.discarded, vec![JobKey::from("queued")]);
        assert_eq!(summary.aborted, vec![JobKey::from("running")]);

        let first = next_report(&mut reports).await?;
        assert_eq!(first.failure, Some(FailureCause::Shutdown));
        let second = next_report(&mut reports).await?;
        assert_eq!(second.failure, Some(FailureCause::Aborted));
        assert_eq!(second.job.status(), JobStatus::Failed);

        assert_eq!(dispatcher.submit(job("late")?), SubmitOutcome::Closed);
        assert_eq!(dispatcher.stats().in_flight, 0);
        Ok(())
    }

    #[tokio::test]
    async fn shutdown_lets_running_jobs_finish_within_grace() -> Result<()> {
        let executor = Arc::new(ScriptedExecutor {
            delay: Duration::from_millis(150),
            ..ScriptedExecutor::default()
        });
        let (dispatcher, mut reports) = start(settings(2, 2, 1)?, &executor)?;

        dispatcher.submit(job("a")?);
        dispatcher.submit(job("b")?);
        wait_until_running(&dispatcher, 2).await?;

        let summary = dispatcher.shutdown(Duration::from_secs(5)).await;
        assert!(summary.aborted.is_empty());
        assert!(summary.discarded.is_empty());
        for _ in 0..2 {
            assert_eq!(next_report(&mut reports).await?.job.status(), JobStatus::Succeeded);
        }
        Ok(())
    }
}
