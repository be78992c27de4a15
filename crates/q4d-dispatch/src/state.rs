//! Dispatcher bookkeeping guarded by a single mutex.
//!
//! Invariant: `pending.len() + running.len() <= workers + queue_capacity`,
//! and every key in `pending` or `running` is in `in_flight`.

use std::collections::{HashMap, HashSet, VecDeque};

use q4d_core::{Job, JobKey, SubmitOutcome};
use uuid::Uuid;

#[derive(Debug)]
pub(crate) struct DispatchState {
    workers: usize,
    queue_capacity: usize,
    in_flight: HashSet<JobKey>,
    pending: VecDeque<Job>,
    running: HashMap<Uuid, Job>,
    closed: bool,
}

/// What happened to a job handed back for another attempt.
#[derive(Debug)]
pub(crate) enum Requeue {
    Queued,
    Closed(Job),
}

impl DispatchState {
    pub(crate) fn new(workers: usize, queue_capacity: usize) -> Self {
        Self {
            workers,
            queue_capacity,
            in_flight: HashSet::new(),
            pending: VecDeque::with_capacity(queue_capacity + workers),
            running: HashMap::with_capacity(workers),
            closed: false,
        }
    }

    /// Jobs that can wait beyond those an idle worker will take immediately.
    fn has_room(&self) -> bool {
        let idle = self.workers.saturating_sub(self.running.len());
        self.pending.len() < self.queue_capacity + idle
    }

    pub(crate) fn admit(&mut self, job: Job) -> SubmitOutcome {
        if self.closed {
            return SubmitOutcome::Closed;
        }
        if self.in_flight.contains(job.key()) {
            return SubmitOutcome::DuplicateRejected;
        }
        if !self.has_room() {
            return SubmitOutcome::QueueFull;
        }
        self.in_flight.insert(job.key().clone());
        self.pending.push_back(job);
        SubmitOutcome::Accepted
    }

    /// Pop the oldest pending job and mark it running.
    pub(crate) fn start_next(&mut self) -> Option<Job> {
        let mut job = self.pending.pop_front()?;
        job.mark_running();
        self.running.insert(job.id(), job.clone());
        Some(job)
    }

    /// Remove a job that reached a terminal status; its key becomes free.
    pub(crate) fn finish(&mut self, job: &Job) {
        self.running.remove(&job.id());
        self.in_flight.remove(job.key());
    }

    /// Put a running job back at the tail of the queue; its key stays in flight.
    ///
    /// The job gives up its worker slot first, so a retry always fits.
    pub(crate) fn requeue(&mut self, mut job: Job) -> Requeue {
        self.running.remove(&job.id());
        if self.closed {
            self.in_flight.remove(job.key());
            return Requeue::Closed(job);
        }
        job.prepare_retry();
        self.pending.push_back(job);
        Requeue::Queued
    }

    /// Stop admission and hand back every job that never started.
    pub(crate) fn close(&mut self) -> Vec<Job> {
        self.closed = true;
        let discarded: Vec<Job> = self.pending.drain(..).collect();
        for job in &discarded {
            self.in_flight.remove(job.key());
        }
        discarded
    }

    /// Hand back every job still marked running and free their keys.
    pub(crate) fn take_running(&mut self) -> Vec<Job> {
        let jobs: Vec<Job> = self.running.drain().map(|(_, job)| job).collect();
        for job in &jobs {
            self.in_flight.remove(job.key());
        }
        jobs
    }

    pub(crate) fn running_len(&self) -> usize {
        self.running.len()
    }

    pub(crate) fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Context;
    use chrono::Utc;
    use q4d_core::{Event, JobStatus, MalformedEvent};

    fn job(hash: &str) -> Result<Job, MalformedEvent> {
        let event = Event::new("", format!("/d/{hash}"), hash, "TV", Utc::now())?;
        Ok(Job::from_event(&event, "/media/tv"))
    }

    #[test]
    fn admission_counts_idle_workers_as_extra_room() -> anyhow::Result<()> {
        let mut state = DispatchState::new(2, 2);
        let outcomes: Vec<_> = ["a", "b", "c", "d", "e"]
            .into_iter()
            .map(|hash| job(hash).map(|job| state.admit(job)))
            .collect::<Result<_, _>>()?;
        assert_eq!(
            outcomes,
            vec![
                SubmitOutcome::Accepted,
                SubmitOutcome::Accepted,
                SubmitOutcome::Accepted,
                SubmitOutcome::Accepted,
                SubmitOutcome::QueueFull,
            ]
        );
        Ok(())
    }

    #[test]
    fn duplicate_keys_are_rejected_until_finished() -> anyhow::Result<()> {
        let mut state = DispatchState::new(1, 4);
        assert_eq!(state.admit(job("a")?), SubmitOutcome::Accepted);
        assert_eq!(state.admit(job("a")?), SubmitOutcome::DuplicateRejected);

        let running = state.start_next().context("no pending job")?;
        assert_eq!(running.status(), JobStatus::Running);
        assert_eq!(state.admit(job("a")?), SubmitOutcome::DuplicateRejected);

        state.finish(&running);
        assert_eq!(state.in_flight_len(), 0);
        assert_eq!(state.admit(job("a")?), SubmitOutcome::Accepted);
        Ok(())
    }

    #[test]
    fn requeue_keeps_key_and_bumps_attempt() -> anyhow::Result<()> {
        let mut state = DispatchState::new(1, 1);
        state.admit(job("a")?);
        let running = state.start_next().context("no pending job")?;
        assert!(matches!(state.requeue(running), Requeue::Queued));
        assert_eq!(state.admit(job("a")?), SubmitOutcome::DuplicateRejected);
        let retried = state.start_next().context("no pending job")?;
        assert_eq!(retried.attempt(), 2);
        Ok(())
    }

    #[test]
    fn requeue_goes_behind_waiting_jobs() -> anyhow::Result<()> {
        let mut state = DispatchState::new(1, 1);
        state.admit(job("a")?);
        let running = state.start_next().context("no pending job")?;
        assert_eq!(state.admit(job("b")?), SubmitOutcome::Accepted);
        assert_eq!(state.admit(job("c")?), SubmitOutcome::QueueFull);
        assert!(matches!(state.requeue(running), Requeue::Queued));
        assert_eq!(state.pending_len(), 2);
        let next = state.start_next().context("no pending job")?;
        assert_eq!(next.key().as_str(), "b");
        let next = state.start_next().context("no pending job")?;
        assert_eq!(next.key().as_str(), "a");
        Ok(())
    }

    #[test]
    fn close_discards_pending_and_blocks_admission() -> anyhow::Result<()> {
        let mut state = DispatchState::new(1, 2);
        state.admit(job("a")?);
        state.admit(job("b")?);
        let running = state.start_next().context("no pending job")?;
        let discarded = state.close();
        assert_eq!(discarded.len(), 1);
        assert_eq!(state.admit(job("c")?), SubmitOutcome::Closed);
        assert!(matches!(state.requeue(running), Requeue::Closed(_)));
        assert_eq!(state.in_flight_len(), 0);
        Ok(())
    }
}
