// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Job store with atomic admission
//!
//! All job state sits behind one lock. The dedup lookup, job creation and waiter
//! registration of a submission happen in a single critical section, and settling a job
//! publishes to its waiters in the critical section that ends its live state. A
//! submission therefore either attaches to a live job before that job settles, or finds
//! no live job and creates a new one; an outcome can never be missed.

use std::{
    collections::{BTreeSet, HashMap, VecDeque},
    fmt,
    sync::{Mutex, MutexGuard, PoisonError},
    time::Duration,
};

use serde::Serialize;
use tokio::{
    sync::{Notify, futures::Notified},
    time::Instant,
};
use tracing::debug;

use crate::{
    config::{RetentionPolicy, RetentionWindow},
    error::JobFailure,
    job::{Job, JobId, JobSnapshot, JobSpec, JobState},
    notifier::{Notifier, Outcome, Waiter},
};

/// How a submission was handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// A new job was created
    Created,
    /// A live job with the same key absorbed the submission
    Attached,
    /// A retained completed job answered the submission
    Retained,
    /// The queue is closed
    Rejected,
}

/// Result of [`JobQueue::admit`]
#[derive(Debug)]
pub struct Admission<O> {
    /// Job the submission resolves with, if any
    pub job_id: Option<JobId>,
    /// How the submission was handled
    pub disposition: Disposition,
    /// Resolves with the job's outcome
    pub waiter: Waiter<O>,
}

/// A job handed to a worker for one attempt
#[derive(Debug, Clone)]
pub struct ClaimedJob<J> {
    /// Job id
    pub id: JobId,
    /// The job
    pub job: J,
    /// Dedup key
    pub dedup_key: String,
    /// Limiter points charged for this attempt
    pub cost: f64,
    /// Attempt number, starting at 1
    pub attempt: u32,
}

/// Result of [`JobQueue::claim_next`]
#[derive(Debug)]
pub enum Claim<J> {
    /// A job to run
    Job(ClaimedJob<J>),
    /// Nothing ready; `next_due` is when the earliest delayed job becomes ready
    Idle {
        /// Earliest retry time
        next_due: Option<Instant>,
    },
    /// The concurrency bound is reached
    Saturated,
    /// The queue is closed
    Closed,
}

/// Jobs per state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueCounts {
    /// Ready to run
    pub waiting: usize,
    /// Backing off
    pub delayed: usize,
    /// Running
    pub active: usize,
    /// Retained successes
    pub completed: usize,
    /// Retained failures
    pub failed: usize,
    /// Attempts started since the queue opened
    pub attempts_total: u64,
}

struct JobRecord<J: Job> {
    spec: JobSpec<J>,
    state: JobState,
    attempts: u32,
    created_at: Instant,
    finished_at: Option<Instant>,
    result: Option<J::Output>,
    failure: Option<JobFailure>,
}

impl<J: Job> JobRecord<J> {
    fn snapshot(&self, id: JobId, now: Instant) -> JobSnapshot {
        JobSnapshot {
            id,
            kind: self.spec.job.kind().to_string(),
            dedup_key: self.spec.dedup_key.clone(),
            state: self.state,
            attempts: self.attempts,
            age: now.saturating_duration_since(self.created_at),
            failed_reason: self.failure.as_ref().map(JobFailure::to_payload),
        }
    }
}

struct QueueState<J: Job> {
    next_id: u64,
    jobs: HashMap<JobId, JobRecord<J>>,
    live_keys: HashMap<String, JobId>,
    waiting: VecDeque<JobId>,
    delayed: BTreeSet<(Instant, JobId)>,
    active: usize,
    completed: VecDeque<JobId>,
    failed: VecDeque<JobId>,
    notifier: Notifier<J::Output>,
    closed: bool,
    attempts_total: u64,
}

impl<J: Job> QueueState<J> {
    fn new() -> Self {
        Self {
            next_id: 1,
            jobs: HashMap::new(),
            live_keys: HashMap::new(),
            waiting: VecDeque::new(),
            delayed: BTreeSet::new(),
            active: 0,
            completed: VecDeque::new(),
            failed: VecDeque::new(),
            notifier: Notifier::new(),
            closed: false,
            attempts_total: 0,
        }
    }

    fn promote_due(&mut self, now: Instant) {
        while let Some(&(due, id)) = self.delayed.first() {
            if due > now {
                break;
            }
            self.delayed.pop_first();
            if let Some(record) = self.jobs.get_mut(&id) {
                record.state = JobState::Waiting;
                self.waiting.push_back(id);
            }
        }
    }

    /// Move a live job to its terminal state and deliver the outcome
    fn finish(&mut self, id: JobId, outcome: &Outcome<J::Output>, now: Instant) -> usize {
        let Some(record) = self.jobs.get_mut(&id) else {
            return 0;
        };
        record.finished_at = Some(now);
        match outcome {
            Ok(output) => {
                record.state = JobState::Completed;
                record.result = Some(output.clone());
                self.completed.push_back(id);
            }
            Err(failure) => {
                record.state = JobState::Failed;
                record.failure = Some(failure.clone());
                self.failed.push_back(id);
            }
        }

        let key = record.spec.dedup_key.clone();
        if self.live_keys.get(&key) == Some(&id) {
            self.live_keys.remove(&key);
        }
        self.notifier.publish(&key, outcome)
    }

    fn settle_active(&mut self, id: JobId, outcome: &Outcome<J::Output>, now: Instant) -> Option<usize> {
        let record = self.jobs.get(&id)?;
        if record.state != JobState::Active {
            return None;
        }
        self.active = self.active.saturating_sub(1);
        Some(self.finish(id, outcome, now))
    }

    fn retained_result(&self, key: &str, window: RetentionWindow, now: Instant) -> Option<(JobId, J::Output)> {
        self.completed.iter().rev().find_map(|id| {
            let record = self.jobs.get(id)?;
            let fresh = record
                .finished_at
                .is_some_and(|at| now.saturating_duration_since(at) <= window.max_age);
            if record.spec.dedup_key == key && fresh {
                record.result.clone().map(|output| (*id, output))
            } else {
                None
            }
        })
    }

    fn purge(&mut self, retention: &RetentionPolicy, now: Instant) -> usize {
        purge_settled(&mut self.completed, &mut self.jobs, retention.completed, now)
            + purge_settled(&mut self.failed, &mut self.jobs, retention.failed, now)
    }

    fn counts(&self) -> QueueCounts {
        QueueCounts {
            waiting: self.waiting.len(),
            delayed: self.delayed.len(),
            active: self.active,
            completed: self.completed.len(),
            failed: self.failed.len(),
            attempts_total: self.attempts_total,
        }
    }
}

/// Drop settled jobs beyond the window, oldest first
fn purge_settled<J: Job>(
    order: &mut VecDeque<JobId>,
    jobs: &mut HashMap<JobId, JobRecord<J>>,
    window: RetentionWindow,
    now: Instant,
) -> usize {
    let mut removed = 0;
    while let Some(&oldest) = order.front() {
        let expired = jobs
            .get(&oldest)
            .and_then(|record| record.finished_at)
            .is_none_or(|at| now.saturating_duration_since(at) > window.max_age);
        if !expired && order.len() <= window.max_count {
            break;
        }
        order.pop_front();
        jobs.remove(&oldest);
        removed += 1;
    }
    removed
}

/// In-process job store of one queue
pub struct JobQueue<J: Job> {
    name: String,
    concurrency: usize,
    retention: RetentionPolicy,
    serve_retained: bool,
    state: Mutex<QueueState<J>>,
    wakeup: Notify,
}

impl<J: Job> fmt::Debug for JobQueue<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JobQueue")
            .field("name", &self.name)
            .field("concurrency", &self.concurrency)
            .field("counts", &self.lock().counts())
            .finish_non_exhaustive()
    }
}

impl<J: Job> JobQueue<J> {
    /// Create an empty queue
    pub fn new(
        name: impl Into<String>,
        concurrency: usize,
        retention: RetentionPolicy,
        serve_retained: bool,
    ) -> Self {
        Self {
            name: name.into(),
            concurrency: concurrency.max(1),
            retention,
            serve_retained,
            state: Mutex::new(QueueState::new()),
            wakeup: Notify::new(),
        }
    }

    /// Queue name
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Maximum number of active jobs
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn lock(&self) -> MutexGuard<'_, QueueState<J>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Future that completes on the next state change a worker may care about
    pub(crate) fn changed(&self) -> Notified<'_> {
        self.wakeup.notified()
    }

    /// Add a job or attach to the live job with the same dedup key
    pub fn admit(&self, spec: JobSpec<J>) -> Admission<J::Output> {
        let now = Instant::now();
        let mut guard = self.lock();
        let state = &mut *guard;

        if state.closed {
            return Admission {
                job_id: None,
                disposition: Disposition::Rejected,
                waiter: Waiter::ready(Err(JobFailure::abandoned())),
            };
        }

        if let Some(&id) = state.live_keys.get(&spec.dedup_key) {
            let waiter = state.notifier.subscribe(&spec.dedup_key);
            debug!(queue = %self.name, job_id = %id, key = %spec.dedup_key, "attached to live job");
            return Admission {
                job_id: Some(id),
                disposition: Disposition::Attached,
                waiter,
            };
        }

        if self.serve_retained {
            state.purge(&self.retention, now);
            if let Some((id, output)) = state.retained_result(&spec.dedup_key, self.retention.completed, now) {
                debug!(queue = %self.name, job_id = %id, key = %spec.dedup_key, "served retained result");
                return Admission {
                    job_id: Some(id),
                    disposition: Disposition::Retained,
                    waiter: Waiter::ready(Ok(output)),
                };
            }
        }

        let id = JobId(state.next_id);
        state.next_id += 1;
        let waiter = state.notifier.subscribe(&spec.dedup_key);
        state.live_keys.insert(spec.dedup_key.clone(), id);
        state.waiting.push_back(id);
        debug!(queue = %self.name, job_id = %id, key = %spec.dedup_key, "job added");
        state.jobs.insert(
            id,
            JobRecord {
                spec,
                state: JobState::Waiting,
                attempts: 0,
                created_at: now,
                finished_at: None,
                result: None,
                failure: None,
            },
        );
        drop(guard);

        self.wakeup.notify_waiters();
        Admission {
            job_id: Some(id),
            disposition: Disposition::Created,
            waiter,
        }
    }

    /// Claim the next ready job if the concurrency bound allows
    pub fn claim_next(&self, now: Instant) -> Claim<J> {
        let mut guard = self.lock();
        let state = &mut *guard;
        if state.closed {
            return Claim::Closed;
        }

        state.promote_due(now);
        if state.active >= self.concurrency {
            return Claim::Saturated;
        }

        while let Some(id) = state.waiting.pop_front() {
            let Some(record) = state.jobs.get_mut(&id) else {
                continue;
            };
            record.state = JobState::Active;
            record.attempts += 1;
            state.active += 1;
            state.attempts_total += 1;
            return Claim::Job(ClaimedJob {
                id,
                job: record.spec.job.clone(),
                dedup_key: record.spec.dedup_key.clone(),
                cost: record.spec.cost,
                attempt: record.attempts,
            });
        }

        Claim::Idle {
            next_due: state.delayed.first().map(|&(due, _)| due),
        }
    }

    /// Settle an active job successfully; returns how many waiters received the result
    pub fn complete(&self, id: JobId, output: J::Output) -> usize {
        self.settle(id, &Ok(output))
    }

    /// Settle an active job with a failure; returns how many waiters received it
    pub fn fail(&self, id: JobId, failure: JobFailure) -> usize {
        self.settle(id, &Err(failure))
    }

    fn settle(&self, id: JobId, outcome: &Outcome<J::Output>) -> usize {
        let now = Instant::now();
        let delivered = {
            let mut guard = self.lock();
            let state = &mut *guard;
            let delivered = state.settle_active(id, outcome, now);
            state.purge(&self.retention, now);
            delivered
        };
        self.wakeup.notify_waiters();
        delivered.unwrap_or(0)
    }

    /// Put an active job back after a failed attempt, ready again after `delay`
    ///
    /// Once the queue is closed no worker claims delayed jobs, so the job fails with
    /// `failure` instead.
    pub fn retry(&self, id: JobId, failure: JobFailure, delay: Duration) {
        let now = Instant::now();
        {
            let mut guard = self.lock();
            let state = &mut *guard;
            if state.closed {
                let delivered = state.settle_active(id, &Err(failure), now);
                debug!(queue = %self.name, job_id = %id, ?delivered, "queue closed, failing instead of retrying");
            } else {
                let Some(record) = state.jobs.get_mut(&id) else {
                    return;
                };
                if record.state != JobState::Active {
                    return;
                }
                record.state = JobState::Delayed;
                record.failure = Some(failure);
                state.active = state.active.saturating_sub(1);
                state.delayed.insert((now + delay, id));
            }
        }
        self.wakeup.notify_waiters();
    }

    /// Stop accepting and claiming jobs
    ///
    /// Waiting and delayed jobs fail as abandoned. Active jobs keep running and still
    /// deliver their outcome. Returns the number of abandoned jobs.
    pub fn close(&self) -> usize {
        let now = Instant::now();
        let abandoned = {
            let mut guard = self.lock();
            let state = &mut *guard;
            state.closed = true;
            let delayed = std::mem::take(&mut state.delayed);
            let pending: Vec<JobId> = state
                .waiting
                .drain(..)
                .chain(delayed.into_iter().map(|(_, id)| id))
                .collect();
            let failure = Err(JobFailure::abandoned());
            for id in &pending {
                state.finish(*id, &failure, now);
            }
            pending.len()
        };
        self.wakeup.notify_waiters();
        abandoned
    }

    /// Whether [`JobQueue::close`] was called
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Jobs per state
    pub fn counts(&self) -> QueueCounts {
        let now = Instant::now();
        let mut guard = self.lock();
        guard.purge(&self.retention, now);
        guard.counts()
    }

    /// Snapshots of the jobs in `state`, oldest first
    pub fn jobs(&self, state: JobState) -> Vec<JobSnapshot> {
        let now = Instant::now();
        let mut guard = self.lock();
        guard.purge(&self.retention, now);
        let queue = &*guard;

        let ids: Vec<JobId> = match state {
            JobState::Waiting => queue.waiting.iter().copied().collect(),
            JobState::Delayed => queue.delayed.iter().map(|&(_, id)| id).collect(),
            JobState::Active => {
                let mut ids: Vec<JobId> = queue
                    .jobs
                    .iter()
                    .filter(|(_, record)| record.state == JobState::Active)
                    .map(|(id, _)| *id)
                    .collect();
                ids.sort_unstable();
                ids
            }
            JobState::Completed => queue.completed.iter().copied().collect(),
            JobState::Failed => queue.failed.iter().copied().collect(),
        };

        ids.into_iter()
            .filter_map(|id| queue.jobs.get(&id).map(|record| record.snapshot(id, now)))
            .collect()
    }

    /// Snapshot of one job
    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        let now = Instant::now();
        self.lock().jobs.get(&id).map(|record| record.snapshot(id, now))
    }

    /// Callers currently waiting on `key`
    pub fn waiters(&self, key: &str) -> usize {
        self.lock().notifier.subscriber_count(key)
    }
}
