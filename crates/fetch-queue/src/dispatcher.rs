// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Caller-facing queue façade

use std::{
    collections::HashMap,
    fmt,
    sync::{Arc, Mutex, PoisonError},
};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::QueueConfig,
    error::{ConfigError, FetchError},
    job::{Job, JobId, JobSnapshot, JobSpec, JobState, Operation},
    notifier::Waiter,
    queue::{Disposition, JobQueue, QueueCounts},
    rate_limiter::{RateLimitStore, RateLimiter},
    worker::Worker,
};

/// A queue of one provider's jobs together with its workers
pub struct FetchQueue<J: Job> {
    queue: Arc<JobQueue<J>>,
    costs: HashMap<J::Kind, f64>,
    cancel: CancellationToken,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl<J: Job> fmt::Debug for FetchQueue<J> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FetchQueue")
            .field("queue", &self.queue)
            .field("costs", &self.costs)
            .finish_non_exhaustive()
    }
}

impl<J: Job> FetchQueue<J> {
    /// Validate `config` and spawn its workers on the current runtime
    ///
    /// Workers stop when `cancel` fires or the queue is dropped. Firing `cancel` also
    /// closes the queue: pending and later submissions fail as abandoned.
    pub fn start<O, L>(
        config: QueueConfig<J::Kind>,
        operation: O,
        store: Arc<L>,
        cancel: CancellationToken,
    ) -> Result<Self, ConfigError>
    where
        O: Operation<J>,
        L: RateLimitStore,
    {
        config.validate()?;
        let policy = config.bucket_policy()?;
        let concurrency = config.concurrency();

        let queue = Arc::new(JobQueue::new(
            config.name.clone(),
            concurrency,
            config.options.retention,
            config.options.serve_retained,
        ));
        let operation = Arc::new(operation);
        let limiter = RateLimiter::new(store, config.name.clone(), policy);

        let mut workers: Vec<JoinHandle<()>> = (0..concurrency)
            .map(|index| {
                let worker = Worker {
                    index,
                    queue: Arc::clone(&queue),
                    operation: Arc::clone(&operation),
                    limiter: limiter.clone(),
                    retry: config.retry_policy(),
                    wait_timeout: config.options.rate_limit_wait_timeout,
                    cancel: cancel.clone(),
                };
                tokio::spawn(worker.run())
            })
            .collect();
        workers.push(tokio::spawn(close_on_cancel(Arc::clone(&queue), cancel.clone())));

        info!(
            queue = %config.name,
            concurrency,
            limit_amount = config.limit_amount,
            limit_duration_ms = config.limit_duration.as_millis(),
            attempts = config.options.attempts,
            "fetch queue started"
        );

        Ok(Self {
            queue,
            costs: config.costs,
            cancel,
            workers: Mutex::new(workers),
        })
    }

    /// Queue name
    pub fn name(&self) -> &str {
        self.queue.name()
    }

    /// Number of workers
    pub fn concurrency(&self) -> usize {
        self.queue.concurrency()
    }

    /// Submit `job` and wait for its outcome
    ///
    /// Identical submissions made while a job is live resolve with that job's outcome.
    pub async fn fetch(&self, job: J) -> Result<J::Output, FetchError> {
        self.enqueue(job)?.wait().await
    }

    /// Submit `job` without waiting
    pub fn enqueue(&self, job: J) -> Result<JobHandle<J::Output>, FetchError> {
        job.validate().map_err(FetchError::Validation)?;
        let kind = job.kind();
        let cost = self
            .costs
            .get(&kind)
            .copied()
            .ok_or_else(|| FetchError::Validation(format!("no cost configured for job kind '{kind}'")))?;

        let admission = self.queue.admit(JobSpec::new(job, cost));
        Ok(JobHandle {
            job_id: admission.job_id,
            disposition: admission.disposition,
            waiter: admission.waiter,
        })
    }

    /// Jobs per state
    pub fn counts(&self) -> QueueCounts {
        self.queue.counts()
    }

    /// Snapshots of the jobs in `state`
    pub fn jobs(&self, state: JobState) -> Vec<JobSnapshot> {
        self.queue.jobs(state)
    }

    /// Snapshot of one job
    pub fn job(&self, id: JobId) -> Option<JobSnapshot> {
        self.queue.job(id)
    }

    /// Close the queue and wait for workers to finish their current attempt
    ///
    /// Returns the number of pending jobs that were abandoned.
    pub async fn shutdown(&self) -> usize {
        let abandoned = self.queue.close();
        self.cancel.cancel();

        let workers = std::mem::take(&mut *self.workers.lock().unwrap_or_else(PoisonError::into_inner));
        for worker in workers {
            if let Err(err) = worker.await {
                warn!(queue = %self.queue.name(), error = %err, "worker ended abnormally");
            }
        }
        info!(queue = %self.queue.name(), abandoned, "fetch queue stopped");
        abandoned
    }
}

impl<J: Job> Drop for FetchQueue<J> {
    fn drop(&mut self) {
        self.queue.close();
        self.cancel.cancel();
    }
}

async fn close_on_cancel<J: Job>(queue: Arc<JobQueue<J>>, cancel: CancellationToken) {
    cancel.cancelled().await;
    if !queue.is_closed() {
        let abandoned = queue.close();
        info!(queue = %queue.name(), abandoned, "fetch queue cancelled");
    }
}

/// A submitted job
#[derive(Debug)]
pub struct JobHandle<O> {
    job_id: Option<JobId>,
    disposition: Disposition,
    waiter: Waiter<O>,
}

impl<O> JobHandle<O> {
    /// Job the submission resolves with; `None` if the queue was closed
    pub fn id(&self) -> Option<JobId> {
        self.job_id
    }

    /// How the submission was admitted
    pub fn disposition(&self) -> Disposition {
        self.disposition
    }

    /// Wait for the job to settle
    ///
    /// Dropping the returned future stops waiting without affecting the job or other
    /// callers.
    pub async fn wait(self) -> Result<O, FetchError> {
        match self.waiter.wait().await {
            Some(Ok(output)) => Ok(output),
            Some(Err(failure)) => Err(failure.into_fetch_error()),
            None => Err(FetchError::Abandoned),
        }
    }
}
