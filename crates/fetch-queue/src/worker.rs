// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Workers and retry policy

use std::{sync::Arc, time::Duration};

use api_client::CodedError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use crate::{
    error::JobFailure,
    job::{Job, Operation},
    queue::{Claim, ClaimedJob, JobQueue},
    rate_limiter::{RateLimitStore, RateLimiter},
};

/// Attempt budget and backoff
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum attempts including the first
    pub attempts: u32,
    /// Delay before the second attempt; doubles for each later one
    pub backoff_delay: Duration,
}

/// What to do after a failed attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Try again after `delay`
    Retry {
        /// Backoff before the next attempt
        delay: Duration,
    },
    /// Client error; retrying cannot help
    NonRetryable,
    /// All attempts used
    Exhausted,
}

impl RetryPolicy {
    /// Backoff after attempt number `attempt` (1-based)
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.backoff_delay.saturating_mul(1 << exponent)
    }

    /// Classify a failed attempt
    pub fn decide(&self, attempt: u32, err: &CodedError) -> RetryDecision {
        if !err.is_retryable() {
            RetryDecision::NonRetryable
        } else if attempt >= self.attempts {
            RetryDecision::Exhausted
        } else {
            RetryDecision::Retry {
                delay: self.backoff_for(attempt),
            }
        }
    }
}

pub(crate) struct Worker<J: Job, O, L> {
    pub(crate) index: usize,
    pub(crate) queue: Arc<JobQueue<J>>,
    pub(crate) operation: Arc<O>,
    pub(crate) limiter: RateLimiter<L>,
    pub(crate) retry: RetryPolicy,
    pub(crate) wait_timeout: Duration,
    pub(crate) cancel: CancellationToken,
}

impl<J, O, L> Worker<J, O, L>
where
    J: Job,
    O: Operation<J>,
    L: RateLimitStore,
{
    pub(crate) async fn run(self) {
        debug!(queue = %self.queue.name(), worker = self.index, "worker started");
        loop {
            let changed = self.queue.changed();
            tokio::pin!(changed);
            changed.as_mut().enable();

            match self.queue.claim_next(Instant::now()) {
                Claim::Job(claimed) => self.process(claimed).await,
                Claim::Idle {
                    next_due: Some(due),
                } => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = &mut changed => {}
                        () = tokio::time::sleep_until(due) => {}
                    }
                }
                Claim::Idle { next_due: None } | Claim::Saturated => {
                    tokio::select! {
                        () = self.cancel.cancelled() => break,
                        () = &mut changed => {}
                    }
                }
                Claim::Closed => break,
            }
        }
        debug!(queue = %self.queue.name(), worker = self.index, "worker stopped");
    }

    async fn process(&self, claimed: ClaimedJob<J>) {
        let span = info_span!(
            "job",
            queue = %self.queue.name(),
            job_id = %claimed.id,
            kind = %claimed.job.kind(),
            attempt = claimed.attempt,
        );
        self.attempt(claimed).instrument(span).await;
    }

    async fn attempt(&self, claimed: ClaimedJob<J>) {
        if let Err(timeout) = self.limiter.acquire(claimed.cost, self.wait_timeout).await {
            error!(waited_ms = timeout.waited.as_millis(), "gave up waiting for rate limiter");
            self.queue
                .fail(claimed.id, JobFailure::rate_limit_timeout(timeout.waited));
            return;
        }

        let started = Instant::now();
        let operation = Arc::clone(&self.operation);
        let job = claimed.job;
        let result = tokio::spawn(async move { operation.execute(&job).await })
            .await
            .unwrap_or_else(|join_err| Err(CodedError::internal(format!("operation aborted: {join_err}"))));
        let elapsed_ms = started.elapsed().as_millis();

        match result {
            Ok(output) => {
                let delivered = self.queue.complete(claimed.id, output);
                info!(elapsed_ms, delivered, "job completed");
            }
            Err(err) => match self.retry.decide(claimed.attempt, &err) {
                RetryDecision::Retry { delay } => {
                    warn!(
                        code = err.code(),
                        error = %err.message(),
                        delay_ms = delay.as_millis(),
                        "attempt failed, retrying"
                    );
                    self.queue.retry(claimed.id, JobFailure::upstream(&err), delay);
                }
                decision => {
                    error!(
                        code = err.code(),
                        error = %err.message(),
                        ?decision,
                        "job failed"
                    );
                    self.queue.fail(claimed.id, JobFailure::upstream(&err));
                }
            },
        }
    }
}
