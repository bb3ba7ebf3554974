// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Queued, rate-limited and deduplicating dispatcher
//!
//! Every call to an upstream provider goes through a [`FetchQueue`]. The dispatcher
//! gives three guarantees:
//!
//! - **Deduplication**: while a job with a given dedup key is waiting, delayed or
//!   active, further submissions with the same key attach to it and resolve with its
//!   outcome instead of creating another upstream call.
//! - **Rate limiting**: before each attempt a worker takes the job's cost from a shared
//!   token bucket ([`RateLimiter`]), waiting until points are available or a wait
//!   timeout expires.
//! - **Retries**: transient failures are retried with exponential backoff; client
//!   errors (4xx other than 429) fail immediately with their original status.
//!
//! ```ignore
//! let store = Arc::new(MemoryRateLimitStore::new());
//! let queue = FetchQueue::start(config, operation, store, CancellationToken::new())?;
//! let balances = queue.fetch(CovalentJob::balances(wallet, chain)).await?;
//! ```

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod job;
pub mod notifier;
pub mod queue;
pub mod rate_limiter;
#[cfg(feature = "redis")]
pub mod redis_store;
pub mod worker;

pub use config::{QueueConfig, QueueOptions, RetentionPolicy, RetentionWindow};
pub use dispatcher::{FetchQueue, JobHandle};
pub use error::{ConfigError, FailureReason, FetchError, JobFailure, StoreError};
pub use job::{FnOperation, Job, JobId, JobKind, JobSnapshot, JobSpec, JobState, Operation, from_fn};
pub use notifier::{Notifier, Outcome, Waiter};
pub use queue::{Admission, Claim, ClaimedJob, Disposition, JobQueue, QueueCounts};
pub use rate_limiter::{
    BucketPolicy, Consumption, MemoryRateLimitStore, RateLimitStore, RateLimitTimeout, RateLimiter,
    TokenBucket,
};
#[cfg(feature = "redis")]
pub use redis_store::RedisRateLimitStore;
pub use worker::{RetryDecision, RetryPolicy};
