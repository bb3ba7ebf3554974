// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Token bucket rate limiting
//!
//! A bucket holds at most `capacity` points and refills continuously at
//! `capacity / refill` points per unit of time. A consume either takes the full cost or
//! takes nothing and reports how long until the cost would fit.
//!
//! Buckets live in a [`RateLimitStore`] under a namespace, so every worker of a queue,
//! and with a shared store every process, draws from the same budget.

use std::{sync::Arc, time::Duration};

use dashmap::DashMap;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::error::{ConfigError, StoreError};

/// Floating point slack when comparing available points to a cost
const POINT_EPSILON: f64 = 1e-9;

/// Sleep used when the store reports a denial without a wait hint
const MIN_RETRY_DELAY: Duration = Duration::from_millis(100);

/// Sleep after the store itself failed
const STORE_FAILURE_DELAY: Duration = Duration::from_secs(1);

/// Capacity and refill window of a bucket
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BucketPolicy {
    capacity: f64,
    refill: Duration,
}

impl BucketPolicy {
    /// Create a policy
    ///
    /// # Errors
    ///
    /// Rejects a non-positive or non-finite capacity and a zero window
    pub fn new(capacity: f64, refill: Duration) -> Result<Self, ConfigError> {
        if !capacity.is_finite() || capacity <= 0.0 {
            return Err(ConfigError::InvalidLimit(capacity));
        }
        if refill.is_zero() {
            return Err(ConfigError::ZeroDuration);
        }
        Ok(Self { capacity, refill })
    }

    /// Points per window
    pub fn capacity(&self) -> f64 {
        self.capacity
    }

    /// Refill window
    pub fn refill(&self) -> Duration {
        self.refill
    }

    /// Points regained per second
    pub fn rate_per_second(&self) -> f64 {
        self.capacity / self.refill.as_secs_f64()
    }
}

/// Result of a consume attempt
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Consumption {
    /// The cost was taken
    Granted {
        /// Points left afterwards
        remaining: f64,
    },
    /// Not enough points; nothing was taken
    Denied {
        /// Time until the cost would fit
        retry_after: Duration,
    },
}

impl Consumption {
    /// Whether the cost was taken
    pub fn is_granted(&self) -> bool {
        matches!(self, Consumption::Granted { .. })
    }
}

/// Bucket state: available points as of the last refill
#[derive(Debug, Clone, Copy)]
pub struct TokenBucket {
    available: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// A bucket that starts full
    pub fn full(policy: &BucketPolicy, now: Instant) -> Self {
        Self {
            available: policy.capacity,
            last_refill: now,
        }
    }

    /// Points available after accruing refill up to `now`
    pub fn available(&mut self, policy: &BucketPolicy, now: Instant) -> f64 {
        self.refill(policy, now);
        self.available
    }

    fn refill(&mut self, policy: &BucketPolicy, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill);
        let gained = elapsed.as_secs_f64() * policy.rate_per_second();
        self.available = (self.available + gained).min(policy.capacity);
        self.last_refill = now;
    }

    /// Take `cost` points if available
    ///
    /// A denial only accrues pending refill; it never removes points.
    pub fn try_consume(&mut self, policy: &BucketPolicy, cost: f64, now: Instant) -> Consumption {
        self.refill(policy, now);
        if self.available + POINT_EPSILON >= cost {
            self.available = (self.available - cost).max(0.0);
            Consumption::Granted {
                remaining: self.available,
            }
        } else {
            let deficit = cost - self.available;
            let millis = (deficit / policy.rate_per_second() * 1000.0).ceil();
            #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
            let retry_after = Duration::from_millis(millis.max(1.0) as u64);
            Consumption::Denied { retry_after }
        }
    }
}

/// Storage for named token buckets
pub trait RateLimitStore: Send + Sync + 'static {
    /// Atomically consume `cost` points from the bucket named `namespace`
    ///
    /// Missing buckets start full.
    fn try_consume(
        &self,
        namespace: &str,
        policy: BucketPolicy,
        cost: f64,
    ) -> impl Future<Output = Result<Consumption, StoreError>> + Send;
}

/// In-process bucket store
#[derive(Debug, Default)]
pub struct MemoryRateLimitStore {
    buckets: DashMap<String, TokenBucket>,
}

impl MemoryRateLimitStore {
    /// Create an empty store
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of buckets created so far
    pub fn len(&self) -> usize {
        self.buckets.len()
    }

    /// Whether no bucket has been used yet
    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}

impl RateLimitStore for MemoryRateLimitStore {
    async fn try_consume(
        &self,
        namespace: &str,
        policy: BucketPolicy,
        cost: f64,
    ) -> Result<Consumption, StoreError> {
        let now = Instant::now();
        let mut bucket = self
            .buckets
            .entry(namespace.to_string())
            .or_insert_with(|| TokenBucket::full(&policy, now));
        Ok(bucket.try_consume(&policy, cost, now))
    }
}

/// Waiting for capacity exceeded the configured timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("timed out waiting for rate limiter capacity after {}ms", .waited.as_millis())]
pub struct RateLimitTimeout {
    /// Time spent waiting
    pub waited: Duration,
}

/// A bucket namespace bound to its policy and store
#[derive(Debug)]
pub struct RateLimiter<L> {
    store: Arc<L>,
    namespace: String,
    policy: BucketPolicy,
}

impl<L> Clone for RateLimiter<L> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            namespace: self.namespace.clone(),
            policy: self.policy,
        }
    }
}

impl<L: RateLimitStore> RateLimiter<L> {
    /// Create a limiter for `namespace`
    pub fn new(store: Arc<L>, namespace: impl Into<String>, policy: BucketPolicy) -> Self {
        Self {
            store,
            namespace: namespace.into(),
            policy,
        }
    }

    /// Namespace of the bucket
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Bucket policy
    pub fn policy(&self) -> BucketPolicy {
        self.policy
    }

    /// Single consume attempt
    pub async fn try_consume(&self, cost: f64) -> Result<Consumption, StoreError> {
        self.store.try_consume(&self.namespace, self.policy, cost).await
    }

    /// Consume `cost` points, sleeping between attempts
    ///
    /// Gives up once `timeout` has passed since the first attempt; sleeps never run past
    /// that deadline. Store failures are logged and retried under the same deadline.
    pub async fn acquire(&self, cost: f64, timeout: Duration) -> Result<Duration, RateLimitTimeout> {
        let started = Instant::now();
        loop {
            let delay = match self.try_consume(cost).await {
                Ok(Consumption::Granted { remaining }) => {
                    let waited = started.elapsed();
                    debug!(
                        namespace = %self.namespace,
                        cost,
                        remaining,
                        waited_ms = waited.as_millis(),
                        "rate limiter points consumed"
                    );
                    return Ok(waited);
                }
                Ok(Consumption::Denied { retry_after }) => {
                    if retry_after.is_zero() {
                        MIN_RETRY_DELAY
                    } else {
                        retry_after
                    }
                }
                Err(err) => {
                    warn!(namespace = %self.namespace, error = %err, "rate limit store failed");
                    STORE_FAILURE_DELAY
                }
            };

            let waited = started.elapsed();
            if waited >= timeout {
                return Err(RateLimitTimeout { waited });
            }
            tokio::time::sleep(delay.min(timeout - waited)).await;
        }
    }
}
