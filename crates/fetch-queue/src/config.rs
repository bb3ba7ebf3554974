// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Queue configuration

use std::{collections::HashMap, time::Duration};

use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, DurationSeconds, serde_as};

use crate::{
    error::ConfigError,
    job::JobKind,
    rate_limiter::BucketPolicy,
    worker::RetryPolicy,
};

/// How many settled jobs of one state are kept, and for how long
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionWindow {
    /// Jobs older than this are purged
    #[serde_as(as = "DurationSeconds<u64>")]
    pub max_age: Duration,
    /// At most this many jobs are kept, oldest purged first
    pub max_count: usize,
}

/// Retention of settled jobs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetentionPolicy {
    /// Completed jobs
    pub completed: RetentionWindow,
    /// Failed jobs
    pub failed: RetentionWindow,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            completed: RetentionWindow {
                max_age: Duration::from_secs(3600),
                max_count: 1000,
            },
            failed: RetentionWindow {
                max_age: Duration::from_secs(3600),
                max_count: 5000,
            },
        }
    }
}

/// Tunables shared by every queue, loadable from configuration files
#[serde_as]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueOptions {
    /// Worker count; defaults to how many of the cheapest jobs fit in one refill window
    pub concurrency: Option<usize>,
    /// Maximum attempts per job, including the first
    pub attempts: u32,
    /// Base delay of the exponential backoff between attempts
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub backoff_delay: Duration,
    /// Longest a worker waits for limiter capacity before failing the job
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    pub rate_limit_wait_timeout: Duration,
    /// Retention of settled jobs
    pub retention: RetentionPolicy,
    /// Answer a submission from a retained completed job with the same key instead of
    /// running the operation again
    pub serve_retained: bool,
}

impl Default for QueueOptions {
    fn default() -> Self {
        Self {
            concurrency: None,
            attempts: 5,
            backoff_delay: Duration::from_millis(1000),
            rate_limit_wait_timeout: Duration::from_secs(30),
            retention: RetentionPolicy::default(),
            serve_retained: false,
        }
    }
}

/// Full configuration of one queue
#[derive(Debug, Clone, PartialEq)]
pub struct QueueConfig<K: JobKind> {
    /// Queue name, also the rate limiter namespace
    pub name: String,
    /// Limiter points charged per attempt, by job kind
    pub costs: HashMap<K, f64>,
    /// Points refilled per window
    pub limit_amount: f64,
    /// Refill window
    pub limit_duration: Duration,
    /// Tunables
    pub options: QueueOptions,
}

impl<K: JobKind> QueueConfig<K> {
    /// Create a configuration with default options
    pub fn new(
        name: impl Into<String>,
        costs: impl IntoIterator<Item = (K, f64)>,
        limit_amount: f64,
        limit_duration: Duration,
    ) -> Self {
        Self {
            name: name.into(),
            costs: costs.into_iter().collect(),
            limit_amount,
            limit_duration,
            options: QueueOptions::default(),
        }
    }

    /// Replace the tunables
    #[must_use]
    pub fn with_options(mut self, options: QueueOptions) -> Self {
        self.options = options;
        self
    }

    /// Check costs and limits against each other
    pub fn validate(&self) -> Result<(), ConfigError> {
        let policy = self.bucket_policy()?;

        if self.costs.is_empty() {
            return Err(ConfigError::EmptyCosts {
                queue: self.name.clone(),
            });
        }

        for kind in K::all() {
            let Some(&cost) = self.costs.get(kind) else {
                return Err(ConfigError::MissingCost {
                    queue: self.name.clone(),
                    kind: kind.to_string(),
                });
            };
            if !cost.is_finite() || cost <= 0.0 {
                return Err(ConfigError::InvalidCost {
                    queue: self.name.clone(),
                    kind: kind.to_string(),
                    cost,
                });
            }
            if cost > policy.capacity() {
                return Err(ConfigError::CostExceedsCapacity {
                    queue: self.name.clone(),
                    kind: kind.to_string(),
                    cost,
                    capacity: policy.capacity(),
                });
            }
        }

        if self.options.concurrency == Some(0) {
            return Err(ConfigError::ZeroConcurrency {
                queue: self.name.clone(),
            });
        }
        if self.options.attempts == 0 {
            return Err(ConfigError::ZeroAttempts {
                queue: self.name.clone(),
            });
        }
        Ok(())
    }

    /// Limiter cost of a job kind
    pub fn cost_of(&self, kind: K) -> Option<f64> {
        self.costs.get(&kind).copied()
    }

    /// Number of workers
    ///
    /// Without an override this is how many of the cheapest jobs the limiter admits in
    /// one window, and never less than one.
    pub fn concurrency(&self) -> usize {
        if let Some(concurrency) = self.options.concurrency {
            return concurrency.max(1);
        }
        let min_cost = self
            .costs
            .values()
            .copied()
            .filter(|cost| cost.is_finite() && *cost > 0.0)
            .fold(f64::INFINITY, f64::min);
        if !min_cost.is_finite() {
            return 1;
        }
        #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let fits = (self.limit_amount / min_cost).floor() as usize;
        fits.max(1)
    }

    /// Token bucket parameters
    pub fn bucket_policy(&self) -> Result<BucketPolicy, ConfigError> {
        BucketPolicy::new(self.limit_amount, self.limit_duration)
    }

    /// Retry parameters
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            attempts: self.options.attempts,
            backoff_delay: self.options.backoff_delay,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::testing::TestKind;

    fn config(light: f64, heavy: f64, limit: f64) -> QueueConfig<TestKind> {
        QueueConfig::new(
            "test",
            [(TestKind::Light, light), (TestKind::Heavy, heavy)],
            limit,
            Duration::from_secs(1),
        )
    }

    #[test]
    fn default_concurrency_fits_cheapest_job() {
        // alchemy-like: 330 points, costs 60 and 120
        assert_eq!(config(60.0, 120.0, 330.0).concurrency(), 5);
        // covalent-like: 40 points, costs 10 and 11
        assert_eq!(config(10.0, 11.0, 40.0).concurrency(), 4);
        // never below one
        assert_eq!(config(10.0, 11.0, 11.0).concurrency(), 1);
    }

    #[test]
    fn concurrency_override_wins() {
        let cfg = config(10.0, 11.0, 40.0).with_options(QueueOptions {
            concurrency: Some(2),
            ..QueueOptions::default()
        });
        assert_eq!(cfg.concurrency(), 2);
    }

    #[test]
    fn validation_rejects_bad_costs() {
        tokio_test::assert_ok!(config(10.0, 11.0, 40.0).validate());
        assert!(matches!(
            config(0.0, 11.0, 40.0).validate(),
            Err(ConfigError::InvalidCost { .. })
        ));
        assert!(matches!(
            config(10.0, 50.0, 40.0).validate(),
            Err(ConfigError::CostExceedsCapacity { .. })
        ));

        let missing = QueueConfig::new("test", [(TestKind::Light, 1.0)], 10.0, Duration::from_secs(1));
        assert!(matches!(missing.validate(), Err(ConfigError::MissingCost { .. })));
    }

    #[test]
    fn validation_rejects_bad_limits() {
        assert!(matches!(config(1.0, 1.0, 0.0).validate(), Err(ConfigError::InvalidLimit(_))));

        let zero_window = QueueConfig::new(
            "test",
            [(TestKind::Light, 1.0), (TestKind::Heavy, 1.0)],
            10.0,
            Duration::ZERO,
        );
        assert_eq!(zero_window.validate(), Err(ConfigError::ZeroDuration));
    }

    #[test]
    fn options_deserialize_with_defaults() {
        let options: QueueOptions =
            serde_json::from_str(r#"{"attempts": 3, "backoff_delay": 250}"#).unwrap();
        assert_eq!(options.attempts, 3);
        assert_eq!(options.backoff_delay, Duration::from_millis(250));
        assert_eq!(options.rate_limit_wait_timeout, Duration::from_secs(30));
        assert_eq!(options.retention.failed.max_count, 5000);
        assert!(!options.serve_retained);
    }
}
