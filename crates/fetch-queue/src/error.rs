// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error types for the dispatcher

use std::time::Duration;

use api_client::CodedError;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors returned to callers of [`crate::FetchQueue::fetch`]
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// The job was rejected before it reached the queue
    #[error("validation error: {0}")]
    Validation(String),

    /// The upstream operation failed; code and message are preserved
    #[error(transparent)]
    Upstream(#[from] CodedError),

    /// No rate limiter capacity became available in time
    #[error("{message}")]
    RateLimitTimeout {
        /// Human readable description including the time waited
        message: String,
    },

    /// The queue shut down before the job settled
    #[error("fetch queue shut down before the job settled")]
    Abandoned,
}

impl FetchError {
    /// HTTP-style status code for this error
    pub fn status_code(&self) -> u16 {
        match self {
            FetchError::Validation(_) => 400,
            FetchError::Upstream(err) => err.code(),
            FetchError::RateLimitTimeout { .. } | FetchError::Abandoned => 503,
        }
    }
}

/// Why a job ended up in the failed state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FailureReason {
    /// The operation returned an error that was not retried further
    Upstream,
    /// The worker gave up waiting for rate limiter capacity
    RateLimitTimeout,
    /// The queue closed while the job was still pending
    Abandoned,
}

/// Terminal failure recorded on a job and delivered to every waiter
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobFailure {
    /// Failure category
    pub reason: FailureReason,
    /// Status code reported by the operation, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub code: Option<u16>,
    /// Failure message
    pub message: String,
}

impl JobFailure {
    /// Failure carrying an operation error
    pub fn upstream(err: &CodedError) -> Self {
        Self {
            reason: FailureReason::Upstream,
            code: Some(err.code()),
            message: err.message().to_string(),
        }
    }

    /// Failure after waiting `waited` for rate limiter capacity
    pub fn rate_limit_timeout(waited: Duration) -> Self {
        Self {
            reason: FailureReason::RateLimitTimeout,
            code: None,
            message: format!(
                "timed out waiting for rate limiter capacity after {}ms",
                waited.as_millis()
            ),
        }
    }

    /// Failure of a job that never ran because the queue closed
    pub fn abandoned() -> Self {
        Self {
            reason: FailureReason::Abandoned,
            code: None,
            message: "queue closed before the job ran".to_string(),
        }
    }

    /// Serialized form stored as the job's failed reason
    pub fn to_payload(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| self.message.clone())
    }

    /// Status and message as a coded error; generic server error when no code was recorded
    pub fn into_coded(self) -> CodedError {
        match self.code {
            Some(code) => CodedError::new(code, self.message),
            None => CodedError::internal(self.message),
        }
    }

    /// Convert into the error returned to callers
    pub fn into_fetch_error(self) -> FetchError {
        match self.reason {
            FailureReason::Upstream => FetchError::Upstream(self.into_coded()),
            FailureReason::RateLimitTimeout => FetchError::RateLimitTimeout {
                message: self.message,
            },
            FailureReason::Abandoned => FetchError::Abandoned,
        }
    }
}

/// Rate limit store failures
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store could not be reached or returned an unexpected reply
    #[error("rate limit store unavailable: {0}")]
    Unavailable(String),
}

/// Invalid queue configuration, detected when the queue is created
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    /// No job kinds were given a cost
    #[error("queue '{queue}' has no job costs configured")]
    EmptyCosts {
        /// Queue name
        queue: String,
    },

    /// A job kind has no cost
    #[error("queue '{queue}' has no cost for job kind '{kind}'")]
    MissingCost {
        /// Queue name
        queue: String,
        /// Job kind
        kind: String,
    },

    /// A cost is zero, negative or not finite
    #[error("queue '{queue}' has invalid cost {cost} for job kind '{kind}'")]
    InvalidCost {
        /// Queue name
        queue: String,
        /// Job kind
        kind: String,
        /// Configured cost
        cost: f64,
    },

    /// A single job could never be admitted by the limiter
    #[error("queue '{queue}': cost {cost} of '{kind}' exceeds the limiter capacity {capacity}")]
    CostExceedsCapacity {
        /// Queue name
        queue: String,
        /// Job kind
        kind: String,
        /// Configured cost
        cost: f64,
        /// Points per refill window
        capacity: f64,
    },

    /// Limiter capacity is zero, negative or not finite
    #[error("invalid rate limit amount: {0}")]
    InvalidLimit(f64),

    /// Limiter refill window is zero
    #[error("rate limit duration must be greater than zero")]
    ZeroDuration,

    /// Concurrency override of zero
    #[error("queue '{queue}' concurrency must be at least 1")]
    ZeroConcurrency {
        /// Queue name
        queue: String,
    },

    /// Attempt budget of zero
    #[error("queue '{queue}' must allow at least one attempt")]
    ZeroAttempts {
        /// Queue name
        queue: String,
    },
}
