// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Job model
//!
//! A provider describes its request types as a [`Job`] whose [`JobKind`] selects the
//! rate limiter cost, and supplies an [`Operation`] that performs the upstream call.

use std::{fmt, future::Future, hash::Hash, time::Duration};

use api_client::CodedError;
use serde::{Deserialize, Serialize};
use serde_with::{DurationMilliSeconds, serde_as};

/// Closed set of request types handled by one queue
pub trait JobKind: Copy + Eq + Hash + fmt::Debug + fmt::Display + Send + Sync + 'static {
    /// Every kind, used to check that each one has a cost
    fn all() -> &'static [Self];
}

/// A unit of upstream work
pub trait Job: Clone + fmt::Debug + Send + Sync + 'static {
    /// The request type selector
    type Kind: JobKind;
    /// Value produced by a successful operation
    type Output: Clone + Send + Sync + 'static;

    /// Request type of this job
    fn kind(&self) -> Self::Kind;

    /// Key identifying logically identical requests
    ///
    /// Must be derived from the kind and every parameter that changes the upstream
    /// response, normalised the same way the operation normalises them.
    fn dedup_key(&self) -> String;

    /// Reject malformed parameters before the job is queued
    fn validate(&self) -> Result<(), String> {
        Ok(())
    }
}

/// Performs the upstream call for a job
pub trait Operation<J: Job>: Send + Sync + 'static {
    /// Execute one attempt
    fn execute(&self, job: &J) -> impl Future<Output = Result<J::Output, CodedError>> + Send;
}

/// [`Operation`] backed by an async closure
#[derive(Clone)]
pub struct FnOperation<F>(F);

impl<F> fmt::Debug for FnOperation<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnOperation").finish_non_exhaustive()
    }
}

/// Wrap a closure taking an owned job as an [`Operation`]
pub fn from_fn<F>(f: F) -> FnOperation<F> {
    FnOperation(f)
}

impl<J, F, Fut> Operation<J> for FnOperation<F>
where
    J: Job,
    F: Fn(J) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<J::Output, CodedError>> + Send,
{
    fn execute(&self, job: &J) -> impl Future<Output = Result<J::Output, CodedError>> + Send {
        (self.0)(job.clone())
    }
}

/// A job with the bookkeeping the queue needs to admit it
#[derive(Debug, Clone)]
pub struct JobSpec<J> {
    /// The job itself
    pub job: J,
    /// Dedup key computed at submission time
    pub dedup_key: String,
    /// Rate limiter points charged per attempt
    pub cost: f64,
}

impl<J: Job> JobSpec<J> {
    /// Build a spec, computing the dedup key from the job
    pub fn new(job: J, cost: f64) -> Self {
        let dedup_key = job.dedup_key();
        Self {
            job,
            dedup_key,
            cost,
        }
    }
}

/// Queue-local job identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct JobId(pub u64);

impl fmt::Display for JobId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state of a job
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Queued, ready to be claimed
    Waiting,
    /// Backing off before the next attempt
    Delayed,
    /// Claimed by a worker
    Active,
    /// Settled successfully and retained
    Completed,
    /// Settled with a failure and retained
    Failed,
}

impl JobState {
    /// Waiting, delayed and active jobs absorb duplicate submissions
    pub fn is_live(self) -> bool {
        matches!(self, JobState::Waiting | JobState::Delayed | JobState::Active)
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            JobState::Waiting => "waiting",
            JobState::Delayed => "delayed",
            JobState::Active => "active",
            JobState::Completed => "completed",
            JobState::Failed => "failed",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for JobState {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "waiting" => Ok(JobState::Waiting),
            "delayed" => Ok(JobState::Delayed),
            "active" => Ok(JobState::Active),
            "completed" => Ok(JobState::Completed),
            "failed" => Ok(JobState::Failed),
            other => Err(format!("unknown job state '{other}'")),
        }
    }
}

/// Point-in-time view of a job for diagnostics
#[serde_as]
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobSnapshot {
    /// Job id
    pub id: JobId,
    /// Job kind name
    pub kind: String,
    /// Dedup key
    pub dedup_key: String,
    /// Current state
    pub state: JobState,
    /// Attempts started so far
    pub attempts: u32,
    /// Time since the job was created
    #[serde_as(as = "DurationMilliSeconds<u64>")]
    #[serde(rename = "ageMs")]
    pub age: Duration,
    /// Serialized failure of the last failed attempt
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failed_reason: Option<String>,
}
