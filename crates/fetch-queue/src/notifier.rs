// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Delivery of job outcomes to waiting callers
//!
//! Every caller of a dedup key holds a [`Waiter`]. When the job settles, the outcome is
//! cloned to each registered waiter. Callers that stopped waiting have dropped their
//! receiver; delivery to them is skipped without affecting anyone else.

use std::{collections::HashMap, fmt};

use tokio::sync::oneshot;

use crate::error::JobFailure;

/// Settled outcome of a job
pub type Outcome<O> = Result<O, JobFailure>;

/// Registry of waiters by dedup key
pub struct Notifier<O> {
    waiters: HashMap<String, Vec<oneshot::Sender<Outcome<O>>>>,
}

impl<O> fmt::Debug for Notifier<O> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("keys", &self.waiters.len())
            .finish()
    }
}

impl<O> Default for Notifier<O> {
    fn default() -> Self {
        Self {
            waiters: HashMap::new(),
        }
    }
}

impl<O: Clone> Notifier<O> {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register interest in the next outcome published for `key`
    pub fn subscribe(&mut self, key: &str) -> Waiter<O> {
        let (tx, rx) = oneshot::channel();
        let senders = self.waiters.entry(key.to_string()).or_default();
        senders.retain(|sender| !sender.is_closed());
        senders.push(tx);
        Waiter { rx }
    }

    /// Deliver `outcome` to every waiter of `key`, returning how many received it
    pub fn publish(&mut self, key: &str, outcome: &Outcome<O>) -> usize {
        let Some(senders) = self.waiters.remove(key) else {
            return 0;
        };
        senders
            .into_iter()
            .map(|sender| sender.send(outcome.clone()).is_ok())
            .filter(|delivered| *delivered)
            .count()
    }

    /// Waiters still listening on `key`
    pub fn subscriber_count(&self, key: &str) -> usize {
        self.waiters
            .get(key)
            .map_or(0, |senders| senders.iter().filter(|s| !s.is_closed()).count())
    }
}

/// Receiving side held by one caller
#[derive(Debug)]
pub struct Waiter<O> {
    rx: oneshot::Receiver<Outcome<O>>,
}

impl<O> Waiter<O> {
    /// A waiter that resolves immediately with `outcome`
    pub fn ready(outcome: Outcome<O>) -> Self {
        let (tx, rx) = oneshot::channel();
        // the receiver is alive, so the send cannot fail
        let _ = tx.send(outcome);
        Self { rx }
    }

    /// Wait for the outcome; `None` when the queue dropped the job without settling it
    pub async fn wait(self) -> Option<Outcome<O>> {
        self.rx.await.ok()
    }
}
