// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Prometheus metrics module
//!
//! Each server owns a [`Metrics`] registry. HTTP latency and fetch outcomes are
//! recorded as requests flow; queue gauges and attempt counters are refreshed from the
//! provider queues when `/metrics` is scraped.

use std::collections::BTreeMap;

use axum::{
    extract::State,
    http::{StatusCode, header},
    response::{IntoResponse, Response},
};
use external_apis::QueueSummary;
use fetch_queue::FetchError;
use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGaugeVec, Opts, Registry,
    TextEncoder,
};

use crate::{
    error::{ServerError, ServerResult},
    state::ServerState,
};

const HTTP_BUCKETS: &[f64] = &[0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0];

/// Gateway metrics
#[derive(Debug, Clone)]
pub struct Metrics {
    registry: Registry,
    http_request_duration: HistogramVec,
    fetch_outcomes: IntCounterVec,
    rate_limited: IntCounterVec,
    queue_jobs: IntGaugeVec,
    job_attempts: IntCounterVec,
}

impl Metrics {
    /// Create and register every metric in a fresh registry
    ///
    /// # Errors
    ///
    /// Returns an error if a metric definition is invalid
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "gateway_http_request_duration_seconds",
                "HTTP request durations in seconds, labeled by route and status",
            )
            .buckets(HTTP_BUCKETS.to_vec()),
            &["route", "status"],
        )?;
        let fetch_outcomes = IntCounterVec::new(
            Opts::new(
                "gateway_fetch_outcomes_total",
                "Provider fetches by provider, operation and outcome",
            ),
            &["provider", "operation", "outcome"],
        )?;
        let rate_limited = IntCounterVec::new(
            Opts::new(
                "gateway_rate_limited_requests_total",
                "Requests refused by a per-IP limiter",
            ),
            &["limiter"],
        )?;
        let queue_jobs = IntGaugeVec::new(
            Opts::new("gateway_queue_jobs", "Jobs per queue and state"),
            &["queue", "state"],
        )?;
        let job_attempts = IntCounterVec::new(
            Opts::new(
                "gateway_queue_job_attempts_total",
                "Job attempts started per queue",
            ),
            &["queue"],
        )?;

        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(fetch_outcomes.clone()))?;
        registry.register(Box::new(rate_limited.clone()))?;
        registry.register(Box::new(queue_jobs.clone()))?;
        registry.register(Box::new(job_attempts.clone()))?;

        Ok(Self {
            registry,
            http_request_duration,
            fetch_outcomes,
            rate_limited,
            queue_jobs,
            job_attempts,
        })
    }

    /// Observe one routed request
    pub fn observe_http_request(&self, route: &str, status: u16, duration_secs: f64) {
        let status = status.to_string();
        self.http_request_duration
            .with_label_values(&[route, status.as_str()])
            .observe(duration_secs);
    }

    /// Record how a provider fetch ended: `ok`, or the status code of the failure
    pub fn record_fetch<T>(&self, provider: &str, operation: &str, result: &Result<T, FetchError>) {
        let outcome = match result {
            Ok(_) => "ok".to_string(),
            Err(error) => error.status_code().to_string(),
        };
        self.fetch_outcomes
            .with_label_values(&[provider, operation, outcome.as_str()])
            .inc();
    }

    /// Counter of refusals by the limiter `name`
    pub fn rate_limited_counter(&self, name: &str) -> IntCounter {
        self.rate_limited.with_label_values(&[name])
    }

    /// Refresh queue gauges and attempt counters from queue summaries
    pub fn refresh_queues(&self, summaries: &[QueueSummary]) {
        for summary in summaries {
            let counts = summary.counts;
            let states: BTreeMap<&str, usize> = BTreeMap::from([
                ("waiting", counts.waiting),
                ("delayed", counts.delayed),
                ("active", counts.active),
                ("completed", counts.completed),
                ("failed", counts.failed),
            ]);
            for (state, count) in states {
                self.queue_jobs
                    .with_label_values(&[summary.name.as_str(), state])
                    .set(i64::try_from(count).unwrap_or(i64::MAX));
            }

            let attempts = self.job_attempts.with_label_values(&[summary.name.as_str()]);
            let seen = attempts.get();
            if counts.attempts_total > seen {
                attempts.inc_by(counts.attempts_total - seen);
            }
        }
    }

    /// Encode every metric in the Prometheus text format
    ///
    /// # Errors
    ///
    /// Returns an error if encoding fails
    pub fn encode(&self) -> ServerResult<String> {
        let encoder = TextEncoder::new();
        let mut buffer = vec![];
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(|e| ServerError::Runtime {
                message: format!("failed to encode metrics: {e}"),
            })?;
        String::from_utf8(buffer).map_err(|e| ServerError::Runtime {
            message: format!("metrics are not valid UTF-8: {e}"),
        })
    }
}

/// Axum handler that exports metrics in Prometheus text format
pub async fn metrics_handler(State(state): State<ServerState>) -> ServerResult<Response> {
    let metrics = state.metrics();
    metrics.refresh_queues(&state.registry().queue_summaries());
    let body = metrics.encode()?;

    Ok((
        StatusCode::OK,
        [(header::CONTENT_TYPE, TextEncoder::new().format_type().to_string())],
        body,
    )
        .into_response())
}

#[cfg(test)]
mod tests {
    use api_client::CodedError;
    use fetch_queue::QueueCounts;

    use super::*;

    fn summary(attempts_total: u64, failed: usize) -> QueueSummary {
        QueueSummary {
            name: "covalent-requests".to_string(),
            concurrency: 4,
            counts: QueueCounts {
                failed,
                attempts_total,
                ..QueueCounts::default()
            },
        }
    }

    #[test]
    fn fetch_outcomes_are_labelled_by_status() {
        let metrics = Metrics::new().unwrap();
        metrics.record_fetch::<()>("covalent", "balances", &Ok(()));
        metrics.record_fetch::<()>(
            "covalent",
            "balances",
            &Err(FetchError::Upstream(CodedError::new(404, "not found"))),
        );

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"gateway_fetch_outcomes_total{operation="balances",outcome="ok",provider="covalent"} 1"#));
        assert!(text.contains(r#"gateway_fetch_outcomes_total{operation="balances",outcome="404",provider="covalent"} 1"#));
    }

    #[test]
    fn attempt_counter_follows_queue_totals() {
        let metrics = Metrics::new().unwrap();
        metrics.refresh_queues(&[summary(3, 1)]);
        metrics.refresh_queues(&[summary(7, 0)]);
        // a total that did not grow leaves the counter alone
        metrics.refresh_queues(&[summary(7, 0)]);

        let text = metrics.encode().unwrap();
        assert!(text.contains(r#"gateway_queue_job_attempts_total{queue="covalent-requests"} 7"#));
        assert!(text.contains(r#"gateway_queue_jobs{queue="covalent-requests",state="failed"} 0"#));
    }

    #[test]
    fn registries_are_independent() {
        let first = Metrics::new().unwrap();
        let second = Metrics::new().unwrap();
        first.rate_limited_counter("rl-covalent").inc();
        assert!(!second.encode().unwrap().contains("rl-covalent"));
    }
}
