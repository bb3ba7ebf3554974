// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Middleware module for HTTP request processing
//!
//! This module provides per-IP rate limiting and request metrics for the gateway
//! routes. Limiters are named so several routes can share one budget: all
//! Covalent-backed endpoints draw from the same window per client.

use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    Json,
    extract::{ConnectInfo, MatchedPath, State},
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use prometheus::IntCounter;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::{
    config::{RateLimitingConfig, RouteLimit},
    metrics::Metrics,
};

const MAX_RATE_LIMIT_ENTRIES: usize = 10_000;

/// Name of the limiter shared by the Covalent routes
pub const COVALENT_LIMITER: &str = "rl-covalent";
/// Name of the transactions route limiter
pub const TRANSACTIONS_LIMITER: &str = "rl-transactions";

/// Fixed-window per-IP limiter with a block period after the window is exceeded
#[derive(Debug, Clone)]
pub struct RateLimiter {
    name: &'static str,
    limit: RouteLimit,
    // Lock-free concurrent rate limiting using DashMap
    requests: Arc<DashMap<IpAddr, RequestCounter>>,
    rejections: Option<IntCounter>,
}

#[derive(Debug, Clone, Copy)]
struct RequestCounter {
    count: u32,
    window_start: Instant,
    blocked_until: Option<Instant>,
}

impl RequestCounter {
    fn is_stale(&self, now: Instant, limit: &RouteLimit) -> bool {
        let blocked = self.blocked_until.is_some_and(|until| until > now);
        !blocked && now.duration_since(self.window_start) >= limit.duration
    }
}

impl RateLimiter {
    /// Create a limiter named `name` enforcing `limit`
    pub fn new(name: &'static str, limit: RouteLimit) -> Self {
        Self {
            name,
            limit,
            requests: Arc::new(DashMap::new()),
            rejections: None,
        }
    }

    /// Count refusals on `counter`
    #[must_use]
    pub fn with_rejection_counter(mut self, counter: IntCounter) -> Self {
        self.rejections = Some(counter);
        self
    }

    /// Limiter name, used in logs and metrics
    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Count a request from `ip`; returns whether it must be refused
    pub fn is_rate_limited(&self, ip: IpAddr) -> bool {
        let now = Instant::now();

        if self.requests.len() > MAX_RATE_LIMIT_ENTRIES {
            self.cleanup_expired_entries(now);
        }

        let mut counter = self.requests.entry(ip).or_insert(RequestCounter {
            count: 0,
            window_start: now,
            blocked_until: None,
        });

        if counter.blocked_until.is_some_and(|until| until > now) {
            return true;
        }
        if counter.is_stale(now, &self.limit) {
            *counter = RequestCounter {
                count: 0,
                window_start: now,
                blocked_until: None,
            };
        }

        counter.count += 1;
        if counter.count > self.limit.points {
            if !self.limit.block_duration.is_zero() {
                counter.blocked_until = Some(now + self.limit.block_duration);
            }
            debug!(limiter = self.name, %ip, count = counter.count, "rate limiting IP");
            return true;
        }
        false
    }

    /// Clean up expired entries using efficient retain operation
    fn cleanup_expired_entries(&self, now: Instant) {
        let entries_before = self.requests.len();
        self.requests
            .retain(|_, counter| !counter.is_stale(now, &self.limit));

        let cleaned_up = entries_before.saturating_sub(self.requests.len());
        if cleaned_up > 0 {
            debug!(limiter = self.name, cleaned_up, "cleaned up expired rate limiter entries");
        }
    }
}

/// The named limiters of the gateway routes
#[derive(Debug, Clone)]
pub struct RateLimiters {
    /// Shared by balances, tokens and collectibles metadata
    pub covalent: RateLimiter,
    /// Transactions history
    pub transactions: RateLimiter,
}

impl RateLimiters {
    /// Build the limiters from configuration
    pub fn from_config(config: &RateLimitingConfig) -> Self {
        Self {
            covalent: RateLimiter::new(COVALENT_LIMITER, config.covalent),
            transactions: RateLimiter::new(TRANSACTIONS_LIMITER, config.transactions),
        }
    }

    /// Count refusals of every limiter in `metrics`
    #[must_use]
    pub fn with_metrics(self, metrics: &Metrics) -> Self {
        Self {
            covalent: self
                .covalent
                .with_rejection_counter(metrics.rate_limited_counter(COVALENT_LIMITER)),
            transactions: self
                .transactions
                .with_rejection_counter(metrics.rate_limited_counter(TRANSACTIONS_LIMITER)),
        }
    }
}

/// Rate limiting middleware function
pub async fn rate_limiting_middleware(
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    State(rate_limiter): State<RateLimiter>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let client_ip = addr.ip();

    if rate_limiter.is_rate_limited(client_ip) {
        warn!(limiter = rate_limiter.name(), ip = %client_ip, "rate limit exceeded");
        if let Some(counter) = &rate_limiter.rejections {
            counter.inc();
        }
        let body = serde_json::json!({
            "error": format!("Too many requests. Please try again later, ip: {client_ip}.")
        });
        return (StatusCode::TOO_MANY_REQUESTS, Json(body)).into_response();
    }

    next.run(req).await
}

/// Record count and latency of every routed request
pub async fn http_metrics_middleware(
    State(metrics): State<Metrics>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| "unmatched".to_string(), |path| path.as_str().to_string());
    let started = Instant::now();

    let response = next.run(req).await;

    metrics.observe_http_request(
        &route,
        response.status().as_u16(),
        started.elapsed().as_secs_f64(),
    );
    response
}
