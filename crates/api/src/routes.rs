// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Routes module
//!
//! This module provides route configuration for the gateway server. The Covalent
//! routes share one per-IP limiter, the transactions route has its own, and the
//! remaining routes are not limited per IP.

pub mod handlers;

use axum::{Router, middleware, routing::get};
use handlers::{
    balances_handler, collectibles_metadata_handler, exchange_rates_handler, health_handler,
    is_initialized_handler, queue_jobs_handler, queues_handler, tokens_metadata_handler,
    transactions_handler,
};

use crate::{
    metrics::metrics_handler,
    middleware::{RateLimiters, rate_limiting_middleware},
    openapi::{openapi_spec, swagger_ui},
    state::ServerState,
};

/// Create application routes, limiting per IP when `rate_limiting` is set
pub fn create_routes(limiters: &RateLimiters, rate_limiting: bool) -> Router<ServerState> {
    // Health and metrics are not rate limited for monitoring purposes
    let ops_routes = Router::new()
        .route("/health", get(health_handler))
        .route("/metrics", get(metrics_handler));

    let docs_routes = Router::new()
        .route("/api-doc/openapi.json", get(openapi_spec))
        .route("/swagger-ui", get(swagger_ui));

    let mut covalent_routes = Router::new()
        .route("/balances", get(balances_handler))
        .route("/tokens-metadata", get(tokens_metadata_handler))
        .route("/collectibles-metadata", get(collectibles_metadata_handler));
    let mut transactions_routes =
        Router::new().route("/transactions/v2", get(transactions_handler));

    if rate_limiting {
        covalent_routes = covalent_routes.route_layer(middleware::from_fn_with_state(
            limiters.covalent.clone(),
            rate_limiting_middleware,
        ));
        transactions_routes = transactions_routes.route_layer(middleware::from_fn_with_state(
            limiters.transactions.clone(),
            rate_limiting_middleware,
        ));
    }

    let api_routes = Router::new()
        .merge(covalent_routes)
        .merge(transactions_routes)
        .route("/is-initialized", get(is_initialized_handler))
        .route("/exchange-rates", get(exchange_rates_handler))
        .route("/queues", get(queues_handler))
        .route("/queues/{name}/jobs", get(queue_jobs_handler));

    Router::new()
        .merge(ops_routes)
        .merge(docs_routes)
        .nest("/api", api_routes)
}
