// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Blockchain Data Gateway
//!
//! This crate provides the HTTP server in front of the provider queues, built with Axum
//! and designed for production use with hierarchical configuration, middleware, and
//! graceful shutdown.
//!
//! # Module Structure
//!
//! - [`config`]: Server, provider and queue configuration with hierarchical loading
//! - [`dependencies`]: Limiter store selection and provider registry wiring
//! - [`error`]: Error types and HTTP response mapping
//! - [`extractors`]: Validated query parameters
//! - [`state`]: Shared application state and health aggregation
//! - [`server`]: Main server implementation, lifecycle, and coordinated shutdown
//! - [`routes`]: Route table and HTTP request handlers
//! - [`middleware`]: Named per-IP rate limiters and request metrics
//! - [`metrics`]: Prometheus registry and `/metrics` endpoint
//! - [`openapi`]: `OpenAPI` specification and Swagger UI endpoints
//!
//! # Key Features
//!
//! - **Queued Provider Access**: Covalent and Alchemy calls go through deduplicating,
//!   rate-limited fetch queues; GeckoTerminal pages through a shared limiter
//! - **Per-IP Limits**: Covalent routes share one budget, transactions have their own
//! - **Graceful Shutdown**: HTTP drains first, then provider queues close
//! - **Diagnostics**: Queue counts and retained jobs over HTTP, Prometheus metrics

pub mod config;
pub mod dependencies;
pub mod error;
pub mod extractors;
pub mod metrics;
pub mod middleware;
pub mod openapi;
pub mod routes;
pub mod server;
pub mod state;

pub use config::{Environment, ServerConfig};
pub use dependencies::{LimiterStore, Registry};
pub use error::{ServerError, ServerResult};
pub use server::{Server, ShutdownConfig};
pub use shared_types::ChainId;
pub use state::{HealthCheck, ServerState};
