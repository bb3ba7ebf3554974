// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server state management module
//!
//! This module provides shared application state for the gateway server,
//! including configuration, the provider registry, metrics, and coordinated cancellation.

use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use utoipa::ToSchema;

use crate::{
    config::{Environment, ServerConfig},
    dependencies::Registry,
    metrics::Metrics,
};

/// Shared application state with cancellation token support
#[derive(Debug, Clone)]
pub struct ServerState {
    /// Server configuration
    config: Arc<ServerConfig>,
    /// Configured providers and their queues
    registry: Arc<Registry>,
    /// Metrics registry of this server
    metrics: Metrics,
    /// Cancellation token for coordinated shutdown
    pub cancellation_token: CancellationToken,
}

impl ServerState {
    /// Create new server state
    pub fn new(
        config: ServerConfig,
        registry: Arc<Registry>,
        metrics: Metrics,
        cancellation_token: CancellationToken,
    ) -> Self {
        Self {
            config: Arc::new(config),
            registry,
            metrics,
            cancellation_token,
        }
    }

    /// Server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Provider registry
    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Metrics registry
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Probe every provider
    ///
    /// The gateway reports `Degraded` while any provider is down; it keeps serving
    /// the routes of the others.
    pub async fn health_check(&self) -> HealthCheck {
        let api_clients: BTreeMap<String, HealthStatus> = self
            .registry
            .overall_health()
            .await
            .into_iter()
            .map(|(name, status)| (name, Self::convert_health_status(status)))
            .collect();

        let down: Vec<&str> = api_clients
            .iter()
            .filter(|(_, status)| matches!(status, HealthStatus::Down { .. }))
            .map(|(name, _)| name.as_str())
            .collect();
        let status = if down.is_empty() {
            HealthStatus::Up
        } else {
            HealthStatus::Degraded {
                reason: format!("unavailable providers: {}", down.join(", ")).into_boxed_str(),
            }
        };

        HealthCheck {
            status,
            version: Box::from(env!("CARGO_PKG_VERSION")),
            environment: self.config.environment,
            timestamp: chrono::Utc::now().to_rfc3339(),
            api_clients,
        }
    }

    /// Convert provider health status to gateway health status
    fn convert_health_status(external_status: api_client::HealthStatus) -> HealthStatus {
        match external_status {
            api_client::HealthStatus::Up => HealthStatus::Up,
            api_client::HealthStatus::Degraded { reason } => HealthStatus::Degraded {
                reason: reason.into_boxed_str(),
            },
            api_client::HealthStatus::Down { reason } => HealthStatus::Down {
                reason: reason.into_boxed_str(),
            },
        }
    }
}

/// Health status of a service or dependency
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub enum HealthStatus {
    /// Service is fully operational and responding normally
    Up,

    /// Service is not operational or has critical failures
    Down {
        /// Human-readable explanation of why the service is down
        reason: Box<str>,
    },

    /// Service is operational but experiencing performance issues or partial failures
    Degraded {
        /// Human-readable explanation of the degradation condition
        reason: Box<str>,
    },
}

/// Health check status
#[derive(Debug, Serialize, Deserialize, ToSchema)]
pub struct HealthCheck {
    /// Service status
    pub status: HealthStatus,
    /// Service version
    pub version: Box<str>,
    /// Environment
    pub environment: Environment,
    /// Timestamp
    pub timestamp: String,
    /// Status of individual providers
    #[schema(value_type = Object)]
    pub api_clients: BTreeMap<String, HealthStatus>,
}
