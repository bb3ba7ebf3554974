// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Health check types for provider clients

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Health status of an API client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[allow(missing_docs)]
pub enum HealthStatus {
    /// Service is healthy and operational
    Up,
    /// Service is degraded but still functional
    Degraded { reason: String },
    /// Service is down and not functional
    Down { reason: String },
}

impl HealthStatus {
    /// Check if this health status indicates the service is available
    pub fn is_available(&self) -> bool {
        matches!(self, HealthStatus::Up | HealthStatus::Degraded { .. })
    }

    /// Get a human-readable description of the status
    pub fn description(&self) -> &str {
        match self {
            HealthStatus::Up => "Service is healthy",
            HealthStatus::Degraded { reason } | HealthStatus::Down { reason } => reason,
        }
    }

    /// Derive a status from an HTTP probe result
    ///
    /// Rate limiting during a probe means the provider answers but our budget is spent,
    /// which is degraded rather than down.
    pub fn from_probe_status(status: u16) -> Self {
        match status {
            200..=299 => HealthStatus::Up,
            401 | 403 => HealthStatus::Down {
                reason: "Authentication failed".to_string(),
            },
            429 => HealthStatus::Degraded {
                reason: "Rate limited".to_string(),
            },
            other => HealthStatus::Degraded {
                reason: format!("API returned status {other}"),
            },
        }
    }
}

/// Health check result with timing
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheckResult {
    /// The health status
    pub status: HealthStatus,
    /// Response time for the health check
    pub response_time: Duration,
    /// When the health check was performed
    pub timestamp: DateTime<Utc>,
}

impl HealthCheckResult {
    /// Record a probe outcome observed now
    pub fn new(status: HealthStatus, response_time: Duration) -> Self {
        Self {
            status,
            response_time,
            timestamp: Utc::now(),
        }
    }
}
