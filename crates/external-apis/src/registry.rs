// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Registry of the configured providers
//!
//! Each provider is optional; a deployment without an Alchemy key simply has no
//! transactions endpoint. The registry is the one place that knows every queue, so it
//! also answers queue diagnostics and drives shutdown.

use std::collections::BTreeMap;

use api_client::{ApiClient, HealthStatus};
use fetch_queue::{JobSnapshot, JobState, QueueCounts, RateLimitStore};
use serde::Serialize;
use tracing::{debug, info};

use crate::{Alchemy, Covalent, GeckoTerminalClient};

/// Registry of provider façades
#[derive(Debug)]
pub struct ProviderRegistry<L> {
    covalent: Option<Covalent>,
    alchemy: Option<Alchemy>,
    geckoterminal: Option<GeckoTerminalClient<L>>,
}

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[allow(missing_docs)]
pub enum RegistryError {
    /// The provider has no credentials configured
    #[error("{provider} is not configured")]
    NotConfigured { provider: &'static str },
}

/// Job counts of one queue
#[derive(Debug, Clone, Serialize)]
pub struct QueueSummary {
    /// Queue name
    pub name: String,
    /// Worker count
    pub concurrency: usize,
    /// Jobs per state
    pub counts: QueueCounts,
}

impl<L> Default for ProviderRegistry<L> {
    fn default() -> Self {
        Self {
            covalent: None,
            alchemy: None,
            geckoterminal: None,
        }
    }
}

impl<L: RateLimitStore> ProviderRegistry<L> {
    /// Create a new empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with the specified providers
    pub fn with_providers(
        covalent: Option<Covalent>,
        alchemy: Option<Alchemy>,
        geckoterminal: Option<GeckoTerminalClient<L>>,
    ) -> Self {
        Self {
            covalent,
            alchemy,
            geckoterminal,
        }
    }

    /// Covalent façade
    pub fn covalent(&self) -> Result<&Covalent, RegistryError> {
        self.covalent.as_ref().ok_or(RegistryError::NotConfigured {
            provider: "covalent",
        })
    }

    /// Alchemy façade
    pub fn alchemy(&self) -> Result<&Alchemy, RegistryError> {
        self.alchemy.as_ref().ok_or(RegistryError::NotConfigured {
            provider: "alchemy",
        })
    }

    /// GeckoTerminal client
    pub fn geckoterminal(&self) -> Result<&GeckoTerminalClient<L>, RegistryError> {
        self.geckoterminal
            .as_ref()
            .ok_or(RegistryError::NotConfigured {
                provider: "geckoterminal",
            })
    }

    /// Get the overall health status of all registered providers
    ///
    /// Health checks are performed concurrently.
    pub async fn overall_health(&self) -> BTreeMap<String, HealthStatus> {
        let (covalent, alchemy, geckoterminal) = tokio::join!(
            probe(self.covalent.as_ref().map(Covalent::client)),
            probe(self.alchemy.as_ref().map(Alchemy::client)),
            probe(self.geckoterminal.as_ref()),
        );

        [covalent, alchemy, geckoterminal]
            .into_iter()
            .flatten()
            .collect()
    }

    /// Job counts of every queue
    pub fn queue_summaries(&self) -> Vec<QueueSummary> {
        let mut summaries = Vec::new();
        if let Some(covalent) = &self.covalent {
            let queue = covalent.queue();
            summaries.push(QueueSummary {
                name: queue.name().to_string(),
                concurrency: queue.concurrency(),
                counts: queue.counts(),
            });
        }
        if let Some(alchemy) = &self.alchemy {
            let queue = alchemy.queue();
            summaries.push(QueueSummary {
                name: queue.name().to_string(),
                concurrency: queue.concurrency(),
                counts: queue.counts(),
            });
        }
        summaries
    }

    /// Jobs of the named queue in `state`; `None` for an unknown queue
    pub fn queue_jobs(&self, name: &str, state: JobState) -> Option<Vec<JobSnapshot>> {
        if let Some(covalent) = &self.covalent
            && covalent.queue().name() == name
        {
            return Some(covalent.queue().jobs(state));
        }
        if let Some(alchemy) = &self.alchemy
            && alchemy.queue().name() == name
        {
            return Some(alchemy.queue().jobs(state));
        }
        None
    }

    /// Close every queue; returns how many pending jobs were abandoned
    pub async fn shutdown(&self) -> usize {
        let (covalent, alchemy) = tokio::join!(
            async {
                match &self.covalent {
                    Some(covalent) => covalent.shutdown().await,
                    None => 0,
                }
            },
            async {
                match &self.alchemy {
                    Some(alchemy) => alchemy.shutdown().await,
                    None => 0,
                }
            },
        );
        info!(abandoned = covalent + alchemy, "provider queues stopped");
        covalent + alchemy
    }

    /// Get the number of registered providers
    pub fn client_count(&self) -> usize {
        self.client_names().len()
    }

    /// Get the names of all registered providers
    pub fn client_names(&self) -> Vec<&'static str> {
        let mut names = Vec::new();
        if let Some(covalent) = &self.covalent {
            names.push(covalent.client().name());
        }
        if let Some(alchemy) = &self.alchemy {
            names.push(alchemy.client().name());
        }
        if let Some(geckoterminal) = &self.geckoterminal {
            names.push(geckoterminal.name());
        }
        names
    }
}

async fn probe<C: ApiClient>(client: Option<&C>) -> Option<(String, HealthStatus)> {
    let client = client?;
    let status = match client.health_check().await {
        Ok(status) => status,
        Err(e) => HealthStatus::Down {
            reason: format!("Health check failed: {e}"),
        },
    };
    debug!(provider = client.name(), available = status.is_available(), "provider health checked");
    Some((client.name().to_string(), status))
}

#[cfg(test)]
mod tests {
    use fetch_queue::MemoryRateLimitStore;

    use super::*;

    #[tokio::test]
    async fn registry_creation() {
        let registry = ProviderRegistry::<MemoryRateLimitStore>::new();
        assert_eq!(registry.client_count(), 0);
        assert!(registry.client_names().is_empty());
        assert!(registry.overall_health().await.is_empty());
        assert!(registry.queue_summaries().is_empty());
        assert_eq!(registry.shutdown().await, 0);
    }

    #[test]
    fn missing_providers_are_reported() {
        let registry = ProviderRegistry::<MemoryRateLimitStore>::new();
        assert_eq!(
            registry.alchemy().unwrap_err(),
            RegistryError::NotConfigured { provider: "alchemy" }
        );
        assert_eq!(
            registry.covalent().unwrap_err().to_string(),
            "covalent is not configured"
        );
        assert!(registry.queue_jobs("covalent-requests", JobState::Failed).is_none());
    }
}
