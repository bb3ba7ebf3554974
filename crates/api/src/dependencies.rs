// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Provider wiring module
//!
//! Builds the limiter store shared by every provider queue and starts the providers
//! that have credentials configured. A deployment without an Alchemy key still serves
//! the Covalent routes; the missing provider answers 503 when a route needs it.

use std::sync::Arc;

use external_apis::{
    Alchemy, AlchemyClient, AlchemyConfig, Covalent, CovalentClient, CovalentConfig,
    GeckoTerminalClient, GeckoTerminalConfig, ProviderError, ProviderRegistry, alchemy, covalent,
};
use fetch_queue::{BucketPolicy, Consumption, MemoryRateLimitStore, RateLimitStore, StoreError};
#[cfg(feature = "redis")]
use fetch_queue::RedisRateLimitStore;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::{
    config::ServerConfig,
    error::{ServerError, ServerResult},
};

/// Key prefix of the limiter buckets kept in Redis
pub const REDIS_KEY_PREFIX: &str = "gateway";

/// Registry type served by the gateway
pub type Registry = ProviderRegistry<LimiterStore>;

/// Bucket store behind every provider queue
#[derive(Debug)]
pub enum LimiterStore {
    /// Buckets local to this process
    Memory(MemoryRateLimitStore),
    /// Buckets shared through Redis by every gateway process
    #[cfg(feature = "redis")]
    Redis(RedisRateLimitStore),
}

impl LimiterStore {
    /// In-process store
    pub fn memory() -> Self {
        Self::Memory(MemoryRateLimitStore::new())
    }

    /// Pick the store from configuration
    ///
    /// A configured `redis_url` selects the Redis store when the `redis` feature is
    /// built in; otherwise buckets stay in memory.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Dependency` if Redis is configured but unreachable
    #[allow(clippy::unused_async)]
    pub async fn from_config(config: &ServerConfig) -> ServerResult<Self> {
        let Some(url) = config.redis_url.as_deref() else {
            info!("using in-memory rate limit store");
            return Ok(Self::memory());
        };

        #[cfg(feature = "redis")]
        {
            let store = RedisRateLimitStore::connect(url, REDIS_KEY_PREFIX)
                .await
                .map_err(|e| ServerError::Dependency {
                    message: format!("failed to connect rate limit store: {e}"),
                })?;
            warn!("rate limit budget is shared through redis, job deduplication stays per process");
            Ok(Self::Redis(store))
        }

        #[cfg(not(feature = "redis"))]
        {
            warn!(
                redis_url = url,
                "redis support is not built in, using in-memory rate limit store"
            );
            Ok(Self::memory())
        }
    }

    /// Whether several gateway processes draw from the same buckets
    ///
    /// Job queues always live in the process that owns them, so identical requests
    /// reaching two processes run twice even when their budget is shared.
    pub fn is_shared(&self) -> bool {
        match self {
            Self::Memory(_) => false,
            #[cfg(feature = "redis")]
            Self::Redis(_) => true,
        }
    }

    /// Backend name for logs
    pub fn backend(&self) -> &'static str {
        match self {
            Self::Memory(_) => "memory",
            #[cfg(feature = "redis")]
            Self::Redis(_) => "redis",
        }
    }
}

impl RateLimitStore for LimiterStore {
    async fn try_consume(
        &self,
        namespace: &str,
        policy: BucketPolicy,
        cost: f64,
    ) -> Result<Consumption, StoreError> {
        match self {
            Self::Memory(store) => store.try_consume(namespace, policy, cost).await,
            #[cfg(feature = "redis")]
            Self::Redis(store) => store.try_consume(namespace, policy, cost).await,
        }
    }
}

/// Start every configured provider over `store`
///
/// Provider queues stop when `cancel` is cancelled.
///
/// # Errors
///
/// Returns `ServerError::Dependency` if a provider client or queue cannot be built
pub fn build_registry(
    config: &ServerConfig,
    store: &Arc<LimiterStore>,
    cancel: &CancellationToken,
) -> ServerResult<Registry> {
    let providers = &config.providers;

    let covalent = match &providers.covalent.api_key {
        Some(api_key) => {
            let mut covalent_config = CovalentConfig::new(api_key.clone());
            if let Some(base_url) = &providers.covalent.base_url {
                covalent_config = covalent_config.with_base_url(base_url.as_str());
            }
            let client = CovalentClient::new(covalent_config).map_err(dependency("covalent"))?;
            let queue_config = covalent::queue_config(providers.covalent.rps, config.queue.clone());
            let started =
                Covalent::start(client, queue_config, Arc::clone(store), cancel.child_token())
                    .map_err(dependency("covalent"))?;
            info!(rps = providers.covalent.rps, "covalent provider started");
            Some(started)
        }
        None => {
            warn!("COVALENT_API_KEY is not set, covalent routes are unavailable");
            None
        }
    };

    let alchemy = match &providers.alchemy.api_key {
        Some(api_key) => {
            let mut alchemy_config = AlchemyConfig::new(api_key.clone());
            if let Some(template) = &providers.alchemy.url_template {
                alchemy_config = alchemy_config.with_url_template(template.as_str());
            }
            let client = AlchemyClient::new(alchemy_config).map_err(dependency("alchemy"))?;
            let queue_config =
                alchemy::queue_config(providers.alchemy.compute_units, config.queue.clone());
            let started = Alchemy::start(
                client,
                queue_config,
                config.planner,
                Arc::clone(store),
                cancel.child_token(),
            )
            .map_err(dependency("alchemy"))?;
            info!(
                compute_units = providers.alchemy.compute_units,
                "alchemy provider started"
            );
            Some(started)
        }
        None => {
            warn!("ALCHEMY_API_KEY is not set, transactions are unavailable");
            None
        }
    };

    let geckoterminal = if providers.geckoterminal.enabled {
        let defaults = GeckoTerminalConfig::default();
        let gecko_config = GeckoTerminalConfig {
            base_url: providers
                .geckoterminal
                .base_url
                .clone()
                .unwrap_or_else(|| defaults.base_url.clone()),
            network: providers.geckoterminal.network.clone(),
            max_pages: providers.geckoterminal.max_pages,
            ..defaults
        };
        let client = GeckoTerminalClient::new(gecko_config, Arc::clone(store))
            .map_err(dependency("geckoterminal"))?;
        Some(client)
    } else {
        None
    };

    let registry = Registry::with_providers(covalent, alchemy, geckoterminal);
    info!(
        providers = ?registry.client_names(),
        store = store.backend(),
        shared_budget = store.is_shared(),
        "provider registry ready"
    );
    Ok(registry)
}

fn dependency(provider: &'static str) -> impl Fn(ProviderError) -> ServerError {
    move |e| ServerError::Dependency {
        message: format!("failed to start {provider}: {e}"),
    }
}
