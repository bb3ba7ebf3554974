// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! GeckoTerminal exchange rates
//!
//! Token prices are read from the pools list of one network, most traded first. The
//! public API allows 30 calls per minute, so every page first takes a point from a
//! shared [`RateLimiter`]; there is no queue, since callers need the pages in order.

use std::{
    collections::{BTreeMap, HashMap, HashSet},
    fmt,
    sync::Arc,
    time::Duration,
};

use api_client::{ApiClient, CodedError, HealthStatus};
use fetch_queue::{BucketPolicy, RateLimitStore, RateLimitTimeout, RateLimiter};
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use tokio_retry::{
    RetryIf,
    strategy::{ExponentialBackoff, jitter},
};
use tracing::{debug, warn};

use crate::transport::{ProviderError, build_client, normalize_base_url, probe_health, read_json};

/// Limiter namespace
pub const GECKOTERMINAL_LIMITER_NAME: &str = "rl-geckoterminal-api";

/// Configuration for the GeckoTerminal client
#[derive(Debug, Clone)]
pub struct GeckoTerminalConfig {
    /// Base URL for the GeckoTerminal API
    pub base_url: String,
    /// Network whose pools are scanned
    pub network: String,
    /// Most pages read per lookup
    pub max_pages: u32,
    /// Calls allowed per window
    pub calls_per_window: f64,
    /// Limiter window
    pub window: Duration,
    /// Longest wait for limiter capacity before a page fails
    pub limiter_wait_timeout: Duration,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Health check timeout in seconds
    pub health_check_timeout_seconds: u64,
}

impl Default for GeckoTerminalConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.geckoterminal.com".to_string(),
            network: "etherlink".to_string(),
            max_pages: 10,
            calls_per_window: 30.0,
            window: Duration::from_secs(60),
            limiter_wait_timeout: Duration::from_secs(60),
            timeout_seconds: 20,
            health_check_timeout_seconds: 5,
        }
    }
}

#[derive(Debug, Deserialize)]
struct PoolsPage {
    #[serde(default)]
    data: Vec<Pool>,
    #[serde(default)]
    included: Vec<Entity>,
}

#[derive(Debug, Deserialize)]
struct Pool {
    attributes: PoolAttributes,
    relationships: PoolRelationships,
}

#[derive(Debug, Deserialize)]
struct PoolAttributes {
    base_token_price_usd: Option<String>,
    quote_token_price_usd: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PoolRelationships {
    base_token: Relationship,
    quote_token: Relationship,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    data: EntityRef,
}

#[derive(Debug, Deserialize)]
struct EntityRef {
    id: String,
}

#[derive(Debug, Deserialize)]
struct Entity {
    id: String,
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    attributes: Value,
}

impl Entity {
    fn token_address(&self) -> Option<&str> {
        if self.kind != "token" {
            return None;
        }
        self.attributes.get("address")?.as_str()
    }
}

#[derive(Debug, Error)]
enum PageError {
    #[error(transparent)]
    Limiter(#[from] RateLimitTimeout),
    #[error(transparent)]
    Upstream(#[from] CodedError),
}

impl PageError {
    fn is_retryable(&self) -> bool {
        matches!(self, PageError::Upstream(error) if error.is_retryable())
    }
}

impl From<PageError> for CodedError {
    fn from(value: PageError) -> Self {
        match value {
            PageError::Limiter(timeout) => CodedError::new(503, timeout.to_string()),
            PageError::Upstream(error) => error,
        }
    }
}

/// GeckoTerminal API client
pub struct GeckoTerminalClient<L> {
    client: Client,
    config: GeckoTerminalConfig,
    base_url: String,
    limiter: RateLimiter<L>,
}

impl<L> fmt::Debug for GeckoTerminalClient<L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GeckoTerminalClient")
            .field("base_url", &self.base_url)
            .field("network", &self.config.network)
            .finish_non_exhaustive()
    }
}

impl<L: RateLimitStore> GeckoTerminalClient<L> {
    /// Create a client whose calls are limited through `store`
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL or the limiter settings are invalid
    pub fn new(config: GeckoTerminalConfig, store: Arc<L>) -> Result<Self, ProviderError> {
        let base_url = normalize_base_url(&config.base_url)?;
        if config.network.trim().is_empty() {
            return Err(ProviderError::Config("Network cannot be empty".to_string()));
        }
        let policy = BucketPolicy::new(config.calls_per_window, config.window)?;
        let client = build_client(Duration::from_secs(config.timeout_seconds))?;

        Ok(Self {
            client,
            limiter: RateLimiter::new(store, GECKOTERMINAL_LIMITER_NAME, policy),
            config,
            base_url,
        })
    }

    /// USD prices of `tokens`, keyed by token address
    ///
    /// Pages are read until every token is priced, a page comes back empty, or the page
    /// limit is reached. Prices of other tokens seen on the way are included as well.
    pub async fn exchange_rates(&self, tokens: &[String]) -> Result<BTreeMap<String, String>, CodedError> {
        let mut wanted: HashSet<String> = tokens.iter().map(|token| token.to_lowercase()).collect();
        let mut rates = BTreeMap::new();

        for page_number in 1..=self.config.max_pages {
            let page = self.pools_page_with_retry(page_number).await?;
            if page.data.is_empty() {
                break;
            }

            let entities: HashMap<&str, &Entity> = page
                .included
                .iter()
                .map(|entity| (entity.id.as_str(), entity))
                .collect();

            for pool in &page.data {
                let sides = [
                    (&pool.relationships.base_token, &pool.attributes.base_token_price_usd),
                    (&pool.relationships.quote_token, &pool.attributes.quote_token_price_usd),
                ];
                for (relationship, price) in sides {
                    let Some(address) = entities
                        .get(relationship.data.id.as_str())
                        .and_then(|entity| entity.token_address())
                    else {
                        continue;
                    };
                    let Some(price) = price else { continue };
                    if !rates.contains_key(address) {
                        rates.insert(address.to_string(), price.clone());
                        wanted.remove(&address.to_lowercase());
                    }
                }
            }

            debug!(page_number, priced = rates.len(), remaining = wanted.len(), "read pools page");
            if wanted.is_empty() {
                break;
            }
        }

        Ok(rates)
    }

    async fn pools_page_with_retry(&self, page_number: u32) -> Result<PoolsPage, CodedError> {
        let strategy = ExponentialBackoff::from_millis(100)
            .max_delay(Duration::from_secs(5))
            .take(3)
            .map(jitter);

        RetryIf::spawn(
            strategy,
            || self.pools_page(page_number),
            |error: &PageError| {
                let retry = error.is_retryable();
                if retry {
                    warn!(page_number, error = %error, "GeckoTerminal page failed, retrying");
                }
                retry
            },
        )
        .await
        .map_err(CodedError::from)
    }

    async fn pools_page(&self, page_number: u32) -> Result<PoolsPage, PageError> {
        self.limiter
            .acquire(1.0, self.config.limiter_wait_timeout)
            .await?;

        let url = format!("{}/api/v2/networks/{}/pools", self.base_url, self.config.network);
        let page = page_number.to_string();
        let response = self
            .client
            .get(&url)
            .query(&[
                ("include", "base_token,quote_token"),
                ("page", page.as_str()),
                ("sort", "h24_volume_usd_desc"),
            ])
            .header("accept", "application/json")
            .send()
            .await
            .map_err(|e| CodedError::from(ProviderError::Http(e)))?;

        let status = response.status();
        if !status.is_success() {
            return Err(CodedError::new(
                status.as_u16(),
                format!("GeckoTerminal returned status {}", status.as_u16()),
            )
            .into());
        }
        read_json(response)
            .await
            .map_err(|e| PageError::Upstream(e.into()))
    }
}

impl<L: RateLimitStore> ApiClient for GeckoTerminalClient<L> {
    async fn health_check(&self) -> Result<HealthStatus, CodedError> {
        let url = format!("{}/api/v2/networks/{}/dexes", self.base_url, self.config.network);
        debug!(url, "performing health check on GeckoTerminal API");

        let result = self
            .client
            .get(&url)
            .timeout(Duration::from_secs(self.config.health_check_timeout_seconds))
            .send()
            .await;
        probe_health(result)
    }

    fn name(&self) -> &'static str {
        "geckoterminal"
    }
}
