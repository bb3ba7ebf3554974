// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Covalent (GoldRush) integration
//!
//! Wallet activity, token balances and NFT holdings. Every request is a [`CovalentJob`]
//! dispatched through the `covalent-requests` queue; [`Covalent`] is the façade the
//! HTTP layer calls, adding a short-lived memo cache on top of the queue.
//!
//! Limiter costs are the provider's credit costs multiplied by ten so that the
//! collectibles lookup, which may need a second request, can cost 1.1 credits without
//! fractional points in the bucket.

use std::{
    fmt,
    sync::{Arc, PoisonError, RwLock},
    time::Duration,
};

use alloy_primitives::Address;
use api_client::{ApiClient, CodedError, HealthStatus};
use fetch_queue::{FetchError, FetchQueue, Job, JobKind, Operation, QueueConfig, QueueOptions, RateLimitStore};
use regex::Regex;
use reqwest::Client;
use serde::Deserialize;
use serde_json::Value;
use shared_types::ChainId;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    api_key::ApiKey,
    cache::{CacheStats, ResponseCache},
    transport::{ProviderError, build_client, normalize_base_url, probe_health, read_json},
};

/// Queue and limiter namespace
pub const COVALENT_QUEUE_NAME: &str = "covalent-requests";

const COST_MULTIPLIER: f64 = 10.0;
const FACADE_CACHE_TTL: Duration = Duration::from_secs(20);
const FACADE_CACHE_CAPACITY: usize = 10_000;
const UNSUPPORTED_CHAIN_PATTERN: &str =
    r"(?i)^\d+/[a-z0-9-]+ chain not supported, currently supports:(\s*\d+/[a-z0-9-]+)+";

/// Configuration for the Covalent API client
#[derive(Debug, Clone)]
pub struct CovalentConfig {
    /// Base URL for the Covalent API
    pub base_url: String,
    /// API key sent as a bearer token
    pub api_key: ApiKey,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Health check timeout in seconds
    pub health_check_timeout_seconds: u64,
}

impl CovalentConfig {
    /// Configuration against the public endpoint
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            base_url: "https://api.covalenthq.com".to_string(),
            api_key,
            timeout_seconds: 30,
            health_check_timeout_seconds: 5,
        }
    }

    /// Point the client at another endpoint
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }
}

/// Covalent request types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CovalentJobKind {
    /// Chains the wallet has been active on
    AccountActivity,
    /// Token and NFT balances with USD quotes
    Balances,
    /// Fungible token balances with metadata
    TokensMetadata,
    /// NFT holdings
    CollectiblesMetadata,
}

impl CovalentJobKind {
    /// Limiter cost of one attempt
    pub fn cost(self) -> f64 {
        match self {
            CovalentJobKind::CollectiblesMetadata => (1.1 * COST_MULTIPLIER).round(),
            _ => COST_MULTIPLIER,
        }
    }
}

impl fmt::Display for CovalentJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            CovalentJobKind::AccountActivity => "accountActivity",
            CovalentJobKind::Balances => "balances",
            CovalentJobKind::TokensMetadata => "tokensMetadata",
            CovalentJobKind::CollectiblesMetadata => "collectiblesMetadata",
        };
        f.write_str(name)
    }
}

impl JobKind for CovalentJobKind {
    fn all() -> &'static [Self] {
        &[
            CovalentJobKind::AccountActivity,
            CovalentJobKind::Balances,
            CovalentJobKind::TokensMetadata,
            CovalentJobKind::CollectiblesMetadata,
        ]
    }
}

/// One Covalent request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CovalentJob {
    /// Request type
    pub kind: CovalentJobKind,
    /// Wallet being queried
    pub wallet: Address,
    /// Chain, required by every kind except account activity
    pub chain: Option<ChainId>,
}

impl CovalentJob {
    /// Activity across all chains
    pub fn account_activity(wallet: Address) -> Self {
        Self {
            kind: CovalentJobKind::AccountActivity,
            wallet,
            chain: None,
        }
    }

    /// Balances on one chain
    pub fn balances(wallet: Address, chain: ChainId) -> Self {
        Self::on_chain(CovalentJobKind::Balances, wallet, chain)
    }

    /// Token metadata on one chain
    pub fn tokens_metadata(wallet: Address, chain: ChainId) -> Self {
        Self::on_chain(CovalentJobKind::TokensMetadata, wallet, chain)
    }

    /// NFT holdings on one chain
    pub fn collectibles_metadata(wallet: Address, chain: ChainId) -> Self {
        Self::on_chain(CovalentJobKind::CollectiblesMetadata, wallet, chain)
    }

    fn on_chain(kind: CovalentJobKind, wallet: Address, chain: ChainId) -> Self {
        Self {
            kind,
            wallet,
            chain: Some(chain),
        }
    }

    fn wallet_lower(&self) -> String {
        self.wallet.to_string().to_lowercase()
    }
}

impl Job for CovalentJob {
    type Kind = CovalentJobKind;
    type Output = Value;

    fn kind(&self) -> CovalentJobKind {
        self.kind
    }

    fn dedup_key(&self) -> String {
        let chain = self
            .chain
            .map_or_else(|| "all".to_string(), |chain| chain.to_string());
        format!("{}:{}:{chain}", self.kind, self.wallet_lower())
    }

    fn validate(&self) -> Result<(), String> {
        match (self.kind, self.chain) {
            (CovalentJobKind::AccountActivity, _) | (_, Some(_)) => Ok(()),
            (kind, None) => Err(format!("{kind} requires a chain id")),
        }
    }
}

/// Provider response envelope
#[derive(Debug, Deserialize)]
struct Envelope {
    data: Option<Value>,
    #[serde(default)]
    error: bool,
    error_message: Option<String>,
    error_code: Option<Value>,
}

struct CovalentInner {
    client: Client,
    config: CovalentConfig,
    base_url: String,
    unsupported_chain: Regex,
    /// Chains with cached NFT data, as last reported by the provider
    supported_chains: RwLock<Option<Vec<u64>>>,
}

/// Covalent API client
///
/// Cheap to clone; clones share the HTTP client and the learned supported-chain list.
#[derive(Clone)]
pub struct CovalentClient {
    inner: Arc<CovalentInner>,
}

impl fmt::Debug for CovalentClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CovalentClient")
            .field("base_url", &self.inner.base_url)
            .field("api_key", &self.inner.config.api_key)
            .finish_non_exhaustive()
    }
}

impl CovalentClient {
    /// Create a new Covalent API client
    ///
    /// # Errors
    ///
    /// Returns an error if the base URL is invalid or the HTTP client cannot be created
    pub fn new(config: CovalentConfig) -> Result<Self, ProviderError> {
        let base_url = normalize_base_url(&config.base_url)?;
        let client = build_client(Duration::from_secs(config.timeout_seconds))?;
        let unsupported_chain = Regex::new(UNSUPPORTED_CHAIN_PATTERN)
            .map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(CovalentInner {
                client,
                config,
                base_url,
                unsupported_chain,
                supported_chains: RwLock::new(None),
            }),
        })
    }

    /// Chains the provider reported as having cached NFT data, once learned
    pub fn supported_nft_chains(&self) -> Option<Vec<u64>> {
        self.inner
            .supported_chains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<Value, CodedError> {
        let envelope = self.request(path, query).await?;
        into_data(envelope)
    }

    async fn request(&self, path: &str, query: &[(&str, &str)]) -> Result<Envelope, CodedError> {
        let url = format!("{}{path}", self.inner.base_url);
        debug!(url, ?query, "requesting Covalent");

        let response = self
            .inner
            .client
            .get(&url)
            .query(query)
            .bearer_auth(self.inner.config.api_key.expose())
            .header("accept", "application/json")
            .send()
            .await
            .map_err(ProviderError::Http)?;

        let status = response.status();
        let mut envelope: Envelope = read_json(response).await?;
        if !status.is_success() {
            envelope.error = true;
            if envelope.error_code.is_none() {
                envelope.error_code = Some(Value::from(status.as_u16()));
            }
        }
        Ok(envelope)
    }

    async fn collectibles(&self, wallet: &str, chain: ChainId) -> Result<Value, CodedError> {
        let path = format!("/v1/{chain}/address/{wallet}/balances_nft/");
        let with_uncached = self
            .supported_nft_chains()
            .is_some_and(|chains| !chains.contains(&chain.value()));

        let envelope = self
            .request(&path, &nft_query(with_uncached))
            .await?;

        if envelope.error
            && let Some(chains) = envelope
                .error_message
                .as_deref()
                .and_then(|message| self.parse_supported_chains(message))
        {
            info!(
                %chain,
                supported = chains.len(),
                "Covalent reported an uncached chain, retrying with uncached data"
            );
            *self
                .inner
                .supported_chains
                .write()
                .unwrap_or_else(PoisonError::into_inner) = Some(chains);
            return self.get(&path, &nft_query(true)).await;
        }

        into_data(envelope)
    }

    /// Chain ids listed in an "chain not supported" message
    fn parse_supported_chains(&self, message: &str) -> Option<Vec<u64>> {
        let matched = self.inner.unsupported_chain.find(message)?;
        let (_, list) = matched.as_str().split_once(':')?;
        Some(
            list.split_whitespace()
                .filter_map(|entry| entry.split('/').next()?.parse().ok())
                .collect(),
        )
    }
}

fn nft_query(with_uncached: bool) -> [(&'static str, &'static str); 2] {
    [
        ("with-uncached", if with_uncached { "true" } else { "false" }),
        ("no-spam", "true"),
    ]
}

fn into_data(envelope: Envelope) -> Result<Value, CodedError> {
    if envelope.error {
        let error = CodedError::from_reported(
            envelope.error_code.as_ref(),
            envelope.error_message.as_deref(),
        );
        warn!(code = error.code(), message = error.message(), "Covalent returned an error");
        return Err(error);
    }
    Ok(envelope.data.unwrap_or(Value::Null))
}

impl Operation<CovalentJob> for CovalentClient {
    async fn execute(&self, job: &CovalentJob) -> Result<Value, CodedError> {
        let wallet = job.wallet_lower();
        let chain = match (job.kind, job.chain) {
            (CovalentJobKind::AccountActivity, _) => None,
            (_, Some(chain)) => Some(chain),
            (kind, None) => {
                return Err(CodedError::new(400, format!("{kind} requires a chain id")));
            }
        };

        match (job.kind, chain) {
            (CovalentJobKind::Balances, Some(chain)) => {
                self.get(
                    &format!("/v1/{chain}/address/{wallet}/balances_v2/"),
                    &[
                        ("nft", "true"),
                        ("no-nft-asset-metadata", "true"),
                        ("quote-currency", "USD"),
                        ("no-spam", "true"),
                    ],
                )
                .await
            }
            (CovalentJobKind::TokensMetadata, Some(chain)) => {
                self.get(
                    &format!("/v1/{chain}/address/{wallet}/balances_v2/"),
                    &[("nft", "false"), ("quote-currency", "USD"), ("no-spam", "true")],
                )
                .await
            }
            (CovalentJobKind::CollectiblesMetadata, Some(chain)) => {
                self.collectibles(&wallet, chain).await
            }
            _ => {
                self.get(
                    &format!("/v1/address/{wallet}/activity/"),
                    &[("testnets", "false")],
                )
                .await
            }
        }
    }
}

impl ApiClient for CovalentClient {
    async fn health_check(&self) -> Result<HealthStatus, CodedError> {
        let url = format!("{}/v1/chains/status/", self.inner.base_url);
        debug!(url, "performing health check on Covalent API");

        let result = self
            .inner
            .client
            .get(&url)
            .bearer_auth(self.inner.config.api_key.expose())
            .timeout(Duration::from_secs(self.inner.config.health_check_timeout_seconds))
            .send()
            .await;
        probe_health(result)
    }

    fn name(&self) -> &'static str {
        "covalent"
    }
}

/// Queue configuration for `rps` provider requests per second
pub fn queue_config(rps: f64, options: QueueOptions) -> QueueConfig<CovalentJobKind> {
    QueueConfig::new(
        COVALENT_QUEUE_NAME,
        CovalentJobKind::all().iter().map(|kind| (*kind, kind.cost())),
        rps * COST_MULTIPLIER,
        Duration::from_secs(1),
    )
    .with_options(options)
}

/// Queued Covalent access with a short-lived memo cache
#[derive(Debug)]
pub struct Covalent {
    client: CovalentClient,
    queue: FetchQueue<CovalentJob>,
    cache: ResponseCache<String, Value>,
}

impl Covalent {
    /// Start the Covalent queue
    ///
    /// # Errors
    ///
    /// Returns an error if the queue configuration is inconsistent
    pub fn start<L: RateLimitStore>(
        client: CovalentClient,
        config: QueueConfig<CovalentJobKind>,
        store: Arc<L>,
        cancel: CancellationToken,
    ) -> Result<Self, ProviderError> {
        let queue = FetchQueue::start(config, client.clone(), store, cancel)?;
        Ok(Self {
            client,
            queue,
            cache: ResponseCache::new("covalent", FACADE_CACHE_TTL, FACADE_CACHE_CAPACITY),
        })
    }

    /// The underlying client
    pub fn client(&self) -> &CovalentClient {
        &self.client
    }

    /// The dispatcher queue
    pub fn queue(&self) -> &FetchQueue<CovalentJob> {
        &self.queue
    }

    /// Memo cache statistics
    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    /// Activity across chains
    pub async fn account_activity(&self, wallet: Address) -> Result<Value, FetchError> {
        self.fetch(CovalentJob::account_activity(wallet)).await
    }

    /// Balances on one chain
    pub async fn balances(&self, wallet: Address, chain: ChainId) -> Result<Value, FetchError> {
        self.fetch(CovalentJob::balances(wallet, chain)).await
    }

    /// Token metadata on one chain
    pub async fn tokens_metadata(&self, wallet: Address, chain: ChainId) -> Result<Value, FetchError> {
        self.fetch(CovalentJob::tokens_metadata(wallet, chain)).await
    }

    /// NFT holdings on one chain
    pub async fn collectibles_metadata(
        &self,
        wallet: Address,
        chain: ChainId,
    ) -> Result<Value, FetchError> {
        self.fetch(CovalentJob::collectibles_metadata(wallet, chain))
            .await
    }

    /// Whether the wallet has any recorded activity
    pub async fn is_initialized(&self, wallet: Address) -> Result<bool, FetchError> {
        let activity = self.account_activity(wallet).await?;
        Ok(activity
            .get("items")
            .and_then(Value::as_array)
            .is_some_and(|items| !items.is_empty()))
    }

    /// Close the queue, letting running requests finish
    pub async fn shutdown(&self) -> usize {
        self.queue.shutdown().await
    }

    async fn fetch(&self, job: CovalentJob) -> Result<Value, FetchError> {
        let key = job.dedup_key();
        if let Some(cached) = self.cache.get(&key) {
            return Ok(cached);
        }

        let value = self.queue.fetch(job).await?;
        self.cache.insert(key, value.clone());
        Ok(value)
    }
}
