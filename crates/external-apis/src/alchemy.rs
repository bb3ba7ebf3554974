// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Alchemy JSON-RPC integration
//!
//! Asset transfers (`alchemy_getAssetTransfers`) and approval logs (`eth_getLogs`) for
//! an account, dispatched through the `alchemy-requests` queue. The queue's limiter is
//! denominated in Alchemy compute units.

pub mod approvals;
pub mod networks;
pub mod transactions;
pub mod transfers;

pub use transactions::{Alchemy, TransactionsPage};

use std::{fmt, sync::Arc, time::Duration};

use alloy_primitives::Address;
use api_client::{ApiClient, CodedError, HealthStatus};
use chrono::{DateTime, SecondsFormat};
use fetch_queue::{Job, JobKind, Operation, QueueConfig, QueueOptions};
use reqwest::Client;
use serde::{Deserialize, de::DeserializeOwned};
use serde_json::{Value, json};
use shared_types::ChainId;
use thiserror::Error;
use tracing::{debug, warn};

use self::{
    approvals::{BlockRangeMatcher, Log, approval_topics},
    networks::{network_for, supports_internal_transfers},
    transfers::{ASSET_CATEGORIES, AssetTransfer, GAS_CATEGORIES, TRANSFERS_PAGE_LIMIT, TransferMetadata},
};
use crate::{
    api_key::ApiKey,
    cache::ResponseCache,
    transport::{ProviderError, build_client, probe_health, read_json},
};

/// Queue and limiter namespace
pub const ALCHEMY_QUEUE_NAME: &str = "alchemy-requests";

/// Contract filter selecting native-currency transfers only
pub const NATIVE_TOKEN_SLUG: &str = "eth";

const INVALID_PARAMS: i64 = -32602;
const RATE_LIMITED: i64 = 429;
const BLOCK_TIMESTAMP_TTL: Duration = Duration::from_secs(24 * 60 * 60);
const BLOCK_TIMESTAMP_CAPACITY: usize = 100_000;

/// Configuration for the Alchemy client
#[derive(Debug, Clone)]
pub struct AlchemyConfig {
    /// RPC URL with `{network}` and `{api_key}` placeholders
    pub url_template: String,
    /// API key
    pub api_key: ApiKey,
    /// Request timeout in seconds
    pub timeout_seconds: u64,
    /// Health check timeout in seconds
    pub health_check_timeout_seconds: u64,
}

impl AlchemyConfig {
    /// Configuration against the public endpoints
    pub fn new(api_key: ApiKey) -> Self {
        Self {
            url_template: "https://{network}.g.alchemy.com/v2/{api_key}".to_string(),
            api_key,
            timeout_seconds: 30,
            health_check_timeout_seconds: 5,
        }
    }

    /// Use another RPC URL template
    #[must_use]
    pub fn with_url_template(mut self, url_template: impl Into<String>) -> Self {
        self.url_template = url_template.into();
        self
    }
}

/// Alchemy request types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AlchemyJobKind {
    /// One capped page of asset transfers in one direction
    AssetTransfers,
    /// Approval logs over a block span
    Approvals,
}

impl AlchemyJobKind {
    /// Compute units charged per attempt
    pub fn cost(self) -> f64 {
        match self {
            AlchemyJobKind::AssetTransfers => 120.0,
            AlchemyJobKind::Approvals => 60.0,
        }
    }
}

impl fmt::Display for AlchemyJobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlchemyJobKind::AssetTransfers => f.write_str("assetTransfers"),
            AlchemyJobKind::Approvals => f.write_str("approvals"),
        }
    }
}

impl JobKind for AlchemyJobKind {
    fn all() -> &'static [Self] {
        &[AlchemyJobKind::AssetTransfers, AlchemyJobKind::Approvals]
    }
}

/// Which side of a transfer the account is on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Sent by the account
    Outgoing,
    /// Received by the account
    Incoming,
}

/// Parameters of an asset transfers page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransfersRequest {
    /// Chain
    pub chain: ChainId,
    /// Account
    pub account: Address,
    /// Contract filter; [`NATIVE_TOKEN_SLUG`] selects native transfers
    pub contract: Option<String>,
    /// Direction
    pub direction: Direction,
    /// Newest block to include; latest when absent
    pub to_block: Option<u64>,
}

/// Parameters of an approvals lookup
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApprovalsRequest {
    /// Chain
    pub chain: ChainId,
    /// Account granting approvals
    pub account: Address,
    /// Token contract emitting the logs
    pub contract: Option<String>,
    /// First block, inclusive
    pub from_block: u64,
    /// Last block, inclusive
    pub to_block: u64,
}

/// One Alchemy request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AlchemyJob {
    /// `alchemy_getAssetTransfers`
    AssetTransfers(TransfersRequest),
    /// `eth_getLogs` for approvals
    Approvals(ApprovalsRequest),
}

/// Result of an [`AlchemyJob`]
#[derive(Debug, Clone)]
pub enum AlchemyResponse {
    /// Asset transfers, block descending
    Transfers(Vec<AssetTransfer>),
    /// Approval logs
    Logs(Vec<Log>),
}

fn lower(address: Address) -> String {
    address.to_string().to_lowercase()
}

fn hex_block(block: u64) -> String {
    format!("{block:#x}")
}

impl Job for AlchemyJob {
    type Kind = AlchemyJobKind;
    type Output = AlchemyResponse;

    fn kind(&self) -> AlchemyJobKind {
        match self {
            AlchemyJob::AssetTransfers(_) => AlchemyJobKind::AssetTransfers,
            AlchemyJob::Approvals(_) => AlchemyJobKind::Approvals,
        }
    }

    fn dedup_key(&self) -> String {
        let kind = self.kind();
        match self {
            AlchemyJob::AssetTransfers(request) => format!(
                "{kind}:{}:{}:{}:{}:{}",
                request.chain,
                lower(request.account),
                request.contract.as_deref().unwrap_or_default().to_lowercase(),
                request.direction == Direction::Incoming,
                request.to_block.map_or_else(|| "latest".to_string(), hex_block),
            ),
            AlchemyJob::Approvals(request) => format!(
                "{kind}:{}:{}:{}:{}:{}",
                request.chain,
                lower(request.account),
                request.contract.as_deref().unwrap_or_default().to_lowercase(),
                hex_block(request.to_block),
                hex_block(request.from_block),
            ),
        }
    }

    fn validate(&self) -> Result<(), String> {
        match self {
            AlchemyJob::Approvals(request) if request.from_block > request.to_block => Err(format!(
                "approvals span starts at block {} after its end {}",
                request.from_block, request.to_block
            )),
            _ => Ok(()),
        }
    }
}

/// JSON-RPC failures before they are reduced to a [`CodedError`]
#[derive(Debug, Error)]
pub enum RpcError {
    /// The node returned a JSON-RPC error object
    #[error("{message}")]
    Rpc {
        /// JSON-RPC error code
        code: i64,
        /// Error message
        message: String,
    },
    /// Transport or HTTP failure
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

impl From<RpcError> for CodedError {
    fn from(value: RpcError) -> Self {
        match value {
            RpcError::Rpc { code, message } if code == RATE_LIMITED => CodedError::new(429, message),
            RpcError::Rpc { message, .. } => CodedError::internal(message),
            RpcError::Provider(error) => error.into(),
        }
    }
}

#[derive(Debug, Deserialize)]
struct RpcResponse<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Debug, Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

#[derive(Debug, Deserialize)]
struct TransfersResult {
    #[serde(default)]
    transfers: Vec<AssetTransfer>,
}

#[derive(Debug, Deserialize)]
struct BlockHeader {
    timestamp: String,
}

struct AlchemyInner {
    client: Client,
    config: AlchemyConfig,
    block_range: BlockRangeMatcher,
    block_timestamps: ResponseCache<(ChainId, u64), String>,
}

/// Alchemy API client
///
/// Cheap to clone; clones share the HTTP client and the block timestamp cache.
#[derive(Clone)]
pub struct AlchemyClient {
    inner: Arc<AlchemyInner>,
}

impl fmt::Debug for AlchemyClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AlchemyClient")
            .field("api_key", &self.inner.config.api_key)
            .field("cached_timestamps", &self.inner.block_timestamps.len())
            .finish_non_exhaustive()
    }
}

impl AlchemyClient {
    /// Create a new Alchemy client
    ///
    /// # Errors
    ///
    /// Returns an error if the URL template lacks a `{network}` placeholder or the HTTP
    /// client cannot be created
    pub fn new(config: AlchemyConfig) -> Result<Self, ProviderError> {
        if !config.url_template.contains("{network}") {
            return Err(ProviderError::Config(
                "RPC URL template must contain {network}".to_string(),
            ));
        }
        let client = build_client(Duration::from_secs(config.timeout_seconds))?;
        let block_range =
            BlockRangeMatcher::new().map_err(|e| ProviderError::Config(e.to_string()))?;

        Ok(Self {
            inner: Arc::new(AlchemyInner {
                client,
                config,
                block_range,
                block_timestamps: ResponseCache::new(
                    "block-timestamps",
                    BLOCK_TIMESTAMP_TTL,
                    BLOCK_TIMESTAMP_CAPACITY,
                ),
            }),
        })
    }

    /// Matcher for the logs block-range error
    pub fn block_range_matcher(&self) -> &BlockRangeMatcher {
        &self.inner.block_range
    }

    fn rpc_url(&self, chain: ChainId) -> Result<String, CodedError> {
        let network = network_for(chain).ok_or_else(|| CodedError::new(422, "Chain not supported"))?;
        Ok(self
            .inner
            .config
            .url_template
            .replace("{network}", network)
            .replace("{api_key}", self.inner.config.api_key.expose()))
    }

    async fn rpc<T: DeserializeOwned>(
        &self,
        url: &str,
        method: &str,
        params: Value,
    ) -> Result<T, RpcError> {
        debug!(method, "calling Alchemy");
        let body = json!({ "jsonrpc": "2.0", "id": 1, "method": method, "params": params });
        let response = self
            .inner
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(ProviderError::Http)?;

        let status = response.status();
        let envelope: RpcResponse<T> = read_json(response).await?;
        if let Some(error) = envelope.error {
            return Err(RpcError::Rpc {
                code: error.code,
                message: error.message,
            });
        }
        if !status.is_success() {
            return Err(ProviderError::Api {
                status: status.as_u16(),
                message: status.canonical_reason().unwrap_or("Unknown error").to_string(),
            }
            .into());
        }
        envelope
            .result
            .ok_or_else(|| ProviderError::InvalidResponse(format!("{method} returned no result")).into())
    }

    async fn asset_transfers(&self, request: &TransfersRequest) -> Result<Vec<AssetTransfer>, CodedError> {
        let url = self.rpc_url(request.chain)?;
        let network = network_for(request.chain).unwrap_or_default();

        let native_only = request.contract.as_deref() == Some(NATIVE_TOKEN_SLUG);
        let mut categories: Vec<&str> = if native_only {
            GAS_CATEGORIES.to_vec()
        } else if request.contract.is_some() {
            ASSET_CATEGORIES.to_vec()
        } else {
            GAS_CATEGORIES.iter().chain(ASSET_CATEGORIES).copied().collect()
        };
        if !supports_internal_transfers(network) {
            categories.retain(|category| *category != "internal");
        }

        let mut params = json!({
            "fromBlock": "0x0",
            "toBlock": request.to_block.map_or_else(|| "latest".to_string(), hex_block),
            "order": "desc",
            "category": categories,
            "withMetadata": true,
            "excludeZeroValue": true,
            "maxCount": hex_block(TRANSFERS_PAGE_LIMIT as u64),
        });
        if let (Some(contract), false) = (&request.contract, native_only) {
            params["contractAddresses"] = json!([contract]);
        }
        let side = match request.direction {
            Direction::Outgoing => "fromAddress",
            Direction::Incoming => "toAddress",
        };
        params[side] = json!(lower(request.account));

        let result: TransfersResult = self
            .rpc(&url, "alchemy_getAssetTransfers", json!([params]))
            .await?;

        let mut transfers = result.transfers;
        for transfer in &mut transfers {
            if transfer.metadata.is_none() {
                let timestamp = self
                    .block_timestamp(&url, request.chain, transfer.block_number())
                    .await?;
                transfer.metadata = Some(TransferMetadata {
                    block_timestamp: timestamp,
                });
            }
        }
        Ok(transfers)
    }

    async fn approvals(&self, request: &ApprovalsRequest) -> Result<Vec<Log>, CodedError> {
        let url = self.rpc_url(request.chain)?;
        let mut filter = json!({
            "fromBlock": hex_block(request.from_block),
            "toBlock": hex_block(request.to_block),
            "topics": approval_topics(&lower(request.account)),
        });
        if let Some(contract) = &request.contract {
            filter["address"] = json!(contract);
        }

        match self.rpc(&url, "eth_getLogs", json!([filter])).await {
            Ok(logs) => Ok(logs),
            Err(RpcError::Rpc { message, .. }) if self.inner.block_range.is_match(&message) => {
                Err(CodedError::new(400, message))
            }
            Err(RpcError::Rpc { code, message }) if code == INVALID_PARAMS => {
                debug!(message, "logs query rejected as invalid, treating as empty");
                Ok(Vec::new())
            }
            Err(error) => Err(error.into()),
        }
    }

    /// ISO-8601 timestamp of a block, memoised per chain and block
    async fn block_timestamp(&self, url: &str, chain: ChainId, block: u64) -> Result<String, CodedError> {
        if let Some(cached) = self.inner.block_timestamps.get(&(chain, block)) {
            return Ok(cached);
        }

        let header: Option<BlockHeader> = self
            .rpc(url, "eth_getBlockByNumber", json!([hex_block(block), false]))
            .await?;
        let timestamp = header
            .and_then(|header| transfers::parse_block_number(&header.timestamp))
            .and_then(|seconds| i64::try_from(seconds).ok())
            .and_then(|seconds| DateTime::from_timestamp(seconds, 0))
            .map(|time| time.to_rfc3339_opts(SecondsFormat::Millis, true))
            .ok_or_else(|| CodedError::internal("Block timestamp not found"))?;

        self.inner
            .block_timestamps
            .insert((chain, block), timestamp.clone());
        Ok(timestamp)
    }
}

impl Operation<AlchemyJob> for AlchemyClient {
    async fn execute(&self, job: &AlchemyJob) -> Result<AlchemyResponse, CodedError> {
        let result = match job {
            AlchemyJob::AssetTransfers(request) => {
                self.asset_transfers(request).await.map(AlchemyResponse::Transfers)
            }
            AlchemyJob::Approvals(request) => self.approvals(request).await.map(AlchemyResponse::Logs),
        };
        if let Err(error) = &result {
            warn!(kind = %job.kind(), code = error.code(), message = error.message(), "Alchemy request failed");
        }
        result
    }
}

impl ApiClient for AlchemyClient {
    async fn health_check(&self) -> Result<HealthStatus, CodedError> {
        let url = self.rpc_url(ChainId::ETHEREUM)?;
        debug!("performing health check on Alchemy API");

        let result = self
            .inner
            .client
            .post(&url)
            .json(&json!({ "jsonrpc": "2.0", "id": 1, "method": "eth_blockNumber", "params": [] }))
            .timeout(Duration::from_secs(self.inner.config.health_check_timeout_seconds))
            .send()
            .await;
        probe_health(result)
    }

    fn name(&self) -> &'static str {
        "alchemy"
    }
}

/// Queue configuration for `compute_units` per second
pub fn queue_config(compute_units: f64, options: QueueOptions) -> QueueConfig<AlchemyJobKind> {
    QueueConfig::new(
        ALCHEMY_QUEUE_NAME,
        AlchemyJobKind::all().iter().map(|kind| (*kind, kind.cost())),
        compute_units,
        Duration::from_secs(1),
    )
    .with_options(options)
}
