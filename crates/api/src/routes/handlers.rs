// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP request handlers module
//!
//! Every provider-backed handler validates its query, dispatches through the
//! provider's queue and records the outcome before answering. Provider payloads are
//! passed through unchanged.

use std::{collections::BTreeMap, str::FromStr};

use axum::{
    Json,
    extract::{Path, Query, State},
};
use external_apis::{QueueSummary, TransactionsPage};
use fetch_queue::{FetchError, JobSnapshot, JobState};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use utoipa::ToSchema;

use crate::{
    error::{ServerError, ServerResult},
    extractors::{MultichainQuery, RatesQuery, TransactionsQuery, ValidatedQuery, WalletQuery},
    state::{HealthCheck, ServerState},
};

const COVALENT: &str = "covalent";
const ALCHEMY: &str = "alchemy";
const GECKOTERMINAL: &str = "geckoterminal";

/// Health check endpoint handler
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    summary = "Health check endpoint",
    description = "Returns the current health status of the gateway including version, environment information, and the status of every configured provider.",
    responses(
        (status = 200, description = "Gateway health", body = HealthCheck)
    )
)]
pub async fn health_handler(State(state): State<ServerState>) -> Json<HealthCheck> {
    Json(state.health_check().await)
}

/// Token balances of a wallet on one chain
#[utoipa::path(
    get,
    path = "/api/balances",
    tag = "wallets",
    summary = "Wallet balances",
    params(
        ("walletAddress" = String, Query, description = "20-byte hex account address"),
        ("chainId" = u64, Query, description = "EVM chain id")
    ),
    responses(
        (status = 200, description = "Covalent balances payload, including NFTs without metadata"),
        (status = 400, description = "Invalid query parameters"),
        (status = 429, description = "Too many requests from this IP"),
        (status = 503, description = "Covalent is not configured or has no capacity")
    )
)]
pub async fn balances_handler(
    State(state): State<ServerState>,
    ValidatedQuery(query): ValidatedQuery<WalletQuery>,
) -> ServerResult<Json<Value>> {
    let covalent = state.registry().covalent()?;
    let result = covalent.balances(query.wallet_address, query.chain_id).await;
    state.metrics().record_fetch(COVALENT, "balances", &result);
    Ok(Json(result?))
}

/// Fungible token metadata of a wallet on one chain
#[utoipa::path(
    get,
    path = "/api/tokens-metadata",
    tag = "wallets",
    summary = "Wallet tokens metadata",
    params(
        ("walletAddress" = String, Query, description = "20-byte hex account address"),
        ("chainId" = u64, Query, description = "EVM chain id")
    ),
    responses(
        (status = 200, description = "Covalent balances payload without NFTs"),
        (status = 400, description = "Invalid query parameters"),
        (status = 429, description = "Too many requests from this IP"),
        (status = 503, description = "Covalent is not configured or has no capacity")
    )
)]
pub async fn tokens_metadata_handler(
    State(state): State<ServerState>,
    ValidatedQuery(query): ValidatedQuery<WalletQuery>,
) -> ServerResult<Json<Value>> {
    let covalent = state.registry().covalent()?;
    let result = covalent
        .tokens_metadata(query.wallet_address, query.chain_id)
        .await;
    state.metrics().record_fetch(COVALENT, "tokensMetadata", &result);
    Ok(Json(result?))
}

/// NFT holdings of a wallet on one chain
#[utoipa::path(
    get,
    path = "/api/collectibles-metadata",
    tag = "wallets",
    summary = "Wallet collectibles metadata",
    params(
        ("walletAddress" = String, Query, description = "20-byte hex account address"),
        ("chainId" = u64, Query, description = "EVM chain id")
    ),
    responses(
        (status = 200, description = "Covalent NFT payload"),
        (status = 400, description = "Invalid query parameters"),
        (status = 429, description = "Too many requests from this IP"),
        (status = 503, description = "Covalent is not configured or has no capacity")
    )
)]
pub async fn collectibles_metadata_handler(
    State(state): State<ServerState>,
    ValidatedQuery(query): ValidatedQuery<WalletQuery>,
) -> ServerResult<Json<Value>> {
    let covalent = state.registry().covalent()?;
    let result = covalent
        .collectibles_metadata(query.wallet_address, query.chain_id)
        .await;
    state
        .metrics()
        .record_fetch(COVALENT, "collectiblesMetadata", &result);
    Ok(Json(result?))
}

/// Whether a wallet has been used on any chain
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct IsInitializedResponse {
    /// The account has recorded activity
    pub is_initialized: bool,
}

/// Account activity check across chains
#[utoipa::path(
    get,
    path = "/api/is-initialized",
    tag = "wallets",
    summary = "Wallet initialization",
    params(
        ("walletAddress" = String, Query, description = "20-byte hex account address")
    ),
    responses(
        (status = 200, description = "Whether the wallet has activity", body = IsInitializedResponse),
        (status = 400, description = "Invalid query parameters"),
        (status = 503, description = "Covalent is not configured or has no capacity")
    )
)]
pub async fn is_initialized_handler(
    State(state): State<ServerState>,
    ValidatedQuery(query): ValidatedQuery<MultichainQuery>,
) -> ServerResult<Json<IsInitializedResponse>> {
    let covalent = state.registry().covalent()?;
    let result = covalent.is_initialized(query.wallet_address).await;
    state
        .metrics()
        .record_fetch(COVALENT, "accountActivity", &result);
    Ok(Json(IsInitializedResponse {
        is_initialized: result?,
    }))
}

/// Transfers and approvals of an account, one page at a time
#[utoipa::path(
    get,
    path = "/api/transactions/v2",
    tag = "wallets",
    summary = "Wallet transactions",
    params(
        ("chainId" = u64, Query, description = "EVM chain id"),
        ("walletAddress" = String, Query, description = "20-byte hex account address"),
        ("contractAddress" = Option<String>, Query, description = "Token contract, or `eth` for native currency"),
        ("olderThanBlockHeight" = Option<u64>, Query, description = "Only transfers in earlier blocks")
    ),
    responses(
        (status = 200, description = "Transfers newest first, with approvals granted in the same blocks"),
        (status = 400, description = "Invalid query parameters"),
        (status = 422, description = "Chain not supported by Alchemy"),
        (status = 429, description = "Too many requests from this IP"),
        (status = 503, description = "Alchemy is not configured or has no capacity")
    )
)]
pub async fn transactions_handler(
    State(state): State<ServerState>,
    ValidatedQuery(query): ValidatedQuery<TransactionsQuery>,
) -> ServerResult<Json<TransactionsPage>> {
    let alchemy = state.registry().alchemy()?;
    let result = alchemy
        .fetch_transactions(
            query.chain_id,
            query.wallet_address,
            query.contract_address,
            query.older_than_block_height,
        )
        .await;
    state.metrics().record_fetch(ALCHEMY, "transactions", &result);
    Ok(Json(result?))
}

/// USD prices of tokens, keyed by lowercase address
#[utoipa::path(
    get,
    path = "/api/exchange-rates",
    tag = "prices",
    summary = "Token exchange rates",
    params(
        ("addresses" = String, Query, description = "Comma-separated token addresses")
    ),
    responses(
        (status = 200, description = "Prices of the tokens found in GeckoTerminal pools", body = BTreeMap<String, String>),
        (status = 400, description = "Invalid query parameters"),
        (status = 503, description = "GeckoTerminal is disabled or has no capacity")
    )
)]
pub async fn exchange_rates_handler(
    State(state): State<ServerState>,
    ValidatedQuery(query): ValidatedQuery<RatesQuery>,
) -> ServerResult<Json<BTreeMap<String, String>>> {
    let geckoterminal = state.registry().geckoterminal()?;
    let result = geckoterminal
        .exchange_rates(&query.addresses)
        .await
        .map_err(FetchError::Upstream);
    state
        .metrics()
        .record_fetch(GECKOTERMINAL, "exchangeRates", &result);
    Ok(Json(result?))
}

/// Job counts of every provider queue
#[derive(Debug, Serialize, ToSchema)]
pub struct QueuesResponse {
    /// One entry per queue
    #[schema(value_type = Vec<Object>)]
    pub queues: Vec<QueueSummary>,
}

/// Queue diagnostics
#[utoipa::path(
    get,
    path = "/api/queues",
    tag = "queues",
    summary = "Queue job counts",
    responses(
        (status = 200, description = "Job counts per state for every provider queue", body = QueuesResponse)
    )
)]
pub async fn queues_handler(State(state): State<ServerState>) -> Json<QueuesResponse> {
    Json(QueuesResponse {
        queues: state.registry().queue_summaries(),
    })
}

/// Query of the jobs endpoint
#[derive(Debug, Default, Deserialize)]
pub struct JobsParams {
    state: Option<String>,
}

/// Jobs of one queue in one state
#[derive(Debug, Serialize, ToSchema)]
pub struct JobsResponse {
    /// Queue name
    pub queue: String,
    /// Requested state
    #[schema(value_type = String)]
    pub state: JobState,
    /// Matching jobs, oldest first
    #[schema(value_type = Vec<Object>)]
    pub jobs: Vec<JobSnapshot>,
}

/// Retained and live jobs of a queue
#[utoipa::path(
    get,
    path = "/api/queues/{name}/jobs",
    tag = "queues",
    summary = "Queue jobs",
    params(
        ("name" = String, Path, description = "Queue name, e.g. `covalent-requests`"),
        ("state" = Option<String>, Query, description = "waiting, delayed, active, completed or failed; defaults to failed")
    ),
    responses(
        (status = 200, description = "Jobs in the requested state", body = JobsResponse),
        (status = 400, description = "Unknown job state"),
        (status = 404, description = "Unknown queue")
    )
)]
pub async fn queue_jobs_handler(
    State(state): State<ServerState>,
    Path(name): Path<String>,
    Query(params): Query<JobsParams>,
) -> ServerResult<Json<JobsResponse>> {
    let job_state = match params.state.as_deref() {
        Some(value) => JobState::from_str(value).map_err(ServerError::Validation)?,
        None => JobState::Failed,
    };
    let jobs = state
        .registry()
        .queue_jobs(&name, job_state)
        .ok_or_else(|| ServerError::NotFound(format!("unknown queue '{name}'")))?;

    Ok(Json(JobsResponse {
        queue: name,
        state: job_state,
        jobs,
    }))
}
