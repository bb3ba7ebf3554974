// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for the queued Covalent client
//!
//! These tests use wiremock to stand in for the Covalent API and drive requests
//! through a real fetch queue.

use std::sync::Arc;

use api_client::{ApiClient, HealthStatus};
use external_apis::{
    Covalent, CovalentClient, CovalentConfig,
    covalent::queue_config,
};
use fetch_queue::{FetchError, MemoryRateLimitStore};
use serde_json::json;
use shared_types::ChainId;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{header, method, path, query_param},
};

mod fixtures;
use fixtures::*;

fn start(mock_server: &MockServer, attempts: u32) -> Covalent {
    let config = CovalentConfig::new(api_key()).with_base_url(mock_server.uri());
    let client = CovalentClient::new(config).unwrap();
    Covalent::start(
        client,
        queue_config(50.0, queue_options(attempts)),
        Arc::new(MemoryRateLimitStore::new()),
        CancellationToken::new(),
    )
    .unwrap()
}

/// Balances are fetched once and then served from the memo cache
#[tokio::test]
async fn balances_success_is_cached() {
    let mock_server = MockServer::start().await;
    let covalent = start(&mock_server, 1);

    Mock::given(method("GET"))
        .and(path(format!("/v1/1/address/{}/balances_v2/", wallet_lower())))
        .and(query_param("nft", "true"))
        .and(query_param("quote-currency", "USD"))
        .and(header("authorization", format!("Bearer {TEST_API_KEY}").as_str()))
        .respond_with(ResponseTemplate::new(200).set_body_json(covalent_data(json!({
            "address": wallet_lower(),
            "chain_id": 1,
            "items": [{ "contract_ticker_symbol": "ETH", "balance": "1000000000000000000" }]
        }))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let first = covalent.balances(wallet(), ChainId::ETHEREUM).await.unwrap();
    assert_eq!(first["items"][0]["contract_ticker_symbol"], "ETH");

    let second = covalent.balances(wallet(), ChainId::ETHEREUM).await.unwrap();
    assert_eq!(first, second);

    let stats = covalent.cache_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.entry_count, 1);
}

/// Token metadata excludes NFTs
#[tokio::test]
async fn tokens_metadata_requests_fungible_tokens() {
    let mock_server = MockServer::start().await;
    let covalent = start(&mock_server, 1);

    Mock::given(method("GET"))
        .and(path(format!("/v1/137/address/{}/balances_v2/", wallet_lower())))
        .and(query_param("nft", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(covalent_data(json!({ "items": [] }))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let data = covalent
        .tokens_metadata(wallet(), ChainId::POLYGON)
        .await
        .unwrap();
    assert_eq!(data["items"], json!([]));
}

/// Client errors keep their code and message and are not retried
#[tokio::test]
async fn client_error_is_not_retried() {
    let mock_server = MockServer::start().await;
    let covalent = start(&mock_server, 5);

    Mock::given(method("GET"))
        .and(path(format!("/v1/1/address/{}/balances_v2/", wallet_lower())))
        .respond_with(
            ResponseTemplate::new(400).set_body_json(covalent_error(400, "Malformed address provided")),
        )
        .expect(1)
        .mount(&mock_server)
        .await;

    let error = covalent
        .balances(wallet(), ChainId::ETHEREUM)
        .await
        .unwrap_err();
    assert_eq!(error.status_code(), 400);
    assert!(error.to_string().contains("Malformed address provided"));
}

/// Transient failures are retried until they succeed
#[tokio::test]
async fn server_error_is_retried() {
    let mock_server = MockServer::start().await;
    let covalent = start(&mock_server, 3);
    let activity_path = format!("/v1/address/{}/activity/", wallet_lower());

    Mock::given(method("GET"))
        .and(path(activity_path.as_str()))
        .respond_with(ResponseTemplate::new(503).set_body_json(covalent_error(503, "Service unavailable")))
        .up_to_n_times(1)
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(activity_path.as_str()))
        .and(query_param("testnets", "false"))
        .respond_with(ResponseTemplate::new(200).set_body_json(covalent_data(json!({
            "items": [{ "name": "eth-mainnet", "chain_id": "1" }]
        }))))
        .expect(1)
        .mount(&mock_server)
        .await;

    assert!(covalent.is_initialized(wallet()).await.unwrap());
}

/// A wallet without activity is not initialized
#[tokio::test]
async fn empty_activity_is_not_initialized() {
    let mock_server = MockServer::start().await;
    let covalent = start(&mock_server, 1);

    Mock::given(method("GET"))
        .and(path(format!("/v1/address/{}/activity/", wallet_lower())))
        .respond_with(ResponseTemplate::new(200).set_body_json(covalent_data(json!({ "items": [] }))))
        .mount(&mock_server)
        .await;

    assert!(!covalent.is_initialized(wallet()).await.unwrap());
}

/// An uncached-chain error switches the request to uncached data and is remembered
#[tokio::test]
async fn collectibles_fall_back_to_uncached_data() {
    let mock_server = MockServer::start().await;
    let covalent = start(&mock_server, 1);
    let nft_path = format!("/v1/8453/address/{}/balances_nft/", wallet_lower());

    Mock::given(method("GET"))
        .and(path(nft_path.as_str()))
        .and(query_param("with-uncached", "false"))
        .respond_with(ResponseTemplate::new(501).set_body_json(covalent_error(
            501,
            "8453/base-mainnet chain not supported, currently supports: 1/eth-mainnet 137/matic-mainnet",
        )))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("GET"))
        .and(path(nft_path.as_str()))
        .and(query_param("with-uncached", "true"))
        .and(query_param("no-spam", "true"))
        .respond_with(ResponseTemplate::new(200).set_body_json(covalent_data(json!({
            "items": [{ "contract_name": "Based Punks", "nft_data": [] }]
        }))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let data = covalent
        .collectibles_metadata(wallet(), ChainId::BASE)
        .await
        .unwrap();
    assert_eq!(data["items"][0]["contract_name"], "Based Punks");
    assert_eq!(covalent.client().supported_nft_chains(), Some(vec![1, 137]));
}

/// Errors that do not list supported chains are returned as they are
#[tokio::test]
async fn collectibles_other_errors_are_returned() {
    let mock_server = MockServer::start().await;
    let covalent = start(&mock_server, 1);

    Mock::given(method("GET"))
        .and(path(format!("/v1/1/address/{}/balances_nft/", wallet_lower())))
        .respond_with(ResponseTemplate::new(402).set_body_json(covalent_error(402, "Insufficient credits")))
        .expect(1)
        .mount(&mock_server)
        .await;

    let error = covalent
        .collectibles_metadata(wallet(), ChainId::ETHEREUM)
        .await
        .unwrap_err();
    assert!(matches!(error, FetchError::Upstream(ref coded) if coded.code() == 402));
    assert_eq!(covalent.client().supported_nft_chains(), None);
}

/// Health follows the status endpoint
#[tokio::test]
async fn health_check_reports_status() {
    let mock_server = MockServer::start().await;
    let client =
        CovalentClient::new(CovalentConfig::new(api_key()).with_base_url(mock_server.uri())).unwrap();

    Mock::given(method("GET"))
        .and(path("/v1/chains/status/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(covalent_data(json!({ "items": [] }))))
        .mount(&mock_server)
        .await;

    assert_eq!(client.health_check().await.unwrap(), HealthStatus::Up);
}
