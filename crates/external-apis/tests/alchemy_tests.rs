// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for account transactions through the Alchemy queue

use std::sync::Arc;

use external_apis::{
    Alchemy, AlchemyClient, AlchemyConfig, RangePlanner,
    alchemy::queue_config,
};
use fetch_queue::MemoryRateLimitStore;
use serde_json::json;
use shared_types::ChainId;
use tokio_util::sync::CancellationToken;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{body_partial_json, method, path},
};

mod fixtures;
use fixtures::*;

const BLOCK_RANGE_ERROR: &str = "Log response size exceeded. You can make eth_getLogs requests with up to a 2000 block range. Based on your parameters, this block range should work: [0x1388, 0x1b57]";

fn start(mock_server: &MockServer) -> Alchemy {
    let config = AlchemyConfig::new(api_key())
        .with_url_template(format!("{}/{{network}}/{{api_key}}", mock_server.uri()));
    let client = AlchemyClient::new(config).unwrap();
    Alchemy::start(
        client,
        queue_config(10_000.0, queue_options(2)),
        RangePlanner::default(),
        Arc::new(MemoryRateLimitStore::new()),
        CancellationToken::new(),
    )
    .unwrap()
}

fn rpc_path() -> String {
    format!("/eth-mainnet/{TEST_API_KEY}")
}

async fn mount_transfers(mock_server: &MockServer, side: &str, transfers: serde_json::Value) {
    Mock::given(method("POST"))
        .and(path(rpc_path()))
        .and(body_partial_json(json!({
            "method": "alchemy_getAssetTransfers",
            "params": [{ side: wallet_lower() }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!({ "transfers": transfers }))))
        .expect(1)
        .mount(mock_server)
        .await;
}

/// Outgoing and incoming pages are merged newest first and approvals cover their span
#[tokio::test]
async fn transfers_are_merged_with_approvals() {
    let mock_server = MockServer::start().await;
    let alchemy = start(&mock_server);
    let account = wallet_lower();

    mount_transfers(
        &mock_server,
        "fromAddress",
        json!([transfer(120, "0xa", &account, "erc20", Some("2024-01-01T00:02:00.000Z"))]),
    )
    .await;
    mount_transfers(
        &mock_server,
        "toAddress",
        json!([
            transfer(130, "0xb", "0x1111111111111111111111111111111111111111", "erc20", Some("2024-01-01T00:03:00.000Z")),
            transfer(100, "0xc", "0x1111111111111111111111111111111111111111", "external", Some("2024-01-01T00:00:00.000Z")),
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path(rpc_path()))
        .and(body_partial_json(json!({
            "method": "eth_getLogs",
            "params": [{ "fromBlock": "0x78", "toBlock": "0x82" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!([approval_log("0xa", "0x0")]))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let page = alchemy
        .fetch_transactions(ChainId::ETHEREUM, wallet(), None, None)
        .await
        .unwrap();

    let hashes: Vec<&str> = page.transfers.iter().map(|t| t.hash.as_str()).collect();
    // the oldest transaction may continue on the next page and is cut
    assert_eq!(hashes, vec!["0xb", "0xa"]);
    assert_eq!(page.approvals.len(), 1);
    assert_eq!(page.approvals[0].transaction_hash, "0xa");
    assert_eq!(page.transfers[0].extra["asset"], "USDC");
}

/// A span wider than the provider allows is split into windows around the sends
#[tokio::test]
async fn approvals_span_is_split_on_block_range_error() {
    let mock_server = MockServer::start().await;
    let alchemy = start(&mock_server);
    let account = wallet_lower();

    mount_transfers(
        &mock_server,
        "fromAddress",
        json!([
            transfer(10_000, "0xa", &account, "erc20", Some("2024-01-02T00:00:00.000Z")),
            transfer(5_000, "0xb", &account, "erc721", Some("2024-01-01T00:00:00.000Z")),
        ]),
    )
    .await;
    mount_transfers(&mock_server, "toAddress", json!([])).await;

    // the whole span is refused once; client errors are not retried
    Mock::given(method("POST"))
        .and(path(rpc_path()))
        .and(body_partial_json(json!({
            "method": "eth_getLogs",
            "params": [{ "fromBlock": "0x1388", "toBlock": "0x2710" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_error(-32600, BLOCK_RANGE_ERROR)))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(rpc_path()))
        .and(body_partial_json(json!({
            "method": "eth_getLogs",
            "params": [{ "fromBlock": "0x1388", "toBlock": "0x1770" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!([approval_log("0xb", "0x1")]))))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(rpc_path()))
        .and(body_partial_json(json!({
            "method": "eth_getLogs",
            "params": [{ "fromBlock": "0x2329", "toBlock": "0x2710" }]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!([
            approval_log("0xa", "0x0"),
            approval_log("0xb", "0x1"),
        ]))))
        .expect(1)
        .mount(&mock_server)
        .await;

    let page = alchemy
        .fetch_transactions(ChainId::ETHEREUM, wallet(), None, None)
        .await
        .unwrap();

    assert_eq!(page.transfers.len(), 2);
    let approvals: Vec<&str> = page
        .approvals
        .iter()
        .map(|log| log.transaction_hash.as_str())
        .collect();
    assert_eq!(approvals, vec!["0xb", "0xa"]);
}

/// Native-currency history carries no approvals
#[tokio::test]
async fn native_history_skips_approvals() {
    let mock_server = MockServer::start().await;
    let alchemy = start(&mock_server);
    let account = wallet_lower();

    mount_transfers(
        &mock_server,
        "fromAddress",
        json!([transfer(50, "0xa", &account, "external", Some("2024-01-01T00:00:00.000Z"))]),
    )
    .await;
    mount_transfers(&mock_server, "toAddress", json!([])).await;

    Mock::given(method("POST"))
        .and(path(rpc_path()))
        .and(body_partial_json(json!({ "method": "eth_getLogs" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!([]))))
        .expect(0)
        .mount(&mock_server)
        .await;

    let page = alchemy
        .fetch_transactions(ChainId::ETHEREUM, wallet(), Some("eth".to_string()), Some(60))
        .await
        .unwrap();
    assert_eq!(page.transfers.len(), 1);
    assert!(page.approvals.is_empty());
}

/// Transfers without metadata get their block timestamp, fetched once per block
#[tokio::test]
async fn missing_timestamps_are_filled_from_block_headers() {
    let mock_server = MockServer::start().await;
    let alchemy = start(&mock_server);

    mount_transfers(&mock_server, "fromAddress", json!([])).await;
    mount_transfers(
        &mock_server,
        "toAddress",
        json!([
            transfer(100, "0xa", "0x1111111111111111111111111111111111111111", "external", None),
            transfer(100, "0xb", "0x1111111111111111111111111111111111111111", "external", None),
        ]),
    )
    .await;

    Mock::given(method("POST"))
        .and(path(rpc_path()))
        .and(body_partial_json(json!({
            "method": "eth_getBlockByNumber",
            "params": ["0x64", false]
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!({
            "number": "0x64",
            "timestamp": "0x5f5e1000"
        }))))
        .expect(1)
        .mount(&mock_server)
        .await;

    Mock::given(method("POST"))
        .and(path(rpc_path()))
        .and(body_partial_json(json!({ "method": "eth_getLogs" })))
        .respond_with(ResponseTemplate::new(200).set_body_json(rpc_result(json!([]))))
        .mount(&mock_server)
        .await;

    let page = alchemy
        .fetch_transactions(ChainId::ETHEREUM, wallet(), None, None)
        .await
        .unwrap();
    assert_eq!(page.transfers.len(), 2);
    for transfer in &page.transfers {
        assert_eq!(transfer.timestamp(), "2020-09-13T12:26:40.000Z");
    }
}

/// Nothing is older than block zero
#[tokio::test]
async fn block_zero_yields_an_empty_page() {
    let mock_server = MockServer::start().await;
    let alchemy = start(&mock_server);

    let page = alchemy
        .fetch_transactions(ChainId::ETHEREUM, wallet(), None, Some(0))
        .await
        .unwrap();
    assert!(page.transfers.is_empty());
    assert!(page.approvals.is_empty());
    assert!(mock_server.received_requests().await.unwrap().is_empty());
}

/// Chains without an Alchemy network are refused without a request
#[tokio::test]
async fn unsupported_chain_is_rejected() {
    let mock_server = MockServer::start().await;
    let alchemy = start(&mock_server);

    let error = alchemy
        .fetch_transactions(ChainId::new(999_999).unwrap(), wallet(), None, None)
        .await
        .unwrap_err();
    assert_eq!(error.status_code(), 422);
}
