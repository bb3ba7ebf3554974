// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0
#![allow(missing_docs, dead_code)]

//! Gateway servers over mocked providers, shared by the integration tests

use std::{net::SocketAddr, time::Duration};

use api::{Server, ServerConfig, ShutdownConfig};
use external_apis::ApiKey;
use fetch_queue::QueueOptions;
use serde_json::{Value, json};
use tokio_util::sync::CancellationToken;
use wiremock::MockServer;

/// Checksummed test wallet
pub const WALLET: &str = "0xabCDeF0123456789AbcdEf0123456789aBCDEF01";
pub const TEST_API_KEY: &str = "test-api-key";

pub fn wallet_lower() -> String {
    WALLET.to_lowercase()
}

/// A running gateway; dropping it stops the server
pub struct TestGateway {
    pub addr: SocketAddr,
    pub client: reqwest::Client,
    token: CancellationToken,
}

impl TestGateway {
    pub fn url(&self, path: &str) -> String {
        format!("http://{}{path}", self.addr)
    }

    pub async fn get(&self, path: &str) -> reqwest::Response {
        self.client.get(self.url(path)).send().await.unwrap()
    }

    pub async fn get_json(&self, path: &str) -> (reqwest::StatusCode, Value) {
        let response = self.get(path).await;
        let status = response.status();
        (status, response.json().await.unwrap())
    }
}

impl Drop for TestGateway {
    fn drop(&mut self) {
        self.token.cancel();
    }
}

/// Testing configuration with fast, single-attempt queues
pub fn config() -> ServerConfig {
    let mut config = ServerConfig::for_testing();
    config.queue = QueueOptions {
        attempts: 1,
        backoff_delay: Duration::from_millis(10),
        rate_limit_wait_timeout: Duration::from_secs(5),
        ..QueueOptions::default()
    };
    config
}

/// Point the Covalent provider at `mock_server`
pub fn with_covalent(mut config: ServerConfig, mock_server: &MockServer) -> ServerConfig {
    config.providers.covalent.api_key = Some(ApiKey::new(TEST_API_KEY).unwrap());
    config.providers.covalent.base_url = Some(mock_server.uri());
    config.providers.covalent.rps = 50.0;
    config
}

/// Point the Alchemy provider at `mock_server`
pub fn with_alchemy(mut config: ServerConfig, mock_server: &MockServer) -> ServerConfig {
    config.providers.alchemy.api_key = Some(ApiKey::new(TEST_API_KEY).unwrap());
    config.providers.alchemy.url_template = Some(format!("{}/{{network}}/{{api_key}}", mock_server.uri()));
    config
}

/// Point GeckoTerminal at `mock_server`
pub fn with_geckoterminal(mut config: ServerConfig, mock_server: &MockServer) -> ServerConfig {
    config.providers.geckoterminal.enabled = true;
    config.providers.geckoterminal.base_url = Some(mock_server.uri());
    config
}

pub async fn start(config: ServerConfig) -> TestGateway {
    let server = Server::new(config, ShutdownConfig::default()).await.unwrap();
    let (addr, token) = server.run_for_testing().await.unwrap();
    TestGateway {
        addr,
        client: reqwest::Client::new(),
        token,
    }
}

/// Covalent success envelope
pub fn covalent_data(data: Value) -> Value {
    json!({ "data": data, "error": false, "error_message": null, "error_code": null })
}

/// Covalent error envelope
pub fn covalent_error(code: u16, message: &str) -> Value {
    json!({ "data": null, "error": true, "error_message": message, "error_code": code })
}

pub fn rpc_result(result: Value) -> Value {
    json!({ "jsonrpc": "2.0", "id": 1, "result": result })
}

/// One GeckoTerminal pools page pricing `tokens` pairwise
pub fn pools_page(tokens: &[(&str, &str)]) -> Value {
    let data: Vec<Value> = tokens
        .chunks(2)
        .enumerate()
        .map(|(index, pair)| {
            let (base, base_price) = pair[0];
            let (quote, quote_price) = pair.get(1).copied().unwrap_or(pair[0]);
            json!({
                "id": format!("etherlink_pool{index}"),
                "type": "pool",
                "attributes": {
                    "base_token_price_usd": base_price,
                    "quote_token_price_usd": quote_price
                },
                "relationships": {
                    "base_token": { "data": { "id": format!("etherlink_{base}"), "type": "token" } },
                    "quote_token": { "data": { "id": format!("etherlink_{quote}"), "type": "token" } }
                }
            })
        })
        .collect();
    let included: Vec<Value> = tokens
        .iter()
        .map(|(address, _)| {
            json!({
                "id": format!("etherlink_{address}"),
                "type": "token",
                "attributes": { "address": address, "symbol": "TKN" }
            })
        })
        .collect();
    json!({ "data": data, "included": included })
}
