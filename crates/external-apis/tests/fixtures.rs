// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0
#![allow(missing_docs, dead_code)]

//! Provider payloads and queue settings shared by the integration tests

use std::time::Duration;

use alloy_primitives::Address;
use external_apis::ApiKey;
use fetch_queue::QueueOptions;
use serde_json::{Value, json};

pub const TEST_API_KEY: &str = "test-api-key";

pub fn api_key() -> ApiKey {
    ApiKey::new(TEST_API_KEY).unwrap()
}

/// Fast retries so failing attempts do not slow the suite down
pub fn queue_options(attempts: u32) -> QueueOptions {
    QueueOptions {
        attempts,
        backoff_delay: Duration::from_millis(10),
        rate_limit_wait_timeout: Duration::from_secs(5),
        ..QueueOptions::default()
    }
}

pub fn wallet() -> Address {
    "0xAbCdEf0123456789aBCdEf0123456789AbCdEf01".parse().unwrap()
}

pub fn wallet_lower() -> String {
    wallet().to_string().to_lowercase()
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

pub fn rpc_error(code: i64, message: &str) -> Value {
    json!({ "jsonrpc": "2.0", "id": 1, "error": { "code": code, "message": message } })
}

/// One `alchemy_getAssetTransfers` entry
pub fn transfer(block: u64, hash: &str, from: &str, category: &str, timestamp: Option<&str>) -> Value {
    let mut transfer = json!({
        "blockNum": format!("{block:#x}"),
        "uniqueId": format!("{hash}:log:0"),
        "hash": hash,
        "from": from,
        "to": "0x000000000000000000000000000000000000dead",
        "value": 1.5,
        "asset": "USDC",
        "category": category,
        "rawContract": { "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48", "decimal": "0x6" }
    });
    if let Some(timestamp) = timestamp {
        transfer["metadata"] = json!({ "blockTimestamp": timestamp });
    }
    transfer
}

/// One approval log
pub fn approval_log(hash: &str, index: &str) -> Value {
    json!({
        "address": "0xa0b86991c6218b36c1d19d4a2e9eb0ce3606eb48",
        "topics": [],
        "data": "0x",
        "blockNumber": "0x1388",
        "transactionHash": hash,
        "logIndex": index,
        "removed": false
    })
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
                    "quote_token": { "data": { "id": format!("etherlink_{quote}"), "type": "token" } },
                    "dex": { "data": { "id": "iguana", "type": "dex" } }
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
