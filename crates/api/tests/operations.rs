// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Integration tests for health, documentation, queue diagnostics and metrics

use reqwest::StatusCode;
use serde_json::json;
use wiremock::{
    Mock, MockServer, ResponseTemplate,
    matchers::{method, path},
};

mod fixtures;
use fixtures::*;

async fn mount_balances(mock_server: &MockServer) {
    Mock::given(method("GET"))
        .and(path(format!("/v1/1/address/{}/balances_v2/", wallet_lower())))
        .respond_with(ResponseTemplate::new(200).set_body_json(covalent_data(json!({
            "address": wallet_lower(),
            "chain_id": 1,
            "items": []
        }))))
        .mount(mock_server)
        .await;
}

#[tokio::test]
async fn health_reports_environment_and_providers() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/chains/status/"))
        .respond_with(ResponseTemplate::new(200).set_body_json(covalent_data(json!({ "items": [] }))))
        .mount(&mock_server)
        .await;
    let gateway = start(with_covalent(config(), &mock_server)).await;

    let response = gateway.get("/health").await;
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key("x-request-id"));

    let body: serde_json::Value = response.json().await.unwrap();
    assert_eq!(body["status"], "Up");
    assert_eq!(body["environment"], "testing");
    assert_eq!(body["api_clients"]["covalent"], "Up");
}

#[tokio::test]
async fn health_is_degraded_while_a_provider_is_down() {
    let mock_server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/chains/status/"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&mock_server)
        .await;
    let gateway = start(with_covalent(config(), &mock_server)).await;

    let (status, body) = gateway.get_json("/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["status"],
        json!({ "Degraded": { "reason": "unavailable providers: covalent" } })
    );
    assert_eq!(
        body["api_clients"]["covalent"],
        json!({ "Down": { "reason": "Authentication failed" } })
    );
}

#[tokio::test]
async fn openapi_document_is_served() {
    let gateway = start(config()).await;

    let (status, body) = gateway.get_json("/api-doc/openapi.json").await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"].get("/api/balances").is_some());
    assert!(body["paths"].get("/api/transactions/v2").is_some());

    let response = gateway.get("/swagger-ui").await;
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn queues_list_configured_providers_only() {
    let mock_server = MockServer::start().await;
    let gateway = start(with_covalent(config(), &mock_server)).await;

    let (status, body) = gateway.get_json("/api/queues").await;
    assert_eq!(status, StatusCode::OK);

    let names: Vec<&str> = body["queues"]
        .as_array()
        .unwrap()
        .iter()
        .map(|queue| queue["name"].as_str().unwrap())
        .collect();
    assert_eq!(names, vec!["covalent-requests"]);
    assert_eq!(body["queues"][0]["counts"]["waiting"], 0);
}

#[tokio::test]
async fn completed_jobs_are_listed_per_queue() {
    let mock_server = MockServer::start().await;
    mount_balances(&mock_server).await;
    let gateway = start(with_covalent(config(), &mock_server)).await;

    let (status, _) = gateway
        .get_json(&format!("/api/balances?walletAddress={WALLET}&chainId=1"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = gateway
        .get_json("/api/queues/covalent-requests/jobs?state=completed")
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue"], "covalent-requests");
    assert_eq!(body["state"], "completed");
    let jobs = body["jobs"].as_array().unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0]["attempts"], 1);

    // failed jobs are the default view
    let (status, body) = gateway.get_json("/api/queues/covalent-requests/jobs").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["state"], "failed");
    assert!(body["jobs"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn queue_jobs_reject_unknown_queues_and_states() {
    let mock_server = MockServer::start().await;
    let gateway = start(with_covalent(config(), &mock_server)).await;

    let (status, body) = gateway.get_json("/api/queues/nope/jobs").await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body, json!({ "error": "unknown queue 'nope'" }));

    let (status, body) = gateway
        .get_json("/api/queues/covalent-requests/jobs?state=sleeping")
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({ "error": "unknown job state 'sleeping'" }));
}

#[tokio::test]
async fn metrics_record_fetches_and_requests() {
    let mock_server = MockServer::start().await;
    mount_balances(&mock_server).await;
    let gateway = start(with_covalent(config(), &mock_server)).await;

    let (status, _) = gateway
        .get_json(&format!("/api/balances?walletAddress={WALLET}&chainId=1"))
        .await;
    assert_eq!(status, StatusCode::OK);

    let response = gateway.get("/metrics").await;
    assert_eq!(response.status(), StatusCode::OK);
    let text = response.text().await.unwrap();

    assert!(text.contains(
        r#"gateway_fetch_outcomes_total{operation="balances",outcome="ok",provider="covalent"} 1"#
    ));
    assert!(text.contains(
        r#"gateway_http_request_duration_seconds_count{route="/api/balances",status="200"} 1"#
    ));
}
