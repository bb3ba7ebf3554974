// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! `OpenAPI` documentation module
//!
//! This module provides `OpenAPI` specification and `Swagger UI` endpoints for API documentation.

use axum::{Json, response::Html};
use utoipa::OpenApi;

use crate::{
    config::Environment,
    routes::handlers,
    state::{HealthCheck, HealthStatus},
};

/// `OpenAPI` document of the gateway
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Blockchain Data Gateway",
        description = "Wallet balances, metadata, transactions and token prices served through queued, rate-limited and deduplicated provider fetches."
    ),
    paths(
        handlers::health_handler,
        handlers::balances_handler,
        handlers::tokens_metadata_handler,
        handlers::collectibles_metadata_handler,
        handlers::is_initialized_handler,
        handlers::transactions_handler,
        handlers::exchange_rates_handler,
        handlers::queues_handler,
        handlers::queue_jobs_handler,
    ),
    components(schemas(
        HealthCheck,
        HealthStatus,
        Environment,
        handlers::IsInitializedResponse,
        handlers::QueuesResponse,
        handlers::JobsResponse,
    )),
    tags(
        (name = "health", description = "Gateway health"),
        (name = "wallets", description = "Wallet data from Covalent and Alchemy"),
        (name = "prices", description = "Token prices from GeckoTerminal"),
        (name = "queues", description = "Provider queue diagnostics"),
    )
)]
#[derive(Debug)]
pub struct ApiDoc;

/// `OpenAPI` specification endpoint
pub async fn openapi_spec() -> Json<utoipa::openapi::OpenApi> {
    Json(ApiDoc::openapi())
}

/// Swagger UI endpoint
pub async fn swagger_ui() -> Html<&'static str> {
    let html = r#"
<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <title>Blockchain Data Gateway</title>
    <link rel="stylesheet" type="text/css" href="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui.css" />
    <style>
        html { box-sizing: border-box; overflow: -moz-scrollbars-vertical; overflow-y: scroll; }
        *, *:before, *:after { box-sizing: inherit; }
        body { margin:0; background: #fafafa; }
    </style>
</head>
<body>
    <div id="swagger-ui"></div>
    <script src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-bundle.js"></script>
    <script src="https://unpkg.com/swagger-ui-dist@5.17.14/swagger-ui-standalone-preset.js"></script>
    <script>
        window.onload = function() {
            SwaggerUIBundle({
                url: '/api-doc/openapi.json',
                dom_id: '#swagger-ui',
                deepLinking: true,
                presets: [
                    SwaggerUIBundle.presets.apis,
                    SwaggerUIStandalonePreset
                ],
                plugins: [
                    SwaggerUIBundle.plugins.DownloadUrl
                ],
                layout: "StandaloneLayout"
            });
        }
    </script>
</body>
</html>
"#;
    Html(html)
}
