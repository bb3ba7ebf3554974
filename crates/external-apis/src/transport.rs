// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! HTTP plumbing shared by the provider adapters
//!
//! Every adapter builds its `reqwest` client here and reduces transport failures to a
//! [`CodedError`] through [`ProviderError`], so the dispatcher can classify them.

use std::time::Duration;

use api_client::{CodedError, HealthStatus};
use reqwest::{Client, Response};
use serde::de::DeserializeOwned;
use thiserror::Error;
use tracing::warn;

const USER_AGENT: &str = concat!("chain-gateway/", env!("CARGO_PKG_VERSION"));

/// Errors produced by the provider adapters
#[derive(Debug, Error)]
#[allow(missing_docs)]
pub enum ProviderError {
    /// The adapter was configured with unusable values
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP request failed
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The provider answered with a body we could not interpret
    #[error("invalid provider response: {0}")]
    InvalidResponse(String),

    /// The provider reported an error
    #[error("API error: {status} - {message}")]
    Api { status: u16, message: String },

    /// The provider's fetch queue could not be started
    #[error("queue configuration error: {0}")]
    Queue(#[from] fetch_queue::ConfigError),
}

impl From<ProviderError> for CodedError {
    fn from(value: ProviderError) -> Self {
        match value {
            ProviderError::Config(message) | ProviderError::InvalidResponse(message) => {
                CodedError::internal(message)
            }
            ProviderError::Queue(error) => CodedError::internal(error.to_string()),
            ProviderError::Http(error) => {
                if error.is_timeout() {
                    CodedError::new(504, error.to_string())
                } else {
                    match error.status() {
                        Some(status) => CodedError::new(status.as_u16(), error.to_string()),
                        None => CodedError::internal(error.to_string()),
                    }
                }
            }
            ProviderError::Api { status, message } => CodedError::new(status, message),
        }
    }
}

/// Build the HTTP client used by one adapter
pub fn build_client(timeout: Duration) -> Result<Client, ProviderError> {
    Client::builder()
        .timeout(timeout)
        .user_agent(USER_AGENT)
        .build()
        .map_err(ProviderError::Http)
}

/// Reject blank base URLs and strip the trailing slash
pub fn normalize_base_url(base_url: &str) -> Result<String, ProviderError> {
    let trimmed = base_url.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(ProviderError::Config("Base URL cannot be empty".to_string()));
    }
    url::Url::parse(trimmed)
        .map_err(|e| ProviderError::Config(format!("invalid base URL '{trimmed}': {e}")))?;
    Ok(trimmed.to_string())
}

/// Decode a JSON body, keeping the response status for error reporting
pub async fn read_json<T: DeserializeOwned>(response: Response) -> Result<T, ProviderError> {
    let status = response.status();
    let body = response.text().await?;
    serde_json::from_str(&body).map_err(|e| {
        warn!(status = status.as_u16(), error = %e, "provider returned an unreadable body");
        if status.is_success() {
            ProviderError::InvalidResponse(e.to_string())
        } else {
            ProviderError::Api {
                status: status.as_u16(),
                message: if body.is_empty() {
                    status.canonical_reason().unwrap_or("Unknown error").to_string()
                } else {
                    body
                },
            }
        }
    })
}

/// Health of a provider judged from a probe request
pub fn probe_health(result: Result<Response, reqwest::Error>) -> Result<HealthStatus, CodedError> {
    match result {
        Ok(response) => Ok(HealthStatus::from_probe_status(response.status().as_u16())),
        Err(error) if error.is_timeout() || error.is_connect() => Ok(HealthStatus::Down {
            reason: error.to_string(),
        }),
        Err(error) => Err(ProviderError::Http(error).into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn base_urls_are_normalized() {
        assert_eq!(
            normalize_base_url("https://api.covalenthq.com/").unwrap(),
            "https://api.covalenthq.com"
        );
        assert!(matches!(normalize_base_url("  "), Err(ProviderError::Config(_))));
        assert!(matches!(
            normalize_base_url("not a url"),
            Err(ProviderError::Config(_))
        ));
    }

    #[test]
    fn provider_errors_keep_their_status() {
        let coded: CodedError = ProviderError::Api {
            status: 422,
            message: "Chain not supported".to_string(),
        }
        .into();
        assert_eq!(coded.code(), 422);
        assert!(!coded.is_retryable());

        let invalid: CodedError = ProviderError::InvalidResponse("eof".to_string()).into();
        assert_eq!(invalid.code(), 500);
    }
}
