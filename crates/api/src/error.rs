// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Error handling module
//!
//! This module provides the error types for server operations and maps them onto
//! HTTP responses. Upstream failures keep the provider's status code and message;
//! request validation failures answer 400 with an `error` field.

use std::net::SocketAddr;

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use external_apis::RegistryError;
use fetch_queue::FetchError;
use thiserror::Error;
use tracing::{error, warn};

/// Error types for server operations
#[derive(Error, Debug)]
pub enum ServerError {
    /// Configuration validation errors
    #[error("Configuration error: {message}")]
    Config {
        /// Error message
        message: String,
    },

    /// Network binding errors
    #[error("Failed to bind to {address}: {source}")]
    Bind {
        /// Socket address that failed to bind
        address: SocketAddr,
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server startup errors
    #[error("Server startup failed: {source}")]
    Startup {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Server shutdown errors
    #[error("Server shutdown failed: {source}")]
    Shutdown {
        /// Underlying IO error
        source: std::io::Error,
    },

    /// Runtime errors during server operation
    #[error("Runtime error: {message}")]
    Runtime {
        /// Error message
        message: String,
    },

    /// Provider wiring errors
    #[error("Dependency error: {message}")]
    Dependency {
        /// Error message
        message: String,
    },

    /// Task join errors for async operations
    #[error("Task join error: {source}")]
    TaskJoin {
        /// Underlying tokio join error
        #[source]
        source: tokio::task::JoinError,
    },

    /// Input validation errors
    #[error("{0}")]
    Validation(String),

    /// Unknown resource
    #[error("{0}")]
    NotFound(String),

    /// A provider the route needs is not configured
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The dispatched fetch failed
    #[error(transparent)]
    Fetch(#[from] FetchError),
}

/// Result type for server operations
pub type ServerResult<T> = Result<T, ServerError>;

impl ServerError {
    /// HTTP status the error is answered with
    pub fn status_code(&self) -> StatusCode {
        match self {
            ServerError::Validation(_) => StatusCode::BAD_REQUEST,
            ServerError::NotFound(_) => StatusCode::NOT_FOUND,
            ServerError::Registry(_) | ServerError::Dependency { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            ServerError::Fetch(err) => StatusCode::from_u16(err.status_code())
                .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            ServerError::Config { .. }
            | ServerError::Bind { .. }
            | ServerError::Startup { .. }
            | ServerError::Shutdown { .. }
            | ServerError::Runtime { .. }
            | ServerError::TaskJoin { .. } => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            ServerError::Validation(message) | ServerError::NotFound(message) => {
                serde_json::json!({ "error": message })
            }
            ServerError::Fetch(FetchError::Validation(message)) => {
                serde_json::json!({ "error": message })
            }
            ServerError::Fetch(FetchError::Upstream(coded)) => {
                if coded.is_client_error() {
                    warn!(code = coded.code(), message = coded.message(), "upstream rejected request");
                } else {
                    error!(code = coded.code(), message = coded.message(), "upstream request failed");
                }
                coded.to_response_body()
            }
            _ => {
                error!(error = %self, status = status.as_u16(), "request failed");
                serde_json::json!({ "message": self.to_string() })
            }
        };

        (status, Json(body)).into_response()
    }
}

impl From<tokio::task::JoinError> for ServerError {
    fn from(source: tokio::task::JoinError) -> Self {
        Self::TaskJoin { source }
    }
}
