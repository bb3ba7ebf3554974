// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Coded upstream errors
//!
//! [`CodedError`] is the single error shape that crosses the dispatcher boundary. It
//! carries an HTTP-style status code, which decides retry classification, and the
//! upstream message, which is surfaced unchanged to the caller.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Status used when an upstream failure cannot be classified
pub const GENERIC_FAILURE_CODE: u16 = 500;

const TOO_MANY_REQUESTS: u16 = 429;

/// An upstream failure reduced to a status code and a message
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code}: {message}")]
pub struct CodedError {
    code: u16,
    message: String,
}

impl CodedError {
    /// Create a new coded error
    pub fn new(code: u16, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Create an unclassified failure (status 500)
    pub fn internal(message: impl Into<String>) -> Self {
        Self::new(GENERIC_FAILURE_CODE, message)
    }

    /// Build an error from a provider-reported code that may be missing or non-numeric
    ///
    /// Providers frequently report codes as strings or omit them; anything that is not a
    /// valid status falls back to [`GENERIC_FAILURE_CODE`].
    pub fn from_reported(code: Option<&serde_json::Value>, message: Option<&str>) -> Self {
        let code = code
            .and_then(|value| match value {
                serde_json::Value::Number(number) => number.as_u64(),
                serde_json::Value::String(text) => text.trim().parse::<u64>().ok(),
                _ => None,
            })
            .and_then(|code| u16::try_from(code).ok())
            .filter(|code| (100..600).contains(code))
            .unwrap_or(GENERIC_FAILURE_CODE);

        Self::new(code, message.unwrap_or("Unknown error"))
    }

    /// Status code
    pub fn code(&self) -> u16 {
        self.code
    }

    /// Upstream message
    pub fn message(&self) -> &str {
        &self.message
    }

    /// 4xx statuses other than 429: the request itself is wrong and retrying cannot help
    pub fn is_client_error(&self) -> bool {
        (400..500).contains(&self.code) && self.code != TOO_MANY_REQUESTS
    }

    /// Whether the failure is transient (network, 5xx, 429 or unclassified)
    pub fn is_retryable(&self) -> bool {
        !self.is_client_error()
    }

    /// Response body in the shape HTTP clients of the gateway expect
    pub fn to_response_body(&self) -> serde_json::Value {
        serde_json::json!({ "message": self.message })
    }
}
