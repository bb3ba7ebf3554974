// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Provider client contracts for external integrations
//!
//! This crate provides the common vocabulary every upstream blockchain data provider
//! speaks, so that the dispatcher and the HTTP layer never depend on provider-specific
//! error shapes.
//!
//! # Core Abstractions
//!
//! - **`ApiClient` Trait**: identity and health reporting for a provider client
//! - **`CodedError`**: an upstream failure reduced to an HTTP-style status code and message
//! - **Health Check System**: `Up`, `Degraded` and `Down` statuses shared across providers
//!
//! Provider adapters are responsible for mapping whatever their upstream returns into a
//! [`CodedError`]; anything they cannot classify becomes a generic server error, which the
//! dispatcher treats as transient.

pub mod error;
pub mod health;

pub use error::*;
pub use health::*;

/// Generic trait for external API clients
///
/// Implemented by every provider adapter so the server can report provider health
/// without knowing which providers are configured.
pub trait ApiClient: Send + Sync {
    /// Check the health of this API client
    ///
    /// # Errors
    ///
    /// Returns an error if the health probe itself could not be performed
    fn health_check(&self) -> impl Future<Output = Result<HealthStatus, CodedError>> + Send;

    /// Get the name/identifier of this API client
    fn name(&self) -> &'static str;
}
