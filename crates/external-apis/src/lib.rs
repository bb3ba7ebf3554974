// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Blockchain data provider adapters
//!
//! Each provider is a [`fetch_queue::Operation`] over its own job type; requests reach
//! the upstream API only through the provider's [`fetch_queue::FetchQueue`], which
//! spends rate-limit points per job kind and collapses duplicate requests.
//!
//! # Architecture
//!
//! - **Providers**: [`covalent`], [`alchemy`] - queued clients and their façades
//! - **Exchange rates**: [`geckoterminal`] - paged reads through a shared limiter
//! - **Registry**: [`registry::ProviderRegistry`] - health, queue diagnostics and shutdown
//! - **Support**: [`cache::ResponseCache`], [`api_key::ApiKey`], [`transport`]

pub mod alchemy;
pub mod api_key;
pub mod cache;
pub mod covalent;
pub mod geckoterminal;
pub mod registry;
pub mod transport;

pub use alchemy::{
    Alchemy, AlchemyClient, AlchemyConfig, AlchemyJob, AlchemyJobKind, TransactionsPage,
    approvals::RangePlanner,
};
pub use api_key::ApiKey;
pub use cache::{CacheStats, ResponseCache};
pub use covalent::{Covalent, CovalentClient, CovalentConfig, CovalentJob, CovalentJobKind};
pub use geckoterminal::{GeckoTerminalClient, GeckoTerminalConfig};
pub use registry::{ProviderRegistry, QueueSummary, RegistryError};
pub use transport::ProviderError;
