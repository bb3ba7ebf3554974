// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Blockchain Data Gateway
//!
//! Serves wallet balances, metadata, transactions and token prices through queued,
//! rate-limited provider fetches.

use anyhow::Result;
use api::{Server, ServerConfig, ShutdownConfig};
use tracing::info;
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("starting blockchain data gateway");

    let config = ServerConfig::from_env()?;
    info!(
        environment = %config.environment,
        address = %config.socket_addr(),
        rate_limiting = config.rate_limiting.enabled,
        "configuration loaded"
    );

    let shutdown_config = ShutdownConfig::default();

    let server = Server::new(config, shutdown_config).await?;

    // NOTE: the `#[tokio::main]` task does not run a worker future, we must spawn
    tokio::spawn(async move { server.run().await }).await??;

    Ok(())
}
