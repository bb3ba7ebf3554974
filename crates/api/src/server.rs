// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server implementation module
//!
//! This module provides the main server struct and implementation for the gateway,
//! including server lifecycle management, router configuration, and coordinated graceful
//! shutdown using `CancellationToken`. HTTP connections drain first; the provider queues
//! are closed afterwards so requests still in flight can finish their fetches.

use std::{net::SocketAddr, sync::Arc, time::Duration};

use axum::{Router, http::HeaderName, middleware::from_fn_with_state};
use hyper::Request;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::{error, info, info_span, warn};

use crate::{
    config::ServerConfig,
    dependencies::{LimiterStore, Registry, build_registry},
    error::{ServerError, ServerResult},
    metrics::Metrics,
    middleware::{RateLimiters, http_metrics_middleware},
    routes::create_routes,
    state::ServerState,
};

// Server constants
const REQUEST_ID_HEADER: HeaderName = HeaderName::from_static("x-request-id");
const DEFAULT_QUEUE_DRAIN_TIMEOUT_SECONDS: u64 = 30;

/// Configuration for server shutdown behavior
#[derive(Debug, Clone)]
pub struct ShutdownConfig {
    /// Maximum time provider queues get to finish running jobs once HTTP has drained
    pub queue_drain_timeout: Duration,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            queue_drain_timeout: Duration::from_secs(DEFAULT_QUEUE_DRAIN_TIMEOUT_SECONDS),
        }
    }
}

/// Main server struct
#[derive(Debug)]
pub struct Server {
    /// Server configuration
    config: ServerConfig,
    /// Application router
    router: Router,
    /// Server state
    state: ServerState,
    /// Cancellation token for coordinated shutdown
    cancellation_token: CancellationToken,
    /// Stops provider workers that outlive the drain timeout
    providers_token: CancellationToken,
    /// Configuration for coordinated shutdown
    shutdown_config: ShutdownConfig,
}

impl Server {
    /// Create new server instance, starting every configured provider
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Dependency` if the limiter store or a provider cannot be
    /// started, or `ServerError::Runtime` if metrics cannot be registered.
    pub async fn new(config: ServerConfig, shutdown_config: ShutdownConfig) -> ServerResult<Self> {
        let providers_token = CancellationToken::new();
        let store = Arc::new(LimiterStore::from_config(&config).await?);
        let registry = build_registry(&config, &store, &providers_token)?;
        Self::assemble(config, shutdown_config, Arc::new(registry), providers_token)
    }

    /// Create server with a prepared registry for dependency injection
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Runtime` if metrics cannot be registered.
    pub fn with_registry(
        config: ServerConfig,
        shutdown_config: ShutdownConfig,
        registry: Arc<Registry>,
    ) -> ServerResult<Self> {
        Self::assemble(config, shutdown_config, registry, CancellationToken::new())
    }

    fn assemble(
        config: ServerConfig,
        shutdown_config: ShutdownConfig,
        registry: Arc<Registry>,
        providers_token: CancellationToken,
    ) -> ServerResult<Self> {
        let metrics = Metrics::new().map_err(|e| ServerError::Runtime {
            message: format!("failed to register metrics: {e}"),
        })?;

        let cancellation_token = CancellationToken::new();
        let state = ServerState::new(
            config.clone(),
            registry,
            metrics,
            cancellation_token.child_token(),
        );
        let router = Self::create_router(state.clone());

        Ok(Self {
            config,
            router,
            state,
            cancellation_token,
            providers_token,
            shutdown_config,
        })
    }

    /// Create application router with middleware
    fn create_router(state: ServerState) -> Router {
        let timeout_duration = state.config().timeout_seconds.value();
        let rate_limiting = &state.config().rate_limiting;

        let limiters = RateLimiters::from_config(rate_limiting).with_metrics(state.metrics());

        let middleware = ServiceBuilder::new()
            .layer(SetRequestIdLayer::new(REQUEST_ID_HEADER, MakeRequestUuid))
            .layer(
                TraceLayer::new_for_http().make_span_with(|req: &Request<_>| {
                    if let Some(request_id) = req.headers().get(REQUEST_ID_HEADER) {
                        info_span!("http_request", ?request_id, method = %req.method(), uri = %req.uri())
                    } else {
                        error!("failed to extract id from request");
                        info_span!("http_request", request_id = "unknown")
                    }
                }),
            )
            .layer(PropagateRequestIdLayer::new(REQUEST_ID_HEADER))
            .layer(CorsLayer::permissive())
            .layer(TimeoutLayer::new(timeout_duration));

        create_routes(&limiters, rate_limiting.enabled)
            .layer(from_fn_with_state(
                state.metrics().clone(),
                http_metrics_middleware,
            ))
            .layer(middleware)
            .with_state(state)
    }

    /// Run the server with coordinated graceful shutdown
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address,
    /// or `ServerError::Startup` if the server fails to start.
    pub async fn run(self) -> ServerResult<()> {
        let addr = self.config.socket_addr();
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                address: addr,
                source,
            })?;

        let actual_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Startup { source })?;

        info!(
            address = %actual_addr,
            environment = %self.config.environment,
            providers = ?self.state.registry().client_names(),
            "gateway starting",
        );

        let cancellation_token = self.cancellation_token.clone();
        let shutdown_token = cancellation_token.clone();
        tokio::spawn(async move {
            info!("spawning the graceful shutdown task");
            Self::shutdown_signal_handler(shutdown_token).await;
        });

        let server_result = axum::serve(
            listener,
            self.router
                .into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(async move {
            cancellation_token.cancelled().await;
            info!("HTTP connections drained");
        })
        .await;

        Self::drain_providers(
            self.state.registry(),
            self.shutdown_config.queue_drain_timeout,
            &self.providers_token,
        )
        .await;

        if let Err(e) = server_result {
            error!(error = ?e, "Server error during shutdown");
            Err(ServerError::Shutdown { source: e })
        } else {
            info!("gateway shut down gracefully");
            Ok(())
        }
    }

    /// Close every provider queue, force-stopping workers after `timeout`
    async fn drain_providers(
        registry: &Registry,
        timeout: Duration,
        providers_token: &CancellationToken,
    ) {
        match tokio::time::timeout(timeout, registry.shutdown()).await {
            Ok(abandoned) => info!(abandoned, "provider queues drained"),
            Err(_) => warn!(
                timeout_secs = timeout.as_secs(),
                "provider queues did not drain in time, stopping workers"
            ),
        }
        providers_token.cancel();
    }

    /// Handle shutdown signals and trigger coordinated cancellation
    ///
    /// This function listens for SIGINT (Ctrl+C) and SIGTERM signals,
    /// and cancels the provided cancellation token when received.
    async fn shutdown_signal_handler(cancellation_token: CancellationToken) {
        let signal_received = async {
            #[cfg(unix)]
            {
                use tokio::signal::unix::{SignalKind, signal};

                let (mut sigterm, mut sigint) =
                    match (signal(SignalKind::terminate()), signal(SignalKind::interrupt())) {
                        (Ok(sigterm), Ok(sigint)) => (sigterm, sigint),
                        (Err(e), _) | (_, Err(e)) => {
                            error!(error = %e, "failed to register signal handlers");
                            return std::future::pending::<&str>().await;
                        }
                    };

                tokio::select! {
                    _ = sigterm.recv() => {
                        warn!("Received SIGTERM signal, initiating coordinated shutdown");
                        "SIGTERM"
                    },
                    _ = sigint.recv() => {
                        warn!("Received SIGINT signal, initiating coordinated shutdown");
                        "SIGINT"
                    },
                }
            }

            #[cfg(not(unix))]
            {
                if let Err(e) = tokio::signal::ctrl_c().await {
                    error!(error = %e, "failed to install CTRL+C signal handler");
                    return std::future::pending::<&str>().await;
                }
                warn!("Received CTRL+C signal, initiating coordinated shutdown");
                "CTRL+C"
            }
        };

        // Wait for either a signal or existing cancellation
        tokio::select! {
            signal_name = signal_received => {
                warn!("Shutdown signal {} received, cancelling all operations...", signal_name);
                cancellation_token.cancel();
            },
            () = cancellation_token.cancelled() => {
                warn!("Cancellation token already cancelled, shutdown signal handler exiting");
            }
        }
    }

    /// Returns a clone of the cancellation token for coordinated shutdown
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation_token.clone()
    }

    /// Initiates graceful shutdown by cancelling the server's cancellation token
    pub fn shutdown(&self) {
        info!("programmatic shutdown requested");
        self.cancellation_token.cancel();
    }

    /// Run server for testing, returns the bound address
    ///
    /// Cancelling the returned token stops the server and closes the provider queues.
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Bind` if unable to bind to the configured address.
    pub async fn run_for_testing(self) -> ServerResult<(SocketAddr, CancellationToken)> {
        let addr = self.config.socket_addr();

        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                address: addr,
                source,
            })?;

        let actual_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Startup { source })?;

        let token = self.cancellation_token.child_token();
        let task = token.child_token();
        tokio::spawn(async move {
            let _ = axum::serve(
                listener,
                self.router
                    .into_make_service_with_connect_info::<SocketAddr>(),
            )
            .with_graceful_shutdown(async move { task.cancelled().await })
            .await;
            Self::drain_providers(
                self.state.registry(),
                self.shutdown_config.queue_drain_timeout,
                &self.providers_token,
            )
            .await;
        });

        Ok((actual_addr, token))
    }

    /// Get server configuration
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Get server state for testing
    pub fn state(&self) -> &ServerState {
        &self.state
    }
}
