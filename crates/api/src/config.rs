// SPDX-FileCopyrightText: 2025 Semiotic Labs
//
// SPDX-License-Identifier: Apache-2.0

//! Server configuration module
//!
//! This module provides configuration structures and logic for the gateway server,
//! supporting different environments and validation of configuration parameters.
//! Provider credentials and queue tuning live in the same tree as the listener
//! settings so one loader resolves everything.

use std::{
    net::{IpAddr, Ipv4Addr, SocketAddr},
    time::Duration,
};

use anyhow::{Result, anyhow, ensure};
use config::{Config, ConfigError, Environment as ConfigEnv, File};
use external_apis::{ApiKey, RangePlanner};
use fetch_queue::QueueOptions;
use serde::{Deserialize, Deserializer, Serialize, de};
use serde_with::{DurationSeconds, serde_as};

use crate::error::{ServerError, ServerResult};

/// Default Covalent requests per second
pub const DEFAULT_COVALENT_RPS: f64 = 4.0;
/// Default Alchemy compute units per second
pub const DEFAULT_ALCHEMY_CUPS: f64 = 330.0;

/// A validated server port that ensures the value is appropriate for the environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ServerPort {
    port: u16,
    environment: Environment,
}

impl ServerPort {
    /// Create a new `ServerPort`, ensuring it's valid for the given environment
    ///
    /// # Errors
    ///
    /// Returns an error if the port is 0 in non-testing environments
    pub fn new(port: u16, environment: Environment) -> Result<Self> {
        if port == 0 && environment != Environment::Testing {
            return Err(anyhow!("port cannot be 0 in non-testing environments"));
        }
        Ok(Self { port, environment })
    }

    /// Create a safe default port for development
    pub const fn default_development() -> Self {
        Self {
            port: 3000,
            environment: Environment::Development,
        }
    }

    /// Create a safe testing port (port 0)
    pub const fn testing() -> Self {
        Self {
            port: 0,
            environment: Environment::Testing,
        }
    }

    /// Get the port value
    pub fn value(&self) -> u16 {
        self.port
    }
}

impl<'de> Deserialize<'de> for ServerPort {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let port = u16::deserialize(deserializer)?;
        // validated against the environment once loading has resolved it
        Ok(Self {
            port,
            environment: Environment::Development,
        })
    }
}

/// A validated timeout duration in seconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TimeoutSeconds(Duration);

impl TimeoutSeconds {
    /// Create a new `TimeoutSeconds`, ensuring the value is within valid bounds
    ///
    /// # Errors
    ///
    /// Returns an error if timeout is 0 or greater than 300 seconds
    pub fn new(seconds: u64) -> Result<Self> {
        ensure!(seconds != 0, "timeout must be greater than 0");
        ensure!(seconds <= 300, "timeout cannot exceed 300");
        Ok(Self(Duration::from_secs(seconds)))
    }

    /// Create a safe default timeout (30 seconds)
    pub const fn default_value() -> Self {
        Self(Duration::from_secs(30))
    }

    /// Create a safe testing timeout (10 seconds)
    pub const fn testing() -> Self {
        Self(Duration::from_secs(10))
    }

    /// Get the timeout value
    pub fn value(&self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for TimeoutSeconds {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let seconds = u64::deserialize(deserializer)?;
        Self::new(seconds).map_err(|e| de::Error::custom(e.to_string()))
    }
}

impl Default for TimeoutSeconds {
    fn default() -> Self {
        Self::default_value()
    }
}

/// Environment types for configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, utoipa::ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    /// Production environment
    Production,
    /// Development environment
    Development,
    /// Testing environment
    Testing,
}

impl std::fmt::Display for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Environment::Production => write!(f, "production"),
            Environment::Development => write!(f, "development"),
            Environment::Testing => write!(f, "testing"),
        }
    }
}

/// Fixed-window limit applied per client IP
#[serde_as]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RouteLimit {
    /// Requests allowed per window
    pub points: u32,
    /// Window length
    #[serde_as(as = "DurationSeconds<u64>")]
    pub duration: Duration,
    /// How long a client stays refused after exceeding the window
    #[serde_as(as = "DurationSeconds<u64>")]
    pub block_duration: Duration,
}

impl RouteLimit {
    /// `points` requests per `seconds`, blocked for the same length once exceeded
    pub const fn per_window(points: u32, seconds: u64) -> Self {
        Self {
            points,
            duration: Duration::from_secs(seconds),
            block_duration: Duration::from_secs(seconds),
        }
    }
}

/// Per-IP rate limiting of the HTTP routes
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct RateLimitingConfig {
    /// Whether the middleware is installed at all
    pub enabled: bool,
    /// Limit shared by the Covalent-backed routes
    pub covalent: RouteLimit,
    /// Limit of the transactions route
    pub transactions: RouteLimit,
}

impl Default for RateLimitingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            covalent: RouteLimit::per_window(30, 60),
            transactions: RouteLimit::per_window(10, 60),
        }
    }
}

/// Covalent credentials and throughput
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CovalentSettings {
    /// API key; the provider is disabled without one
    #[serde(deserialize_with = "deserialize_api_key")]
    pub api_key: Option<ApiKey>,
    /// Endpoint override
    pub base_url: Option<String>,
    /// Requests per second granted by the plan
    pub rps: f64,
}

impl Default for CovalentSettings {
    fn default() -> Self {
        Self {
            api_key: None,
            base_url: None,
            rps: DEFAULT_COVALENT_RPS,
        }
    }
}

/// Alchemy credentials and throughput
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AlchemySettings {
    /// API key; the provider is disabled without one
    #[serde(deserialize_with = "deserialize_api_key")]
    pub api_key: Option<ApiKey>,
    /// RPC URL template with `{network}` and `{api_key}` placeholders
    pub url_template: Option<String>,
    /// Compute units per second granted by the plan
    pub compute_units: f64,
}

impl Default for AlchemySettings {
    fn default() -> Self {
        Self {
            api_key: None,
            url_template: None,
            compute_units: DEFAULT_ALCHEMY_CUPS,
        }
    }
}

/// GeckoTerminal price lookups
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct GeckoTerminalSettings {
    /// Whether exchange rates are served
    pub enabled: bool,
    /// Endpoint override
    pub base_url: Option<String>,
    /// Network whose pools are scanned
    pub network: String,
    /// Most pool pages read per lookup
    pub max_pages: u32,
}

impl Default for GeckoTerminalSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            base_url: None,
            network: "etherlink".to_string(),
            max_pages: 10,
        }
    }
}

/// Upstream providers
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ProvidersConfig {
    /// Covalent (balances, metadata, activity)
    pub covalent: CovalentSettings,
    /// Alchemy (transactions)
    pub alchemy: AlchemySettings,
    /// GeckoTerminal (exchange rates)
    pub geckoterminal: GeckoTerminalSettings,
}

/// Server configuration for different environments
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server host address
    pub host: IpAddr,
    /// Server port (validated for environment compatibility)
    pub port: ServerPort,
    /// Request timeout in seconds (validated range: 1-300)
    pub timeout_seconds: TimeoutSeconds,
    /// Environment type
    pub environment: Environment,
    /// Per-IP limits of the HTTP routes
    #[serde(default)]
    pub rate_limiting: RateLimitingConfig,
    /// Upstream providers
    #[serde(default)]
    pub providers: ProvidersConfig,
    /// Dispatcher tuning shared by every provider queue
    #[serde(default)]
    pub queue: QueueOptions,
    /// Approvals span splitting
    #[serde(default)]
    pub planner: RangePlanner,
    /// Redis holding the provider limiter buckets; in-process buckets when unset
    #[serde(default)]
    pub redis_url: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: ServerPort::default_development(),
            timeout_seconds: TimeoutSeconds::default(),
            environment: Environment::Development,
            rate_limiting: RateLimitingConfig::default(),
            providers: ProvidersConfig::default(),
            queue: QueueOptions::default(),
            planner: RangePlanner::default(),
            redis_url: None,
        }
    }
}

impl ServerConfig {
    /// Create configuration from environment variables and optional configuration files
    ///
    /// # Errors
    ///
    /// Returns `ServerError::Config` if configuration is invalid or cannot be loaded.
    pub fn from_env() -> ServerResult<Self> {
        let config = Self::load().map_err(|e| ServerError::Config {
            message: format!("failed to load configuration: {e}"),
        })?;
        config.validate().map_err(|e| ServerError::Config {
            message: format!("invalid configuration: {e}"),
        })?;
        Ok(config)
    }

    /// Load configuration using the config crate with hierarchical sources
    ///
    /// Configuration is loaded in the following order (later sources override earlier ones):
    /// 1. Default values
    /// 2. Configuration file (config.json)
    /// 3. Environment-specific files (config.{env}.json)
    /// 4. Environment variables with SERVER_ prefix, `__` separating nested keys
    /// 5. Provider variables (`COVALENT_API_KEY`, `COVALENT_RPS`, `ALCHEMY_API_KEY`,
    ///    `ALCHEMY_CUPS`, `REDIS_URL`)
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if configuration cannot be loaded or is invalid.
    pub fn load() -> Result<Self, ConfigError> {
        let env_var = std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".to_string());
        let var = |name: &str| std::env::var(name).ok();

        let mut config_builder = Config::builder()
            .set_default("host", "127.0.0.1")?
            .set_default("port", 3000)?
            .set_default("timeout_seconds", 30)?
            .set_default("environment", "development")?
            .add_source(File::with_name("config.json").required(false))
            .add_source(
                File::with_name(&format!("config.{}.json", env_var.to_lowercase())).required(false),
            )
            .add_source(
                ConfigEnv::with_prefix("SERVER")
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true),
            )
            .set_override_option("providers.covalent.api_key", var("COVALENT_API_KEY"))?
            .set_override_option("providers.covalent.rps", var("COVALENT_RPS"))?
            .set_override_option("providers.alchemy.api_key", var("ALCHEMY_API_KEY"))?
            .set_override_option("providers.alchemy.compute_units", var("ALCHEMY_CUPS"))?
            .set_override_option("redis_url", var("REDIS_URL"))?;

        if std::env::var("ENVIRONMENT").is_ok() {
            config_builder = config_builder.set_override("environment", env_var.to_lowercase())?;
        }

        let config = config_builder.build()?;
        let mut server_config: Self = config.try_deserialize()?;

        server_config.port = ServerPort::new(server_config.port.value(), server_config.environment)
            .map_err(|e| ConfigError::Message(format!("invalid port configuration: {e}")))?;

        Ok(server_config)
    }

    /// Check values the types alone cannot rule out
    ///
    /// # Errors
    ///
    /// Returns an error naming the first offending setting
    pub fn validate(&self) -> Result<()> {
        let providers = &self.providers;
        ensure!(
            providers.covalent.rps.is_finite() && providers.covalent.rps > 0.0,
            "providers.covalent.rps must be a positive number"
        );
        ensure!(
            providers.alchemy.compute_units.is_finite() && providers.alchemy.compute_units > 0.0,
            "providers.alchemy.compute_units must be a positive number"
        );
        ensure!(self.queue.attempts >= 1, "queue.attempts must be at least 1");
        ensure!(
            self.queue.concurrency != Some(0),
            "queue.concurrency must be at least 1"
        );
        ensure!(
            providers.geckoterminal.max_pages >= 1,
            "providers.geckoterminal.max_pages must be at least 1"
        );
        for (name, limit) in [
            ("covalent", self.rate_limiting.covalent),
            ("transactions", self.rate_limiting.transactions),
        ] {
            ensure!(
                limit.points >= 1 && !limit.duration.is_zero(),
                "rate_limiting.{name} needs at least one point per non-empty window"
            );
        }
        Ok(())
    }

    /// Create configuration optimized for testing
    ///
    /// No provider is configured; tests attach the ones they exercise.
    pub fn for_testing() -> Self {
        Self {
            host: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: ServerPort::testing(),
            timeout_seconds: TimeoutSeconds::testing(),
            environment: Environment::Testing,
            providers: ProvidersConfig {
                geckoterminal: GeckoTerminalSettings {
                    enabled: false,
                    ..GeckoTerminalSettings::default()
                },
                ..ProvidersConfig::default()
            },
            ..Self::default()
        }
    }

    /// Get socket address for binding
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port.value())
    }
}

/// Blank keys count as absent so an empty variable disables the provider
fn deserialize_api_key<'de, D>(deserializer: D) -> Result<Option<ApiKey>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw: Option<String> = Option::deserialize(deserializer)?;
    match raw {
        Some(key) if !key.trim().is_empty() => ApiKey::new(key).map(Some).map_err(de::Error::custom),
        _ => Ok(None),
    }
}
