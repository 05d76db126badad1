//! Configuration for the fleet router.

use std::collections::HashMap;
use std::time::Duration;

use config::{Config as ConfigLoader, ConfigError, Environment, File};
use serde::Deserialize;

/// Main configuration structure.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub routing: RoutingConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
    #[serde(default)]
    pub webhooks: WebhookConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Which persistence backend mirrors the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    #[default]
    Memory,
    Sqlite,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default)]
    pub backend: StoreBackend,
    /// SQLite database path (sqlite backend only).
    #[serde(default = "default_store_path")]
    pub path: String,
    /// Deadline for each store call.
    #[serde(default = "default_store_timeout")]
    pub timeout_ms: u64,
}

impl StoreConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            path: default_store_path(),
            timeout_ms: default_store_timeout(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Decision cache entry lifetime in seconds. 0 keeps entries until invalidated.
    #[serde(default)]
    pub cache_ttl_secs: u64,
    /// Heads silent for longer than this are marked inactive. 0 disables the sweep.
    #[serde(default = "default_heartbeat_timeout")]
    pub heartbeat_timeout_secs: u64,
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

impl RoutingConfig {
    pub fn cache_ttl(&self) -> Option<Duration> {
        (self.cache_ttl_secs > 0).then(|| Duration::from_secs(self.cache_ttl_secs))
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            cache_ttl_secs: 0,
            heartbeat_timeout_secs: default_heartbeat_timeout(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

/// Per-service circuit breaker override.
#[derive(Debug, Clone, Deserialize)]
pub struct BreakerOverride {
    #[serde(default)]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub reset_timeout_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures before the breaker opens.
    #[serde(default = "default_breaker_threshold")]
    pub threshold: u32,
    /// Time an open breaker waits before allowing a probe.
    #[serde(default = "default_breaker_reset")]
    pub reset_timeout_ms: u64,
    /// Overrides keyed by service name (e.g. "store" or a webhook URL).
    #[serde(default)]
    pub overrides: HashMap<String, BreakerOverride>,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            threshold: default_breaker_threshold(),
            reset_timeout_ms: default_breaker_reset(),
            overrides: HashMap::new(),
        }
    }
}

/// Per-client rate limit override.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RateLimitOverride {
    #[serde(default)]
    pub threshold: Option<u32>,
    #[serde(default)]
    pub window_secs: Option<u64>,
    #[serde(default)]
    pub burst_limit: Option<u32>,
    #[serde(default)]
    pub burst_duration_ms: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Requests allowed per sustained window.
    #[serde(default = "default_rate_threshold")]
    pub threshold: u32,
    #[serde(default = "default_rate_window")]
    pub window_secs: u64,
    /// Requests allowed per burst window.
    #[serde(default = "default_burst_limit")]
    pub burst_limit: u32,
    #[serde(default = "default_burst_duration")]
    pub burst_duration_ms: u64,
    /// Overrides keyed by client key (IP address).
    #[serde(default)]
    pub overrides: HashMap<String, RateLimitOverride>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            threshold: default_rate_threshold(),
            window_secs: default_rate_window(),
            burst_limit: default_burst_limit(),
            burst_duration_ms: default_burst_duration(),
            overrides: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct WebhookConfig {
    /// URLs that receive every fleet event as a JSON POST.
    #[serde(default)]
    pub urls: Vec<String>,
    #[serde(default = "default_webhook_timeout")]
    pub timeout_ms: u64,
    /// Outbound queue capacity; events beyond it are dropped.
    #[serde(default = "default_queue_size")]
    pub queue_size: usize,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            urls: vec![],
            timeout_ms: default_webhook_timeout(),
            queue_size: default_queue_size(),
        }
    }
}

/// An API key, stored as the hex SHA-256 digest of the bearer token.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiKeyConfig {
    pub key_sha256: String,
    pub role: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct AuthConfig {
    /// With no keys configured the API is open.
    #[serde(default)]
    pub api_keys: Vec<ApiKeyConfig>,
}

// Default values
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8090
}
fn default_log_level() -> String {
    "info".to_string()
}
fn default_store_path() -> String {
    "./data/fleet.db".to_string()
}
fn default_store_timeout() -> u64 {
    2000
}
fn default_heartbeat_timeout() -> u64 {
    90
}
fn default_sweep_interval() -> u64 {
    15
}
fn default_breaker_threshold() -> u32 {
    5
}
fn default_breaker_reset() -> u64 {
    30_000
}
fn default_true() -> bool {
    true
}
fn default_rate_threshold() -> u32 {
    100
}
fn default_rate_window() -> u64 {
    60
}
fn default_burst_limit() -> u32 {
    20
}
fn default_burst_duration() -> u64 {
    1000
}
fn default_webhook_timeout() -> u64 {
    5000
}
fn default_queue_size() -> usize {
    1024
}

impl Config {
    /// Load configuration from file and environment variables.
    ///
    /// Configuration sources (in order of precedence):
    /// 1. Environment variables (FLEET__SECTION__KEY format)
    /// 2. config.toml file (if present)
    /// 3. Built-in defaults
    pub fn load() -> Result<Self, ConfigError> {
        let config = ConfigLoader::builder()
            .set_default("server.host", default_host())?
            .set_default("server.port", default_port() as i64)?
            .set_default("logging.level", default_log_level())?
            .add_source(File::with_name("config").required(false))
            .add_source(
                Environment::with_prefix("FLEET")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }
}
