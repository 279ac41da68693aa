//! Configuration for the gateway.

use anyhow::{Context, Result};
use credit_ledger::LedgerConfig;
use secrecy::SecretString;
use serde::Deserialize;
use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::PathBuf;
use std::time::Duration;

/// Gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream SMS provider
    #[serde(default)]
    pub provider: ProviderConfig,

    /// Inbound routing
    #[serde(default)]
    pub routing: RoutingConfig,

    /// Outbound dispatch
    #[serde(default)]
    pub dispatch: DispatchConfig,

    #[serde(default)]
    pub ledger: LedgerConfig,

    /// Push delivery to tenant endpoints
    #[serde(default)]
    pub forwarder: ForwarderConfig,

    #[serde(default)]
    pub store: StoreConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Server listen address
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,
}

impl ServerConfig {
    /// Socket address to bind. Fails on an unparseable `listen_addr`.
    pub fn socket_addr(&self) -> Result<SocketAddr, AddrParseError> {
        let ip: IpAddr = self.listen_addr.trim().parse()?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProviderConfig {
    /// Provider REST API base URL
    #[serde(default = "default_provider_url")]
    pub base_url: String,

    /// Bearer key for the operator's provider account
    #[serde(default = "empty_secret")]
    pub api_key: SecretString,

    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RoutingConfig {
    /// Shared secret the provider presents on inbound pushes. Unset disables the check.
    #[serde(default)]
    pub webhook_secret: Option<SecretString>,

    /// Country dial code applied to numbers without one
    #[serde(default = "default_dial_code")]
    pub default_dial_code: String,

    /// Recent routing decisions kept for troubleshooting
    #[serde(default = "default_diagnostics_capacity")]
    pub diagnostics_capacity: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DispatchConfig {
    /// Hard cap on units per send call
    #[serde(default = "default_max_batch_units")]
    pub max_batch_units: u64,

    /// Upper bound on a provider send, independent of the HTTP client timeout
    #[serde(default = "default_provider_timeout", with = "humantime_serde")]
    pub provider_timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ForwarderConfig {
    #[serde(default = "default_forward_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    /// JSON snapshot file; in-memory only when unset
    #[serde(default)]
    pub snapshot_path: Option<PathBuf>,

    /// Timeout applied to every store call
    #[serde(default = "default_store_timeout", with = "humantime_serde")]
    pub timeout: Duration,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Global requests per minute
    #[serde(default = "default_global_rpm")]
    pub global_per_minute: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LogConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,
}

// Default implementations
impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            provider: ProviderConfig::default(),
            routing: RoutingConfig::default(),
            dispatch: DispatchConfig::default(),
            ledger: LedgerConfig::default(),
            forwarder: ForwarderConfig::default(),
            store: StoreConfig::default(),
            rate_limit: RateLimitConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            port: default_port(),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            base_url: default_provider_url(),
            api_key: empty_secret(),
            timeout: default_provider_timeout(),
        }
    }
}

impl Default for RoutingConfig {
    fn default() -> Self {
        Self {
            webhook_secret: None,
            default_dial_code: default_dial_code(),
            diagnostics_capacity: default_diagnostics_capacity(),
        }
    }
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_batch_units: default_max_batch_units(),
            provider_timeout: default_provider_timeout(),
        }
    }
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            timeout: default_forward_timeout(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            snapshot_path: None,
            timeout: default_store_timeout(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            global_per_minute: default_global_rpm(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
        }
    }
}

// Default value functions
fn default_listen_addr() -> String {
    "0.0.0.0".into()
}

fn default_port() -> u16 {
    8080
}

fn default_provider_url() -> String {
    "http://sms-provider:8080".into()
}

fn empty_secret() -> SecretString {
    SecretString::new(String::new())
}

fn default_provider_timeout() -> Duration {
    Duration::from_secs(30)
}

fn default_dial_code() -> String {
    "1".into()
}

fn default_diagnostics_capacity() -> usize {
    50
}

fn default_max_batch_units() -> u64 {
    3000
}

fn default_forward_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_store_timeout() -> Duration {
    Duration::from_secs(5)
}

fn default_global_rpm() -> u32 {
    600
}

fn default_log_level() -> String {
    "info".into()
}

impl Config {
    /// Load configuration from environment variables.
    pub fn load() -> Result<Self> {
        // Load .env file if present
        dotenvy::dotenv().ok();

        let config = config::Config::builder()
            .add_source(
                config::Environment::default()
                    .separator("__")
                    .try_parsing(false),
            )
            .build()
            .context("Failed to build configuration")?;

        config
            .try_deserialize()
            .context("Failed to deserialize configuration")
    }
}
