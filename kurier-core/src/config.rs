//! Configuration loading and management
//!
//! Configuration is loaded from `~/.config/kurier/config.toml`
//!
//! This module follows the XDG Base Directory Specification:
//! - Config: `$XDG_CONFIG_HOME/kurier/` (~/.config/kurier/)
//! - Data: `$XDG_DATA_HOME/kurier/` (~/.local/share/kurier/)
//! - State/Logs: `$XDG_STATE_HOME/kurier/` (~/.local/state/kurier/)

use crate::error::{Error, Result};
use crate::types::RecordKind;
use serde::Deserialize;
use std::path::PathBuf;

/// Returns a best-effort home directory path.
fn home_dir() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// Returns XDG_CONFIG_HOME or ~/.config
fn xdg_config_home() -> PathBuf {
    std::env::var("XDG_CONFIG_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".config"))
}

/// Returns XDG_DATA_HOME or ~/.local/share
fn xdg_data_home() -> PathBuf {
    std::env::var("XDG_DATA_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/share"))
}

/// Returns XDG_STATE_HOME or ~/.local/state
fn xdg_state_home() -> PathBuf {
    std::env::var("XDG_STATE_HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|_| home_dir().join(".local/state"))
}

/// Main configuration struct
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Application identity and endpoint
    #[serde(default)]
    pub agent: AgentConfig,

    /// Batching, retry and transport behavior
    #[serde(default)]
    pub delivery: DeliveryConfig,

    /// Per-kind sample rates
    #[serde(default)]
    pub sampling: SamplingConfig,

    /// Error dedup and alerting
    #[serde(default)]
    pub errors: ErrorConfig,

    /// Offline persistence store
    #[serde(default)]
    pub offline: OfflineConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Application identity and collection endpoint
#[derive(Debug, Deserialize, Default, Clone)]
pub struct AgentConfig {
    /// Application identifier sent in every envelope
    pub app_id: Option<String>,

    /// Collection endpoint URL (e.g., `https://collect.example.com/ingest`)
    pub endpoint_url: Option<String>,
}

impl AgentConfig {
    /// Check whether the engine has everything it needs to deliver.
    ///
    /// A sender built from a not-ready config drops records after logging
    /// the condition once; it never errors at the host.
    pub fn is_ready(&self) -> bool {
        self.app_id.is_some() && self.endpoint_url.is_some()
    }
}

/// Batching, retry and transport configuration
#[derive(Debug, Deserialize, Clone)]
pub struct DeliveryConfig {
    /// Records per batch before an immediate flush
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    /// Max milliseconds a non-empty queue waits before flushing
    #[serde(default = "default_batch_timeout_ms")]
    pub batch_timeout_ms: u64,

    /// Retry attempts for a failed batch before offlining it
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Base for the exponential backoff between retries, in milliseconds
    #[serde(default = "default_base_retry_delay_ms")]
    pub base_retry_delay_ms: u64,

    /// HTTP request timeout in seconds (secondary transport)
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Try the primary fire-and-forget transport first when one is registered
    #[serde(default = "default_beacon_enabled")]
    pub beacon_enabled: bool,

    /// Compress HTTP payloads above the size threshold
    #[serde(default = "default_compress")]
    pub compress: bool,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            batch_size: default_batch_size(),
            batch_timeout_ms: default_batch_timeout_ms(),
            max_retries: default_max_retries(),
            base_retry_delay_ms: default_base_retry_delay_ms(),
            request_timeout_secs: default_request_timeout_secs(),
            beacon_enabled: default_beacon_enabled(),
            compress: default_compress(),
        }
    }
}

impl DeliveryConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.batch_size == 0 {
            return Err(Error::Config(
                "delivery.batch_size must be at least 1".to_string(),
            ));
        }
        if self.batch_timeout_ms == 0 {
            return Err(Error::Config(
                "delivery.batch_timeout_ms must be positive".to_string(),
            ));
        }
        if self.base_retry_delay_ms == 0 {
            return Err(Error::Config(
                "delivery.base_retry_delay_ms must be positive".to_string(),
            ));
        }
        if self.request_timeout_secs == 0 {
            return Err(Error::Config(
                "delivery.request_timeout_secs must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_batch_size() -> usize {
    10
}

fn default_batch_timeout_ms() -> u64 {
    5000
}

fn default_max_retries() -> u32 {
    3
}

fn default_base_retry_delay_ms() -> u64 {
    1000
}

fn default_request_timeout_secs() -> u64 {
    30
}

fn default_beacon_enabled() -> bool {
    true
}

fn default_compress() -> bool {
    true
}

/// Per-kind sample rates in `[0.0, 1.0]`
///
/// A rate at or below 0 rejects every record of that kind; at or above 1
/// admits every record. Values between are independent admit probabilities.
#[derive(Debug, Deserialize, Clone)]
pub struct SamplingConfig {
    #[serde(default = "default_rate")]
    pub event: f64,

    #[serde(default = "default_rate")]
    pub performance: f64,

    #[serde(default = "default_rate")]
    pub error: f64,

    #[serde(default = "default_rate")]
    pub custom: f64,
}

impl Default for SamplingConfig {
    fn default() -> Self {
        Self {
            event: default_rate(),
            performance: default_rate(),
            error: default_rate(),
            custom: default_rate(),
        }
    }
}

impl SamplingConfig {
    /// The configured rate for a record kind.
    pub fn rate_for(&self, kind: RecordKind) -> f64 {
        match kind {
            RecordKind::Event => self.event,
            RecordKind::Performance => self.performance,
            RecordKind::Error => self.error,
            RecordKind::Custom => self.custom,
        }
    }
}

fn default_rate() -> f64 {
    1.0
}

/// Error dedup cache and alerting configuration
#[derive(Debug, Deserialize, Clone)]
pub struct ErrorConfig {
    /// Distinct fingerprints tracked before LRU eviction
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: usize,

    /// Emitted-errors-per-minute rate that raises the alert flag
    #[serde(default = "default_alert_threshold")]
    pub alert_threshold_per_minute: u32,

    /// Ceiling on emitted error records per sender session
    #[serde(default = "default_max_emitted_per_session")]
    pub max_emitted_per_session: u32,
}

impl Default for ErrorConfig {
    fn default() -> Self {
        Self {
            cache_capacity: default_cache_capacity(),
            alert_threshold_per_minute: default_alert_threshold(),
            max_emitted_per_session: default_max_emitted_per_session(),
        }
    }
}

impl ErrorConfig {
    /// Validate configuration, returning error message if invalid
    pub fn validate(&self) -> Result<()> {
        if self.cache_capacity == 0 {
            return Err(Error::Config(
                "errors.cache_capacity must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_cache_capacity() -> usize {
    128
}

fn default_alert_threshold() -> u32 {
    100
}

fn default_max_emitted_per_session() -> u32 {
    200
}

/// Offline persistence store configuration
///
/// The cap counts *records*, not bytes; the oldest records are evicted
/// first when a push would exceed it.
#[derive(Debug, Deserialize, Clone)]
pub struct OfflineConfig {
    /// Maximum records retained in the offline store
    #[serde(default = "default_max_offline_records")]
    pub max_records: usize,

    /// Override path for the offline SQLite database
    pub database_path: Option<PathBuf>,
}

impl Default for OfflineConfig {
    fn default() -> Self {
        Self {
            max_records: default_max_offline_records(),
            database_path: None,
        }
    }
}

fn default_max_offline_records() -> usize {
    500
}

/// Logging configuration
#[derive(Debug, Deserialize, Clone)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Maximum number of log files to keep
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_log_files() -> usize {
    5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();

        if !config_path.exists() {
            tracing::info!("No config file found at {:?}, using defaults", config_path);
            return Ok(Config::default());
        }

        Self::load_from(&config_path)
    }

    /// Load configuration from a specific path
    pub fn load_from(path: &PathBuf) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("failed to read config file {:?}: {}", path, e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| Error::Config(format!("failed to parse config: {}", e)))?;

        config.validate()?;

        Ok(config)
    }

    /// Validate the structural constraints across sections
    pub fn validate(&self) -> Result<()> {
        self.delivery.validate()?;
        self.errors.validate()?;
        Ok(())
    }

    /// Returns the default config file path
    ///
    /// `$XDG_CONFIG_HOME/kurier/config.toml` (~/.config/kurier/config.toml)
    pub fn config_path() -> PathBuf {
        xdg_config_home().join("kurier").join("config.toml")
    }

    /// Returns the data directory path (for the offline store)
    ///
    /// `$XDG_DATA_HOME/kurier/` (~/.local/share/kurier/)
    pub fn data_dir() -> PathBuf {
        xdg_data_home().join("kurier")
    }

    /// Returns the state directory path (for logs)
    ///
    /// `$XDG_STATE_HOME/kurier/` (~/.local/state/kurier/)
    pub fn state_dir() -> PathBuf {
        xdg_state_home().join("kurier")
    }

    /// Returns the offline store database path, honoring the config override
    ///
    /// `$XDG_DATA_HOME/kurier/offline.db` (~/.local/share/kurier/offline.db)
    pub fn offline_db_path(&self) -> PathBuf {
        self.offline
            .database_path
            .clone()
            .unwrap_or_else(|| Self::data_dir().join("offline.db"))
    }

    /// Returns the log file path
    ///
    /// `$XDG_STATE_HOME/kurier/kurier.log` (~/.local/state/kurier/kurier.log)
    pub fn log_path() -> PathBuf {
        Self::state_dir().join("kurier.log")
    }

    /// Ensure XDG base directory environment variables are set.
    ///
    /// This is mainly for CLI binaries that want explicit, stable path behavior
    /// before invoking other components that read these env vars.
    pub fn ensure_xdg_env() {
        let home = home_dir();

        if std::env::var("XDG_DATA_HOME").is_err() {
            std::env::set_var("XDG_DATA_HOME", home.join(".local/share"));
        }

        if std::env::var("XDG_STATE_HOME").is_err() {
            std::env::set_var("XDG_STATE_HOME", home.join(".local/state"));
        }

        if std::env::var("XDG_CONFIG_HOME").is_err() {
            std::env::set_var("XDG_CONFIG_HOME", home.join(".config"));
        }
    }
}
