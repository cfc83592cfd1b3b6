//! Configuration management for the baedal dispatcher
//!
//! This module handles loading and validating configuration from
//! environment variables, TOML files, and command-line arguments.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Dispatch engine configuration
    pub dispatcher: DispatcherConfig,

    /// HTTP fetcher configuration
    pub fetcher: FetcherConfig,

    /// Logging configuration
    pub logging: LoggingConfig,
}

/// Dispatch engine configuration
///
/// Immutable once a run starts. A variant can be derived by cloning a
/// base configuration and overriding fields with struct update syntax.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatcherConfig {
    /// Upper bound on simultaneously running tasks
    pub max_concurrency: usize,

    /// Pause admission when memory usage exceeds this fraction (0-1)
    pub memory_threshold: f64,

    /// Memory sampling period in milliseconds
    pub check_interval_ms: u64,

    /// Bound on re-attempts per task
    pub max_retries: u32,

    /// Initial per-destination delay in milliseconds
    pub base_delay_ms: u64,

    /// Cap on the per-destination delay in milliseconds
    pub max_delay_ms: u64,

    /// Multiplier applied to the delay after a rate-limit response
    pub backoff_factor: f64,

    /// Per-task execution bound in seconds
    pub task_timeout_secs: u64,

    /// Worker sessions in the pool; defaults to `max_concurrency`
    pub session_pool_size: Option<usize>,

    /// Grace period for in-flight tasks after cancellation, in seconds
    pub shutdown_grace_secs: u64,
}

/// HTTP fetcher configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetcherConfig {
    /// Fixed user agent; rotates through a browser pool when unset
    pub user_agent: Option<String>,

    /// Optional global cap on requests per second across all destinations
    pub requests_per_second: Option<u32>,

    /// HTTP client timeout in seconds
    pub request_timeout_secs: u64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,

    /// Log format (text, json)
    pub format: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(v) = env_parse::<usize>("BAEDAL_MAX_CONCURRENCY") {
            config.dispatcher.max_concurrency = v;
        }
        if let Some(v) = env_parse::<f64>("BAEDAL_MEMORY_THRESHOLD") {
            config.dispatcher.memory_threshold = v;
        }
        if let Some(v) = env_parse::<u64>("BAEDAL_CHECK_INTERVAL_MS") {
            config.dispatcher.check_interval_ms = v;
        }
        if let Some(v) = env_parse::<u32>("BAEDAL_MAX_RETRIES") {
            config.dispatcher.max_retries = v;
        }
        if let Some(v) = env_parse::<u64>("BAEDAL_BASE_DELAY_MS") {
            config.dispatcher.base_delay_ms = v;
        }
        if let Some(v) = env_parse::<u64>("BAEDAL_MAX_DELAY_MS") {
            config.dispatcher.max_delay_ms = v;
        }
        if let Some(v) = env_parse::<f64>("BAEDAL_BACKOFF_FACTOR") {
            config.dispatcher.backoff_factor = v;
        }
        if let Some(v) = env_parse::<u64>("BAEDAL_TASK_TIMEOUT") {
            config.dispatcher.task_timeout_secs = v;
        }
        if let Ok(v) = std::env::var("BAEDAL_USER_AGENT") {
            config.fetcher.user_agent = Some(v);
        }
        if let Some(v) = env_parse::<u32>("BAEDAL_RATE_LIMIT") {
            config.fetcher.requests_per_second = Some(v);
        }
        if let Ok(v) = std::env::var("BAEDAL_LOG_LEVEL") {
            config.logging.level = v;
        }
        if let Ok(v) = std::env::var("BAEDAL_LOG_FORMAT") {
            config.logging.format = v;
        }

        Ok(config)
    }

    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse TOML config file: {}", path.display()))?;

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        self.dispatcher.validate().map_err(anyhow::Error::msg)?;

        if self.fetcher.request_timeout_secs == 0 {
            anyhow::bail!("request_timeout_secs must be greater than 0");
        }
        if let Some(rps) = self.fetcher.requests_per_second {
            if rps == 0 {
                anyhow::bail!("requests_per_second must be greater than 0 when set");
            }
        }

        Ok(())
    }

    /// Get HTTP client timeout as Duration
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.fetcher.request_timeout_secs)
    }
}

impl DispatcherConfig {
    /// Validate dispatch parameters; returns the first violation found
    pub fn validate(&self) -> std::result::Result<(), String> {
        if self.max_concurrency == 0 {
            return Err("max_concurrency must be greater than 0".into());
        }
        if !(self.memory_threshold > 0.0 && self.memory_threshold <= 1.0) {
            return Err("memory_threshold must be within (0, 1]".into());
        }
        if self.check_interval_ms == 0 {
            return Err("check_interval_ms must be greater than 0".into());
        }
        if self.backoff_factor < 1.0 {
            return Err("backoff_factor must be at least 1.0".into());
        }
        if self.base_delay_ms > self.max_delay_ms {
            return Err("base_delay_ms must not exceed max_delay_ms".into());
        }
        if self.task_timeout_secs == 0 {
            return Err("task_timeout_secs must be greater than 0".into());
        }
        if self.session_pool_size == Some(0) {
            return Err("session_pool_size must be greater than 0 when set".into());
        }
        Ok(())
    }

    /// Memory sampling period as Duration
    #[must_use]
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms)
    }

    /// Initial per-destination delay as Duration
    #[must_use]
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    /// Delay cap as Duration
    #[must_use]
    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    /// Per-task execution bound as Duration
    #[must_use]
    pub fn task_timeout(&self) -> Duration {
        Duration::from_secs(self.task_timeout_secs)
    }

    /// Cancellation grace period as Duration
    #[must_use]
    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    /// Effective session pool size
    #[must_use]
    pub fn sessions(&self) -> usize {
        self.session_pool_size.unwrap_or(self.max_concurrency)
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse::<T>().ok())
}

impl Default for Config {
    fn default() -> Self {
        Self {
            dispatcher: DispatcherConfig::default(),
            fetcher: FetcherConfig::default(),
            logging: LoggingConfig {
                level: String::from("info"),
                format: String::from("text"),
            },
        }
    }
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 10,
            memory_threshold: 0.85,
            check_interval_ms: 500,
            max_retries: 3,
            base_delay_ms: 1000,
            max_delay_ms: 30_000,
            backoff_factor: 2.0,
            task_timeout_secs: 30,
            session_pool_size: None,
            shutdown_grace_secs: 10,
        }
    }
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            user_agent: None,
            requests_per_second: None,
            request_timeout_secs: 30,
        }
    }
}
