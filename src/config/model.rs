// src/config/model.rs

use serde::Deserialize;
use std::{net::SocketAddr, path::PathBuf, time::Duration};
use thiserror::Error;

/// Shortest and longest polling interval accepted.
pub const MIN_INTERVAL: Duration = Duration::from_secs(1);
pub const MAX_INTERVAL: Duration = Duration::from_secs(60);

/// Top-level runtime config, built once at startup and passed down.
#[derive(Debug, Clone)]
pub struct Config {
    pub monitor:  MonitorConfig,
    pub database: DatabaseConfig,
    pub logging:  LoggingConfig,
    pub export:   ExportConfig,
    pub metrics:  MetricsConfig,
}

impl Config {
    /// Defaults for every table except `[monitor]`, which has none.
    pub fn new(monitor: MonitorConfig) -> Self {
        Self {
            monitor,
            database: DatabaseConfig::default(),
            logging:  LoggingConfig::default(),
            export:   ExportConfig::default(),
            metrics:  MetricsConfig::default(),
        }
    }
}

/// Validated polling parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MonitorConfig {
    pub interval: Duration,
    pub timeout:  Duration,
}

/// Mirror of the `[monitor]` table; durations are humantime strings.
#[derive(Debug, Deserialize)]
pub struct MonitorStub {
    pub interval: String,
    #[serde(default)]
    pub timeout:  Option<String>,
}

/// Mirror of the `[database]` table
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]      pub path:            PathBuf,
    #[serde(default = "default_synchronous")]  pub synchronous:     String,
    #[serde(default = "default_busy_timeout")] pub busy_timeout_ms: u64,
}
fn default_db_path() -> PathBuf { "connections.db".into() }
fn default_synchronous() -> String { "NORMAL".into() }
fn default_busy_timeout() -> u64 { 1_000 }

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path:            default_db_path(),
            synchronous:     default_synchronous(),
            busy_timeout_ms: default_busy_timeout(),
        }
    }
}

/// Mirror of the `[logging]` table
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_enable")] pub enable: bool,
    #[serde(default = "default_file")]   pub file:   Option<String>,
    #[serde(default = "default_level")]  pub level:  String,
}
fn default_enable() -> bool { true }
fn default_file() -> Option<String> { Some("monitor.log".into()) }
fn default_level() -> String { "INFO".into() }

impl Default for LoggingConfig {
    fn default() -> Self {
        Self { enable: default_enable(), file: default_file(), level: default_level() }
    }
}

/// Mirror of the `[export]` table
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ExportConfig {
    #[serde(default)]
    pub json_dir: Option<PathBuf>,
}

/// Mirror of the `[metrics]` table
#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    #[serde(default)]                    pub enable: bool,
    #[serde(default = "default_listen")] pub listen: SocketAddr,
}
fn default_listen() -> SocketAddr { SocketAddr::from(([127, 0, 0, 1], 9187)) }

impl Default for MetricsConfig {
    fn default() -> Self {
        Self { enable: false, listen: default_listen() }
    }
}

/// Raw file layout, before duration parsing and validation.
#[derive(Debug, Deserialize)]
pub struct RawConfig {
    pub monitor:  MonitorStub,
    #[serde(default)] pub database: DatabaseConfig,
    #[serde(default)] pub logging:  LoggingConfig,
    #[serde(default)] pub export:   ExportConfig,
    #[serde(default)] pub metrics:  MetricsConfig,
}

/// All the ways config loading can go wrong
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid duration '{0}': {1}")]
    InvalidDuration(String, #[source] humantime::DurationError),

    #[error("interval {0:?} outside 1s..=60s")]
    IntervalOutOfRange(Duration),

    #[error("timeout {timeout:?} is shorter than interval {interval:?}")]
    TimeoutBelowInterval { interval: Duration, timeout: Duration },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl MonitorConfig {
    /// Default timeout when the file only names an interval.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Range checks: interval in 1..=60 s, timeout never below interval.
    pub fn new(interval: Duration, timeout: Duration) -> Result<Self, ConfigError> {
        if !(MIN_INTERVAL..=MAX_INTERVAL).contains(&interval) {
            return Err(ConfigError::IntervalOutOfRange(interval));
        }
        if timeout < interval {
            return Err(ConfigError::TimeoutBelowInterval { interval, timeout });
        }
        Ok(Self { interval, timeout })
    }
}
