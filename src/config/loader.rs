// src/config/loader.rs

//! # Configuration Loader
//!
//! Reads `flowmon.toml`, deserializes into `RawConfig`, parses the
//! humantime durations and validates them into a runtime `Config`.

use crate::config::model::{Config, ConfigError, MonitorConfig, MonitorStub, RawConfig};
use log::Level;
use std::{fs, path::Path, time::Duration};

/// Load and validate the configuration at `path`.
pub fn load(path: &Path) -> Result<Config, ConfigError> {
    flowmon_log!(Level::Debug, "config", "Reading config from {:?}", path);
    let txt = fs::read_to_string(path)?;
    let cfg = from_toml(&txt)?;
    flowmon_log!(
        Level::Info,
        "config",
        "Loaded config from {:?}: interval={:?}, timeout={:?}",
        path,
        cfg.monitor.interval,
        cfg.monitor.timeout
    );
    Ok(cfg)
}

/// Parse configuration text; used by `load` and directly by tests.
pub fn from_toml(txt: &str) -> Result<Config, ConfigError> {
    let raw: RawConfig = toml::from_str(txt)?;
    Ok(Config {
        monitor:  convert_monitor(&raw.monitor)?,
        database: raw.database,
        logging:  raw.logging,
        export:   raw.export,
        metrics:  raw.metrics,
    })
}

fn convert_monitor(stub: &MonitorStub) -> Result<MonitorConfig, ConfigError> {
    let interval = parse_duration(&stub.interval)?;
    let timeout = match &stub.timeout {
        Some(t) => parse_duration(t)?,
        None => MonitorConfig::DEFAULT_TIMEOUT.max(interval),
    };
    MonitorConfig::new(interval, timeout)
}

fn parse_duration(s: &str) -> Result<Duration, ConfigError> {
    humantime::parse_duration(s).map_err(|e| ConfigError::InvalidDuration(s.to_owned(), e))
}
