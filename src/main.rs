// src/main.rs

//! flowmon entry-point.
//!
//! 1. Load `flowmon.toml` (next to the executable, or the path given as the
//!    first argument)
//! 2. Set up structured logging
//! 3. Make sure the flow table exists
//! 4. Optionally expose Prometheus metrics
//! 5. Run passes until the process is killed
//!
// ───── std / 3rd-party imports ──────────────────────────────────────────────
use anyhow::{Context, Result};
use chrono::Local;
use crossbeam::channel::bounded;
use fern::Dispatch;
use log::LevelFilter;
use metrics_exporter_prometheus::PrometheusBuilder;
use std::{
    path::{Path, PathBuf},
    process, thread,
};

// ───── local imports ────────────────────────────────────────────────────────
use flowmon::config::{self, Config};
use flowmon::scheduler::Scheduler;
use flowmon::source::{RouteResolver, SystemSource};

// ───── helpers ──────────────────────────────────────────────────────────────

/// Print an error with context and terminate the process.
macro_rules! fatal {
    ($ctx:expr, $($arg:tt)+) => {{
        eprintln!(
            "[{}][ERROR][{}] {}",
            chrono::Local::now().to_rfc3339(),
            $ctx,
            format!($($arg)+)
        );
        std::process::exit(1);
    }};
}

/// Directory that contains the running executable.
fn exe_dir() -> Result<PathBuf> {
    let exe = std::env::current_exe().context("cannot determine exe path")?;
    Ok(exe.parent().map(Path::to_path_buf).unwrap_or_default())
}

/// First argument, else `flowmon.toml` next to the executable.
fn config_path() -> Result<PathBuf> {
    match std::env::args_os().nth(1) {
        Some(arg) => Ok(PathBuf::from(arg)),
        None => Ok(exe_dir()?.join("flowmon.toml")),
    }
}

/// Configure global logging as requested in `cfg.logging`.
fn setup_logging(cfg: &Config) -> Result<(), fern::InitError> {
    let level = match cfg.logging.level.to_uppercase().as_str() {
        "ERROR" => LevelFilter::Error,
        "WARN" => LevelFilter::Warn,
        "DEBUG" => LevelFilter::Debug,
        "TRACE" => LevelFilter::Trace,
        _ => LevelFilter::Info,
    };

    let log_path = cfg
        .logging
        .enable
        .then(|| cfg.logging.file.as_deref().unwrap_or("monitor.log"));

    let mut dispatch = Dispatch::new()
        .format(|out, msg, record| {
            out.finish(format_args!(
                "[{}][{:5}][{}][pid={}][tid={:?}] {}",
                Local::now().to_rfc3339(),
                record.level(),
                record.target(),
                process::id(),
                thread::current().id(),
                msg
            ))
        })
        .level(level)
        .chain(std::io::stdout());

    if let Some(path) = log_path {
        dispatch = dispatch.chain(fern::log_file(path)?);
    }

    dispatch.apply()?;
    Ok(())
}

/// Serve `/metrics` when enabled.
fn setup_metrics(cfg: &Config) -> Result<()> {
    if !cfg.metrics.enable {
        return Ok(());
    }
    PrometheusBuilder::new()
        .with_http_listener(cfg.metrics.listen)
        .install()
        .with_context(|| format!("metrics listener on {}", cfg.metrics.listen))?;
    log::info!("Metrics served on http://{}/metrics", cfg.metrics.listen);
    Ok(())
}

// ───── main ─────────────────────────────────────────────────────────────────

fn main() {
    // 1 ─ Configuration
    let path = config_path().unwrap_or_else(|e| fatal!("config", "{:#}", e));
    let cfg = config::load(&path).unwrap_or_else(|e| fatal!("config", "{}: {}", path.display(), e));

    // 2 ─ Logging
    setup_logging(&cfg).unwrap_or_else(|e| fatal!("logging", "{}", e));
    log::info!("Configured and running.");

    // 3 ─ Metrics
    if let Err(e) = setup_metrics(&cfg) {
        log::warn!("Metrics disabled: {:#}", e);
    }

    // 4 ─ Store
    let scheduler = Scheduler::new(cfg, Box::new(SystemSource::default()), Box::new(RouteResolver));
    scheduler
        .prepare()
        .unwrap_or_else(|e| fatal!("database", "{}", e));
    log::info!("Database ready at {}", scheduler.config().database.path.display());

    // 5 ─ Passes; the sender is never used, so this runs until killed
    let (_stop_tx, stop_rx) = bounded::<()>(1);
    scheduler.run(&stop_rx);
    log::logger().flush();
}
