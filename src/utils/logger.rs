//! Logging setup
//!
//! Console output plus an optional append-only log file. Backend output is
//! logged under the `studydesk::backend` target, so it can be filtered on its
//! own (e.g. `RUST_LOG=info,studydesk::backend=warn`).

use anyhow::Result;
use std::path::PathBuf;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Default filter when neither `--log-level` nor `RUST_LOG` is given.
pub const DEFAULT_FILTER: &str = "info,studydesk=debug";

/// Initialize the global subscriber.
///
/// # Arguments
/// * `log_level` - filter directive (e.g. `debug`, `info,studydesk=trace`); falls back to `RUST_LOG`
/// * `log_file` - also write to this file; parent directories are created
///
/// # Examples
/// ```no_run
/// use studydesk::utils::logger::init_logger;
///
/// init_logger(Some("debug"), None).unwrap();
/// ```
pub fn init_logger(log_level: Option<&str>, log_file: Option<PathBuf>) -> Result<()> {
    let env_filter = match log_level {
        Some(level) => EnvFilter::try_new(level)?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };

    let fmt_layer = fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(true)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_level(true)
        .with_ansi(true)
        .compact();

    let registry = tracing_subscriber::registry()
        .with(env_filter)
        .with(fmt_layer);

    match &log_file {
        Some(log_path) => {
            if let Some(parent) = log_path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            let file = std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(log_path)?;

            let file_layer = fmt::layer()
                .with_writer(std::sync::Arc::new(file))
                .with_target(true)
                .with_ansi(false)
                .with_level(true);

            registry.with(file_layer).try_init()?;
        }
        None => registry.try_init()?,
    }

    tracing::debug!(log_file = ?log_file, "logger initialized");
    Ok(())
}
