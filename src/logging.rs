//! Logging setup
//!
//! Development mode logs human-readable lines to the console. Otherwise
//! every event goes as JSON to `combined.log` and errors are also copied to
//! `error.log`, both inside the configured log directory.

use anyhow::{Context, Result};
use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

use crate::config::Settings;

/// Name attached to every log line through the root span
pub const SERVICE_NAME: &str = "scraper";

pub const COMBINED_LOG: &str = "combined.log";
pub const ERROR_LOG: &str = "error.log";

/// Install the global subscriber. Call once, before anything logs.
pub fn init(settings: &Settings) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if settings.development {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
            .context("Failed to install console logger")?;
        return Ok(());
    }

    let (combined, errors) = open_log_files(&settings.log_dir)?;
    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Arc::new(combined)),
        )
        .with(
            fmt::layer()
                .json()
                .with_ansi(false)
                .with_writer(Arc::new(errors))
                .with_filter(LevelFilter::ERROR),
        )
        .try_init()
        .context("Failed to install file logger")?;
    Ok(())
}

/// Create the log directory and open both log files for appending
pub fn open_log_files(dir: &Path) -> Result<(File, File)> {
    fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
    let combined = open_append(dir.join(COMBINED_LOG))?;
    let errors = open_append(dir.join(ERROR_LOG))?;
    Ok((combined, errors))
}

fn open_append(path: PathBuf) -> Result<File> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(&path)
        .with_context(|| format!("Failed to open log file {}", path.display()))
}
