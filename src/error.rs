//! Error handling for the rate scraper
//!
//! Defines the failure taxonomy of a scrape run and establishes a unified
//! Result type using anyhow for context chaining and error propagation.

use thiserror::Error;

/// Failures that end a scrape run (or prevent it from starting)
#[derive(Error, Debug)]
pub enum ScrapeError {
    #[error("navigation error: {0}")]
    Navigation(String),

    #[error("publish error: {0}")]
    Publish(String),

    #[error("publish timed out after {0} ms")]
    PublishTimeout(u64),

    #[error("diagnostics error: {0}")]
    Diagnostics(String),

    #[error("config error: {0}")]
    Config(String),
}

impl ScrapeError {
    /// Stage label used in structured log lines
    pub fn stage(&self) -> &'static str {
        match self {
            ScrapeError::Navigation(_) => "fetch",
            ScrapeError::Publish(_) | ScrapeError::PublishTimeout(_) => "publish",
            ScrapeError::Diagnostics(_) => "diagnostics",
            ScrapeError::Config(_) => "config",
        }
    }
}

/// Result type alias for scraper operations
pub type Result<T> = anyhow::Result<T>;
