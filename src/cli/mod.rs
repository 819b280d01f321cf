use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Overrides;

pub mod formatters;

#[derive(Parser)]
#[command(name = "usd-rate-scraper")]
#[command(
    version,
    about = "Scrape bank USD rates and publish them to a Redis stream"
)]
#[command(
    long_about = "Renders the minfin.com.ua bank rates page in headless Chrome, parses the rates table and appends one Redis stream entry per bank. Failed runs leave JPEG screenshots of every open page in the log directory."
)]
pub struct Cli {
    /// Disable colorized/ANSI output
    #[arg(long = "no-color", global = true)]
    pub no_color: bool,

    /// TOML file with default settings
    #[arg(long, global = true, env = "SCRAPER_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(flatten)]
    pub settings: SettingsArgs,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Scrape the rates page once and publish the result (default)
    Run,

    /// Parse a saved copy of the rates page without a browser or Redis
    Parse {
        /// Path to the saved HTML
        file: PathBuf,

        /// URL recorded as the source of every parsed rate
        #[arg(long)]
        source_url: Option<String>,

        /// Print one JSON object per rate instead of a table
        #[arg(long)]
        json: bool,
    },
}

/// Settings that can come from flags or the environment
#[derive(Args, Debug, Default)]
pub struct SettingsArgs {
    /// Redis connection string
    #[arg(long, global = true, env = "REDIS_URL")]
    pub redis_url: Option<String>,

    /// Chrome/Chromium executable
    #[arg(long, global = true, env = "CHROMIUM")]
    pub chromium: Option<PathBuf>,

    /// Stream the rates are appended to
    #[arg(long, global = true, env = "REDIS_STEAM")]
    pub stream: Option<String>,

    /// Page to scrape
    #[arg(long, global = true, env = "TARGET_URL")]
    pub target_url: Option<String>,

    /// Navigation timeout in seconds
    #[arg(long, global = true, env = "NAVIGATION_TIMEOUT_SECS")]
    pub navigation_timeout: Option<u64>,

    /// Publish timeout in seconds
    #[arg(long, global = true, env = "PUBLISH_TIMEOUT_SECS")]
    pub publish_timeout: Option<u64>,

    /// Directory for log files and failure screenshots
    #[arg(long, global = true, env = "LOG_DIR")]
    pub log_dir: Option<PathBuf>,

    /// JPEG quality of failure screenshots (1-100)
    #[arg(long, global = true)]
    pub screenshot_quality: Option<u32>,

    /// Log to the console instead of files
    #[arg(long, global = true)]
    pub dev: bool,

    /// Runtime environment; "development" switches logging to the console
    #[arg(long = "env", global = true, env = "NODE_ENV", hide = true)]
    pub node_env: Option<String>,
}

impl SettingsArgs {
    pub fn development(&self) -> bool {
        self.dev
            || self
                .node_env
                .as_deref()
                .is_some_and(|env| env.eq_ignore_ascii_case("development"))
    }

    pub fn overrides(&self) -> Overrides {
        Overrides {
            redis_url: self.redis_url.clone(),
            chromium_path: self.chromium.clone(),
            stream: self.stream.clone(),
            target_url: self.target_url.clone(),
            navigation_timeout_secs: self.navigation_timeout,
            publish_timeout_secs: self.publish_timeout,
            log_dir: self.log_dir.clone(),
            screenshot_quality: self.screenshot_quality,
            development: self.development(),
        }
    }
}
