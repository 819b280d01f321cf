//! Process configuration
//!
//! Settings are resolved once at startup from, in order of precedence,
//! command-line flags or their environment variables, an optional TOML file,
//! and built-in defaults. They are read-only for the rest of the process.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::error::ScrapeError;
use crate::queue::RedisStream;
use crate::scraping::{FetchOptions, LaunchConfig, ResourcePolicy, BANKS_USD_URL};

pub const DEFAULT_REDIS_URL: &str = "redis://127.0.0.1:6379";
pub const DEFAULT_CHROMIUM_PATH: &str = "/bin/google-chrome-stable";
pub const DEFAULT_STREAM: &str = "rate:usd";
pub const DEFAULT_LOG_DIR: &str = "./logs";
pub const DEFAULT_NAVIGATION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_PUBLISH_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_SCREENSHOT_QUALITY: u32 = 50;

/// Values given on the command line (or through the matching env vars)
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub redis_url: Option<String>,
    pub chromium_path: Option<PathBuf>,
    pub stream: Option<String>,
    pub target_url: Option<String>,
    pub navigation_timeout_secs: Option<u64>,
    pub publish_timeout_secs: Option<u64>,
    pub log_dir: Option<PathBuf>,
    pub screenshot_quality: Option<u32>,
    pub development: bool,
}

/// Optional TOML configuration file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub redis_url: Option<String>,
    pub chromium_path: Option<PathBuf>,
    pub stream: Option<String>,
    pub target_url: Option<String>,
    pub navigation_timeout_secs: Option<u64>,
    pub publish_timeout_secs: Option<u64>,
    pub log_dir: Option<PathBuf>,
    pub screenshot_quality: Option<u32>,
    pub development: Option<bool>,
}

impl FileConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        toml::from_str(&raw)
            .with_context(|| format!("Failed to parse config file {}", path.display()))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub redis_url: String,
    pub chromium_path: PathBuf,
    pub stream: String,
    pub target_url: String,
    pub navigation_timeout: Duration,
    pub publish_timeout: Duration,
    pub log_dir: PathBuf,
    pub screenshot_quality: u32,
    pub development: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            redis_url: DEFAULT_REDIS_URL.to_string(),
            chromium_path: PathBuf::from(DEFAULT_CHROMIUM_PATH),
            stream: DEFAULT_STREAM.to_string(),
            target_url: BANKS_USD_URL.to_string(),
            navigation_timeout: Duration::from_secs(DEFAULT_NAVIGATION_TIMEOUT_SECS),
            publish_timeout: Duration::from_secs(DEFAULT_PUBLISH_TIMEOUT_SECS),
            log_dir: PathBuf::from(DEFAULT_LOG_DIR),
            screenshot_quality: DEFAULT_SCREENSHOT_QUALITY,
            development: false,
        }
    }
}

impl Settings {
    /// Merge flags over file values over defaults, then validate
    pub fn resolve(overrides: Overrides, file: FileConfig) -> Result<Self> {
        let defaults = Settings::default();
        let settings = Settings {
            redis_url: overrides
                .redis_url
                .or(file.redis_url)
                .unwrap_or(defaults.redis_url),
            chromium_path: overrides
                .chromium_path
                .or(file.chromium_path)
                .unwrap_or(defaults.chromium_path),
            stream: overrides.stream.or(file.stream).unwrap_or(defaults.stream),
            target_url: overrides
                .target_url
                .or(file.target_url)
                .unwrap_or(defaults.target_url),
            navigation_timeout: overrides
                .navigation_timeout_secs
                .or(file.navigation_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.navigation_timeout),
            publish_timeout: overrides
                .publish_timeout_secs
                .or(file.publish_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(defaults.publish_timeout),
            log_dir: overrides.log_dir.or(file.log_dir).unwrap_or(defaults.log_dir),
            screenshot_quality: overrides
                .screenshot_quality
                .or(file.screenshot_quality)
                .unwrap_or(defaults.screenshot_quality),
            development: overrides.development || file.development.unwrap_or(false),
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.redis_url.trim().is_empty() {
            return Err(ScrapeError::Config("redis_url is empty".to_string()).into());
        }
        if self.target_url.trim().is_empty() {
            return Err(ScrapeError::Config("target_url is empty".to_string()).into());
        }
        RedisStream::validate_stream(&self.stream)?;
        if self.navigation_timeout.is_zero() {
            return Err(
                ScrapeError::Config("navigation_timeout_secs must be > 0".to_string()).into(),
            );
        }
        if self.publish_timeout.is_zero() {
            return Err(
                ScrapeError::Config("publish_timeout_secs must be > 0".to_string()).into(),
            );
        }
        if !(1..=100).contains(&self.screenshot_quality) {
            return Err(ScrapeError::Config(format!(
                "screenshot_quality must be within 1..=100, got {}",
                self.screenshot_quality
            ))
            .into());
        }
        Ok(())
    }

    pub fn fetch_options(&self) -> FetchOptions {
        FetchOptions {
            timeout: self.navigation_timeout,
            policy: ResourcePolicy::structure_only(),
        }
    }

    pub fn launch_config(&self) -> LaunchConfig {
        LaunchConfig {
            executable: Some(self.chromium_path.clone()),
            // Keep the browser alive for at least one full navigation
            idle_timeout: self.navigation_timeout + Duration::from_secs(30),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_match_deployment() {
        let settings = Settings::resolve(Overrides::default(), FileConfig::default()).unwrap();
        assert_eq!(settings.stream, "rate:usd");
        assert_eq!(settings.chromium_path, PathBuf::from("/bin/google-chrome-stable"));
        assert_eq!(settings.navigation_timeout, Duration::from_secs(60));
        assert_eq!(settings.log_dir, PathBuf::from("./logs"));
        assert_eq!(settings.screenshot_quality, 50);
        assert!(!settings.development);
    }

    #[test]
    fn flags_win_over_file_values() {
        let overrides = Overrides {
            stream: Some("rate:usd:staging".to_string()),
            ..Default::default()
        };
        let file = FileConfig {
            stream: Some("rate:usd:file".to_string()),
            redis_url: Some("redis://cache:6379".to_string()),
            development: Some(true),
            ..Default::default()
        };
        let settings = Settings::resolve(overrides, file).unwrap();
        assert_eq!(settings.stream, "rate:usd:staging");
        assert_eq!(settings.redis_url, "redis://cache:6379");
        assert!(settings.development);
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let overrides = Overrides {
            screenshot_quality: Some(0),
            ..Default::default()
        };
        let err = Settings::resolve(overrides, FileConfig::default()).unwrap_err();
        assert!(err.to_string().contains("screenshot_quality"));

        let overrides = Overrides {
            stream: Some("  ".to_string()),
            ..Default::default()
        };
        assert!(Settings::resolve(overrides, FileConfig::default()).is_err());

        let overrides = Overrides {
            navigation_timeout_secs: Some(0),
            ..Default::default()
        };
        assert!(Settings::resolve(overrides, FileConfig::default()).is_err());
    }

    #[test]
    fn toml_file_loads_known_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(
            file,
            "redis_url = \"redis://queue:6379/1\"\nnavigation_timeout_secs = 20\nlog_dir = \"/var/log/rates\""
        )
        .unwrap();
        let config = FileConfig::load(file.path()).unwrap();
        assert_eq!(config.redis_url.as_deref(), Some("redis://queue:6379/1"));
        assert_eq!(config.navigation_timeout_secs, Some(20));
        assert_eq!(config.log_dir, Some(PathBuf::from("/var/log/rates")));
    }

    #[test]
    fn toml_file_rejects_unknown_keys() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, "redis_uri = \"redis://queue:6379\"").unwrap();
        assert!(FileConfig::load(file.path()).is_err());
    }

    #[test]
    fn fetch_options_carry_timeout_and_filter() {
        let settings = Settings::default();
        let options = settings.fetch_options();
        assert_eq!(options.timeout, Duration::from_secs(60));
        assert!(options.policy.blocks(crate::scraping::ResourceKind::Script));
        assert_eq!(
            settings.launch_config().idle_timeout,
            Duration::from_secs(90)
        );
    }
}
