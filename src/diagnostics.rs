//! Failure screenshots
//!
//! Screenshots are named after the capture time in Unix milliseconds
//! (`1705312800000.jpeg`). Captures landing in the same millisecond get a
//! numeric suffix instead of overwriting each other.

use anyhow::Result;
use chrono::Utc;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::ScrapeError;

/// Writes JPEG screenshots into a diagnostics directory
#[derive(Debug, Clone)]
pub struct ScreenshotWriter {
    dir: PathBuf,
}

impl ScreenshotWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Write one screenshot, returning the path it landed at
    pub fn write(&self, jpeg: &[u8]) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            ScrapeError::Diagnostics(format!("create {}: {}", self.dir.display(), e))
        })?;

        let path = self.free_path(Utc::now().timestamp_millis());
        fs::write(&path, jpeg)
            .map_err(|e| ScrapeError::Diagnostics(format!("write {}: {}", path.display(), e)))?;
        info!("Saved screenshot {} ({} bytes)", path.display(), jpeg.len());
        Ok(path)
    }

    fn free_path(&self, millis: i64) -> PathBuf {
        let base = self.dir.join(format!("{}.jpeg", millis));
        if !base.exists() {
            return base;
        }
        (1..)
            .map(|n| self.dir.join(format!("{}-{}.jpeg", millis, n)))
            .find(|candidate| !candidate.exists())
            .unwrap_or(base)
    }
}
