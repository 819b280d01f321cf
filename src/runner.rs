//! Run orchestration: fetch, parse, publish, and clean up
//!
//! One run launches a browser, renders the rates page, parses it and appends
//! the whole batch to the stream. Any failure after launch is handled at one
//! boundary: it is logged, every open page is photographed, and the run
//! continues to cleanup. The browser is closed on every path once launched.
//! Nothing is retried.
//!
//! Browser calls block for up to the navigation timeout, so they run on the
//! blocking thread pool rather than on the async executor.

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn, Span};

use crate::config::Settings;
use crate::diagnostics::ScreenshotWriter;
use crate::error::ScrapeError;
use crate::queue::RateSink;
use crate::scraping::{parse_bank_rates, BrowserSession, FetchOptions};

/// States a run moves through
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Starting,
    Fetching,
    Publishing,
    Succeeded,
    Capturing,
    Closed,
}

/// Stage at which a run failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Launch,
    Fetch,
    Parse,
    Publish,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Launch => "launch",
            Stage::Fetch => "fetch",
            Stage::Parse => "parse",
            Stage::Publish => "publish",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunOutcome {
    Succeeded { published: usize },
    Failed { stage: Stage, error: String },
}

#[derive(Debug, Clone)]
pub struct RunReport {
    pub outcome: RunOutcome,
    pub screenshots: Vec<PathBuf>,
    pub duration: Duration,
}

impl RunReport {
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, RunOutcome::Succeeded { .. })
    }
}

/// What a single run needs to know
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub target_url: String,
    pub stream: String,
    pub fetch: FetchOptions,
    pub publish_timeout: Duration,
    pub screenshot_quality: u32,
}

impl From<&Settings> for RunOptions {
    fn from(settings: &Settings) -> Self {
        Self {
            target_url: settings.target_url.clone(),
            stream: settings.stream.clone(),
            fetch: settings.fetch_options(),
            publish_timeout: settings.publish_timeout,
            screenshot_quality: settings.screenshot_quality,
        }
    }
}

struct StageFailure {
    stage: Stage,
    error: anyhow::Error,
}

impl StageFailure {
    fn at(stage: Stage) -> impl FnOnce(anyhow::Error) -> Self {
        move |error| Self { stage, error }
    }
}

fn enter(state: RunState) {
    debug!(?state, "Run state");
}

/// Run blocking work on the blocking thread pool, inside the caller's span
async fn blocking<T, F>(what: &str, work: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T> + Send + 'static,
{
    let span = Span::current();
    tokio::task::spawn_blocking(move || span.in_scope(work))
        .await
        .map_err(|err| anyhow!("{} task failed: {}", what, err))?
}

async fn on_browser<B, T, F>(browser: &Arc<B>, work: F) -> Result<T>
where
    B: BrowserSession + Send + Sync + 'static,
    T: Send + 'static,
    F: FnOnce(&B) -> Result<T> + Send + 'static,
{
    let browser = Arc::clone(browser);
    blocking("browser", move || work(&browser)).await
}

/// Execute one run with a browser produced by `launch`.
///
/// The queue connection in `sink` is borrowed; closing it is up to the caller.
pub async fn run<B, S, L>(
    launch: L,
    sink: &mut S,
    options: &RunOptions,
    screenshots: &ScreenshotWriter,
) -> RunReport
where
    B: BrowserSession + Send + Sync + 'static,
    S: RateSink,
    L: FnOnce() -> Result<B> + Send + 'static,
{
    let started = Instant::now();
    enter(RunState::Starting);

    let browser = match blocking("browser launch", launch).await {
        Ok(browser) => Arc::new(browser),
        Err(err) => {
            error!(stage = "launch", "Failed to start browser: {:#}", err);
            let duration = started.elapsed();
            info!("Done in: {} ms", duration.as_millis());
            return RunReport {
                outcome: RunOutcome::Failed {
                    stage: Stage::Launch,
                    error: format!("{:#}", err),
                },
                screenshots: Vec::new(),
                duration,
            };
        }
    };

    let (outcome, saved) = match scrape_and_publish(&browser, sink, options).await {
        Ok(published) => {
            enter(RunState::Succeeded);
            info!("Published {} bank rate(s) to {}", published, options.stream);
            (RunOutcome::Succeeded { published }, Vec::new())
        }
        Err(failure) => {
            error!(
                stage = failure.stage.as_str(),
                "Run failed: {:#}", failure.error
            );
            enter(RunState::Capturing);
            let quality = options.screenshot_quality;
            let writer = screenshots.clone();
            let saved = on_browser(&browser, move |browser| {
                Ok(capture_open_pages(browser, quality, &writer))
            })
            .await
            .unwrap_or_else(|err| {
                warn!("Screenshot capture aborted: {:#}", err);
                Vec::new()
            });
            (
                RunOutcome::Failed {
                    stage: failure.stage,
                    error: format!("{:#}", failure.error),
                },
                saved,
            )
        }
    };

    close_browser(browser).await;
    enter(RunState::Closed);

    let duration = started.elapsed();
    info!("Done in: {} ms", duration.as_millis());

    RunReport {
        outcome,
        screenshots: saved,
        duration,
    }
}

async fn close_browser<B>(browser: Arc<B>)
where
    B: BrowserSession + Send + Sync + 'static,
{
    // Every blocking task holding a clone has finished by now
    let browser = match Arc::try_unwrap(browser) {
        Ok(browser) => browser,
        Err(_) => {
            warn!("Browser still in use, leaving it to shut down on drop");
            return;
        }
    };
    if let Err(err) = blocking("browser close", move || browser.close()).await {
        warn!("Failed to close browser cleanly: {:#}", err);
    }
}

async fn scrape_and_publish<B, S>(
    browser: &Arc<B>,
    sink: &mut S,
    options: &RunOptions,
) -> std::result::Result<usize, StageFailure>
where
    B: BrowserSession + Send + Sync + 'static,
    S: RateSink,
{
    enter(RunState::Fetching);
    let url = options.target_url.clone();
    let fetch = options.fetch.clone();
    let html = on_browser(browser, move |browser| browser.render(&url, &fetch))
        .await
        .map_err(StageFailure::at(Stage::Fetch))?;
    let rates =
        parse_bank_rates(&html, &options.target_url).map_err(StageFailure::at(Stage::Parse))?;
    info!("Successfully scraped {} bank rate(s)", rates.len());

    if rates.is_empty() {
        warn!("Rates table was empty, nothing published");
        return Ok(0);
    }

    enter(RunState::Publishing);
    let published = tokio::time::timeout(
        options.publish_timeout,
        sink.publish_batch(&options.stream, &rates),
    )
    .await;
    let ids = match published {
        Ok(result) => result,
        Err(_) => {
            let millis = options.publish_timeout.as_millis() as u64;
            Err(ScrapeError::PublishTimeout(millis).into())
        }
    }
    .map_err(StageFailure::at(Stage::Publish))?;

    Ok(ids.len())
}

/// Photograph every open page, one at a time, in page-open order.
///
/// A page that cannot be captured or written is logged and skipped so the
/// run still reaches cleanup.
fn capture_open_pages<B: BrowserSession>(
    browser: &B,
    quality: u32,
    writer: &ScreenshotWriter,
) -> Vec<PathBuf> {
    let mut saved = Vec::new();
    for (idx, shot) in browser.capture_screenshots(quality).into_iter().enumerate() {
        match shot.and_then(|jpeg| writer.write(&jpeg)) {
            Ok(path) => saved.push(path),
            Err(err) => warn!("Screenshot of page {} failed: {:#}", idx, err),
        }
    }
    info!(
        "{} screenshot(s) taken in {}",
        saved.len(),
        writer.dir().display()
    );
    saved
}
