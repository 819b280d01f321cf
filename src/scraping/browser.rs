// Headless Chrome page fetcher
//
// Opens one tab per fetch, filters sub-resources at the network layer and
// hands back the rendered markup once DOMContentLoaded has fired. Tabs stay open
// until the session is closed so that failure screenshots can still see them.

use anyhow::{anyhow, Context, Result};
use headless_chrome::browser::tab::{RequestInterceptor, RequestPausedDecision};
use headless_chrome::browser::transport::{SessionId, Transport};
use headless_chrome::protocol::cdp::Fetch::events::RequestPausedEvent;
use headless_chrome::protocol::cdp::Fetch::{FailRequest, RequestPattern, RequestStage};
use headless_chrome::protocol::cdp::Network::{ErrorReason, ResourceType};
use headless_chrome::protocol::cdp::Page::CaptureScreenshotFormatOption;
use headless_chrome::{Browser, LaunchOptions, Tab};
use std::ffi::OsStr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::ScrapeError;

/// Categories of sub-resources a page may request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResourceKind {
    Document,
    Image,
    Font,
    Stylesheet,
    Script,
    Media,
    Other,
}

impl ResourceKind {
    fn from_cdp(resource: &ResourceType) -> Self {
        match resource {
            ResourceType::Document => ResourceKind::Document,
            ResourceType::Image => ResourceKind::Image,
            ResourceType::Font => ResourceKind::Font,
            ResourceType::Stylesheet => ResourceKind::Stylesheet,
            ResourceType::Script => ResourceKind::Script,
            ResourceType::Media => ResourceKind::Media,
            _ => ResourceKind::Other,
        }
    }

    fn to_cdp(self) -> Option<ResourceType> {
        match self {
            ResourceKind::Document => Some(ResourceType::Document),
            ResourceKind::Image => Some(ResourceType::Image),
            ResourceKind::Font => Some(ResourceType::Font),
            ResourceKind::Stylesheet => Some(ResourceType::Stylesheet),
            ResourceKind::Script => Some(ResourceType::Script),
            ResourceKind::Media => Some(ResourceType::Media),
            ResourceKind::Other => None,
        }
    }
}

/// Deny-list of resource kinds aborted before they are fetched
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourcePolicy {
    blocked: Vec<ResourceKind>,
}

impl ResourcePolicy {
    /// Only the structural document is needed to read the rates table
    pub fn structure_only() -> Self {
        Self {
            blocked: vec![
                ResourceKind::Image,
                ResourceKind::Font,
                ResourceKind::Stylesheet,
                ResourceKind::Script,
                ResourceKind::Media,
            ],
        }
    }

    pub fn allow_all() -> Self {
        Self { blocked: Vec::new() }
    }

    pub fn blocks(&self, kind: ResourceKind) -> bool {
        self.blocked.contains(&kind)
    }

    fn fetch_patterns(&self) -> Vec<RequestPattern> {
        self.blocked
            .iter()
            .filter_map(|kind| kind.to_cdp())
            .map(|resource| RequestPattern {
                url_pattern: None,
                resource_Type: Some(resource),
                request_stage: Some(RequestStage::Request),
            })
            .collect()
    }
}

impl Default for ResourcePolicy {
    fn default() -> Self {
        Self::structure_only()
    }
}

/// Per-fetch settings
#[derive(Debug, Clone)]
pub struct FetchOptions {
    pub timeout: Duration,
    pub policy: ResourcePolicy,
}

impl Default for FetchOptions {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(60),
            policy: ResourcePolicy::default(),
        }
    }
}

/// A browser the run can render pages with and photograph on failure
pub trait BrowserSession {
    /// Navigate a new page to `url` and return its markup once the DOM is loaded.
    fn render(&self, url: &str, options: &FetchOptions) -> Result<String>;

    /// One JPEG per open page, in page-open order.
    fn capture_screenshots(&self, quality: u32) -> Vec<Result<Vec<u8>>>;

    /// Close every page and shut the browser down.
    fn close(self) -> Result<()>;
}

/// Launch settings for [`ChromeSession`]
#[derive(Debug, Clone)]
pub struct LaunchConfig {
    pub executable: Option<PathBuf>,
    /// How long the browser may stay silent before headless_chrome gives up on it
    pub idle_timeout: Duration,
}

impl Default for LaunchConfig {
    fn default() -> Self {
        Self {
            executable: None,
            idle_timeout: Duration::from_secs(90),
        }
    }
}

/// Headless Chrome session owned by a single run
pub struct ChromeSession {
    browser: Browser,
}

impl ChromeSession {
    pub fn launch(config: &LaunchConfig) -> Result<Self> {
        let executable = match &config.executable {
            Some(path) if path.exists() => Some(path.clone()),
            Some(path) => {
                warn!(
                    "Browser executable {} not found, falling back to auto-detection",
                    path.display()
                );
                None
            }
            None => None,
        };

        info!("Launching headless Chrome browser");
        let options = LaunchOptions {
            headless: true,
            // Containers usually lack the namespaces the sandbox needs
            sandbox: false,
            path: executable,
            idle_browser_timeout: config.idle_timeout,
            args: vec![
                OsStr::new("--disable-gpu"),
                OsStr::new("--disable-dev-shm-usage"),
            ],
            ..Default::default()
        };

        let browser = Browser::new(options)
            .context("Failed to launch headless Chrome. Is Chrome/Chromium installed?")?;

        Ok(Self { browser })
    }

    fn interceptor(policy: ResourcePolicy) -> Arc<dyn RequestInterceptor + Send + Sync> {
        Arc::new(
            move |_transport: Arc<Transport>,
                  _session_id: SessionId,
                  event: RequestPausedEvent| {
                let kind = ResourceKind::from_cdp(&event.params.resource_Type);
                if policy.blocks(kind) {
                    debug!("Blocking {:?} request {}", kind, event.params.request.url);
                    RequestPausedDecision::Fail(FailRequest {
                        request_id: event.params.request_id,
                        error_reason: ErrorReason::BlockedByClient,
                    })
                } else {
                    RequestPausedDecision::Continue(None)
                }
            },
        )
    }
}

// Reports "blank" until the navigation has committed, then the document's readyState
const READY_STATE_SCRIPT: &str =
    "document.location.href === 'about:blank' ? 'blank' : document.readyState";

const READY_POLL_INTERVAL: Duration = Duration::from_millis(100);

/// DOMContentLoaded has fired once the document leaves the `loading` state
fn dom_loaded(state: &str) -> bool {
    matches!(state, "interactive" | "complete")
}

/// Poll the tab until the DOM of the navigated page is loaded.
///
/// Waits on the DOM milestone only; sub-resources and late network traffic
/// are not awaited. Returns the last observed state on timeout.
fn wait_for_dom(tab: &Tab, timeout: Duration) -> std::result::Result<(), String> {
    let deadline = Instant::now() + timeout;
    let mut state = String::from("unknown");
    loop {
        // Evaluation fails while the old document is being torn down
        match tab.evaluate(READY_STATE_SCRIPT, false) {
            Ok(result) => {
                if let Some(serde_json::Value::String(current)) = result.value {
                    state = current;
                }
            }
            Err(e) => debug!("readyState not available yet: {}", e),
        }
        if dom_loaded(&state) {
            debug!("DOM loaded (readyState {})", state);
            return Ok(());
        }
        if Instant::now() >= deadline {
            return Err(state);
        }
        std::thread::sleep(READY_POLL_INTERVAL);
    }
}

impl BrowserSession for ChromeSession {
    fn render(&self, url: &str, options: &FetchOptions) -> Result<String> {
        info!("Rendering {}", url);

        let tab = self
            .browser
            .new_tab()
            .context("Failed to create new browser tab")?;
        tab.set_default_timeout(options.timeout);

        let patterns = options.policy.fetch_patterns();
        if !patterns.is_empty() {
            tab.enable_fetch(Some(patterns.as_slice()), None)
                .context("Failed to enable request interception")?;
            tab.enable_request_interception(Self::interceptor(options.policy.clone()))
                .context("Failed to install request filter")?;
        }

        tab.navigate_to(url)
            .map_err(|e| ScrapeError::Navigation(format!("{}: {}", url, e)))?;
        wait_for_dom(&tab, options.timeout).map_err(|state| {
            ScrapeError::Navigation(format!(
                "{}: DOM not loaded within {} s (last state {})",
                url,
                options.timeout.as_secs(),
                state
            ))
        })?;

        let html = tab.get_content().context("Failed to get page content")?;
        debug!("Rendered {} bytes from {}", html.len(), url);
        Ok(html)
    }

    fn capture_screenshots(&self, quality: u32) -> Vec<Result<Vec<u8>>> {
        let tabs = match self.browser.get_tabs().lock() {
            Ok(tabs) => tabs.clone(),
            Err(_) => return vec![Err(anyhow!("browser tab list lock poisoned"))],
        };

        tabs.iter()
            .map(|tab| {
                tab.capture_screenshot(
                    CaptureScreenshotFormatOption::Jpeg,
                    Some(quality),
                    None,
                    true,
                )
                .with_context(|| format!("Failed to capture screenshot of {}", tab.get_url()))
            })
            .collect()
    }

    fn close(self) -> Result<()> {
        let tabs = self
            .browser
            .get_tabs()
            .lock()
            .map_err(|_| anyhow!("browser tab list lock poisoned"))?
            .clone();

        for tab in tabs {
            if let Err(e) = tab.close(false) {
                warn!("Failed to close tab {}: {}", tab.get_url(), e);
            }
        }

        // Dropping the handle terminates the Chrome process
        drop(self.browser);
        info!("Browser closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn structure_only_blocks_visual_and_executable_resources() {
        let policy = ResourcePolicy::structure_only();
        for kind in [
            ResourceKind::Image,
            ResourceKind::Font,
            ResourceKind::Stylesheet,
            ResourceKind::Script,
            ResourceKind::Media,
        ] {
            assert!(policy.blocks(kind), "{:?} should be blocked", kind);
        }
        assert!(!policy.blocks(ResourceKind::Document));
        assert!(!policy.blocks(ResourceKind::Other));
    }

    #[test]
    fn fetch_patterns_cover_only_blocked_kinds() {
        let patterns = ResourcePolicy::structure_only().fetch_patterns();
        assert_eq!(patterns.len(), 5);
        assert!(ResourcePolicy::allow_all().fetch_patterns().is_empty());
    }

    #[test]
    fn cdp_resource_types_round_trip() {
        assert_eq!(
            ResourceKind::from_cdp(&ResourceType::Stylesheet),
            ResourceKind::Stylesheet
        );
        assert_eq!(
            ResourceKind::from_cdp(&ResourceType::Manifest),
            ResourceKind::Other
        );
        assert!(ResourceKind::Other.to_cdp().is_none());
    }

    #[test]
    fn dom_counts_as_loaded_once_it_leaves_loading() {
        assert!(dom_loaded("interactive"));
        assert!(dom_loaded("complete"));
        assert!(!dom_loaded("loading"));
        assert!(!dom_loaded("blank"));
        assert!(!dom_loaded("unknown"));
    }

    #[test]
    #[ignore]
    fn chrome_renders_rates_page() {
        let session = ChromeSession::launch(&LaunchConfig::default()).unwrap();
        let html = session
            .render(crate::scraping::BANKS_USD_URL, &FetchOptions::default())
            .unwrap();
        assert!(html.contains("smTable"));
        session.close().unwrap();
    }
}
