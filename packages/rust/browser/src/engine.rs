//! Browser engine capability and the built-in HTTP engine.
//!
//! A [`BrowserEngine`] turns a URL into rendered HTML. Real deployments
//! inject a headless-browser implementation; [`HttpEngine`] is the
//! in-process default for static sites and tests (no JavaScript execution).

use async_trait::async_trait;
use url::Url;

use sitegist_shared::{Result, SitegistError, WaitFor};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("sitegist/", env!("CARGO_PKG_VERSION"));

/// Maximum redirects followed per fetch.
const MAX_REDIRECTS: usize = 5;

// ---------------------------------------------------------------------------
// Render contract
// ---------------------------------------------------------------------------

/// Deterministic scroll-to-bottom policy applied before reading the DOM,
/// to trigger lazy-loaded content. The page is scrolled in fixed increments
/// to the document end, then back to the top.
#[derive(Debug, Clone, Copy)]
pub struct ScrollPolicy {
    /// Pixels per scroll step.
    pub increment_px: u32,
    /// Pause between steps, giving lazy loaders time to fire.
    pub pause_ms: u64,
}

impl Default for ScrollPolicy {
    fn default() -> Self {
        Self {
            increment_px: 800,
            pause_ms: 250,
        }
    }
}

/// Options passed to every render call.
#[derive(Debug, Clone, Copy, Default)]
pub struct RenderOptions {
    /// Wait strategy before the DOM is considered settled.
    pub wait_for: WaitFor,
    /// Scroll policy for lazy-loaded content.
    pub scroll: ScrollPolicy,
}

/// The result of rendering a page.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    /// Fully rendered HTML.
    pub html: String,
    /// URL after redirects.
    pub final_url: Url,
    /// HTTP status of the final response.
    pub status: u16,
}

/// Capability interface for rendering a URL into HTML.
///
/// Implementations must be safe for concurrent invocation; the caller
/// bounds concurrency with its own pool.
#[async_trait]
pub trait BrowserEngine: Send + Sync {
    /// Render `url` and return the settled DOM as HTML.
    ///
    /// Network-level failures map to transient fetch errors, everything
    /// else (bad responses, navigation aborts) to permanent ones. Status
    /// classification is the caller's job.
    async fn render(&self, url: &Url, opts: &RenderOptions) -> Result<RenderedPage>;

    /// Engine name for tracing.
    fn name(&self) -> &str;
}

// ---------------------------------------------------------------------------
// HttpEngine
// ---------------------------------------------------------------------------

/// Plain HTTP engine backed by `reqwest`. Returns the server's HTML as-is;
/// the scroll policy is a no-op since nothing executes JavaScript.
pub struct HttpEngine {
    client: reqwest::Client,
}

impl HttpEngine {
    /// Build an engine with the standard client settings.
    pub fn new() -> Result<Self> {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .build()
            .map_err(|e| {
                SitegistError::fetch_permanent(format!("failed to build HTTP client: {e}"))
            })?;
        Ok(Self { client })
    }
}

#[async_trait]
impl BrowserEngine for HttpEngine {
    async fn render(&self, url: &Url, _opts: &RenderOptions) -> Result<RenderedPage> {
        let response = self.client.get(url.as_str()).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                SitegistError::fetch_transient(format!("{url}: {e}"))
            } else {
                SitegistError::fetch_permanent(format!("{url}: {e}"))
            }
        })?;

        let status = response.status().as_u16();
        let final_url = response.url().clone();

        let html = response
            .text()
            .await
            .map_err(|e| SitegistError::fetch_transient(format!("{url}: body read failed: {e}")))?;

        Ok(RenderedPage {
            html,
            final_url,
            status,
        })
    }

    fn name(&self) -> &str {
        "http"
    }
}
