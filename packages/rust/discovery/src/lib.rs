//! Sitemap-driven URL discovery for whole-site scrapes.
//!
//! Discovery order: `robots.txt` `Sitemap:` directives first, then the
//! conventional `/sitemap.xml` location. Sitemap indexes are walked to a
//! bounded depth. A site with no usable sitemap is not an error: the caller
//! gets the seed URL back with a warning and can still scrape that one page.

mod parser;

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use reqwest::Client;
use tracing::{debug, info, instrument, warn};
use url::Url;

use sitegist_shared::{Result, SitegistError};

pub use parser::{canonicalize, parse_sitemap, sitemaps_from_robots, SitemapFile};

/// Maximum redirects to follow when fetching robots/sitemaps.
const MAX_REDIRECTS: usize = 3;

/// Maximum sitemap-index recursion depth.
const MAX_SITEMAP_DEPTH: usize = 3;

/// User-Agent string for discovery requests.
const USER_AGENT: &str = concat!("sitegist/", env!("CARGO_PKG_VERSION"));

// ---------------------------------------------------------------------------
// Options / result
// ---------------------------------------------------------------------------

/// Configuration for a discovery run.
#[derive(Debug, Clone)]
pub struct DiscoveryOptions {
    /// Timeout for each HTTP request, in seconds.
    pub timeout_secs: u64,
    /// Truncation limit for the discovered URL list.
    pub max_pages: usize,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_pages: 1000,
        }
    }
}

/// Outcome of discovery: an ordered, deduplicated URL list.
#[derive(Debug, Clone)]
pub struct DiscoveredUrls {
    /// Same-domain content URLs in sitemap order, truncated to `max_pages`.
    pub urls: Vec<Url>,
    /// Set when discovery fell back to the seed URL only.
    pub warning: Option<String>,
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Discover the URL set to scrape for the site containing `seed`.
///
/// Never fails on missing or malformed robots/sitemaps; the worst outcome is
/// `[seed]` plus a warning. The only hard error is a seed URL without a host.
#[instrument(skip_all, fields(seed = %seed))]
pub async fn discover(seed: &Url, opts: &DiscoveryOptions) -> Result<DiscoveredUrls> {
    let host = seed
        .host_str()
        .ok_or_else(|| SitegistError::invalid_url(format!("URL has no host: {seed}")))?
        .to_ascii_lowercase();
    let origin = origin_url(seed)?;

    let client = build_client(opts)?;

    // Priority 1: robots.txt Sitemap: directives.
    let robots_url = format!("{origin}/robots.txt");
    let mut sitemap_urls = match fetch_text(&client, &robots_url).await {
        Some(robots) => sitemaps_from_robots(&robots),
        None => {
            debug!(%robots_url, "no robots.txt");
            Vec::new()
        }
    };

    // Priority 2: the conventional location.
    if sitemap_urls.is_empty() {
        sitemap_urls.push(format!("{origin}/sitemap.xml"));
    }

    info!(sitemaps = sitemap_urls.len(), "fetching sitemaps");

    // Walk sitemaps, expanding indexes breadth-first up to the depth cap.
    let mut content_urls: Vec<String> = Vec::new();
    let mut queue: VecDeque<(String, usize)> =
        sitemap_urls.into_iter().map(|u| (u, 0)).collect();

    while let Some((sitemap_url, depth)) = queue.pop_front() {
        let Some(xml) = fetch_text(&client, &sitemap_url).await else {
            warn!(%sitemap_url, "failed to fetch sitemap");
            continue;
        };

        match parse_sitemap(&xml) {
            SitemapFile::UrlSet(urls) => {
                debug!(%sitemap_url, count = urls.len(), "parsed urlset");
                content_urls.extend(urls);
            }
            SitemapFile::Index(children) => {
                if depth + 1 >= MAX_SITEMAP_DEPTH {
                    warn!(%sitemap_url, "sitemap index depth cap reached");
                    continue;
                }
                info!(%sitemap_url, children = children.len(), "expanding sitemap index");
                for child in children {
                    queue.push_back((child, depth + 1));
                }
            }
        }
    }

    // Same-domain filter, canonical dedup (order-preserving), truncation.
    let mut seen: HashSet<String> = HashSet::new();
    let mut urls: Vec<Url> = Vec::new();
    for raw in content_urls {
        let Ok(url) = Url::parse(&raw) else {
            continue;
        };
        if url.host_str().map(str::to_ascii_lowercase).as_deref() != Some(host.as_str()) {
            continue;
        }
        let canonical = canonicalize(&url);
        if seen.insert(canonical.clone()) {
            if let Ok(url) = Url::parse(&canonical) {
                urls.push(url);
            }
        }
        if urls.len() >= opts.max_pages {
            break;
        }
    }

    if urls.is_empty() {
        let warning = format!("no sitemap URLs discovered for {host}, using the seed URL only");
        warn!(%warning);
        let seed_canonical =
            Url::parse(&canonicalize(seed)).unwrap_or_else(|_| seed.clone());
        return Ok(DiscoveredUrls {
            urls: vec![seed_canonical],
            warning: Some(warning),
        });
    }

    info!(count = urls.len(), "discovery complete");
    Ok(DiscoveredUrls {
        urls,
        warning: None,
    })
}

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

/// Extract the origin (scheme + host + port) from a URL.
fn origin_url(url: &Url) -> Result<String> {
    let scheme = url.scheme();
    let host = url
        .host_str()
        .ok_or_else(|| SitegistError::invalid_url(format!("URL has no host: {url}")))?;

    match url.port() {
        Some(port) => Ok(format!("{scheme}://{host}:{port}")),
        None => Ok(format!("{scheme}://{host}")),
    }
}

/// Build a reqwest client with appropriate settings.
fn build_client(opts: &DiscoveryOptions) -> Result<Client> {
    Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
        .timeout(Duration::from_secs(opts.timeout_secs))
        .build()
        .map_err(|e| SitegistError::fetch_permanent(format!("failed to build HTTP client: {e}")))
}

/// Fetch a URL as text; any failure (network, non-2xx) yields `None`.
async fn fetch_text(client: &Client, url: &str) -> Option<String> {
    let response = client.get(url).send().await.ok()?;
    if !response.status().is_success() {
        return None;
    }
    response.text().await.ok()
}
