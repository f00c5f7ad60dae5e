//! Pooled, guarded page fetching on top of a [`BrowserEngine`].
//!
//! The fetcher owns the browser concurrency semaphore, applies the per-fetch
//! timeout, classifies HTTP statuses into transient/permanent failures, and
//! rejects URLs that must never be fetched (non-HTTP schemes, private IPs).

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};
use url::Url;

use sitegist_shared::{Config, Result, SitegistError};

use crate::engine::{BrowserEngine, RenderOptions, RenderedPage};

// ---------------------------------------------------------------------------
// Fetcher
// ---------------------------------------------------------------------------

/// Shared fetch front-end: one instance per process, cloned-by-Arc into
/// every orchestrator worker.
pub struct Fetcher {
    engine: Arc<dyn BrowserEngine>,
    semaphore: Arc<Semaphore>,
    timeout: Duration,
    options: RenderOptions,
    /// Allow localhost/private IPs (for tests with mock servers).
    allow_localhost: bool,
}

impl Fetcher {
    /// Create a fetcher with the pool size, timeout, and wait strategy
    /// taken from `config`.
    pub fn new(engine: Arc<dyn BrowserEngine>, config: &Config) -> Self {
        Self {
            engine,
            semaphore: Arc::new(Semaphore::new(config.max_concurrent_browsers)),
            timeout: Duration::from_secs(config.browser_timeout),
            options: RenderOptions {
                wait_for: config.browser_wait_for,
                ..RenderOptions::default()
            },
            allow_localhost: false,
        }
    }

    /// Allow fetching localhost/private IPs (for integration tests).
    pub fn allow_localhost(mut self) -> Self {
        self.allow_localhost = true;
        self
    }

    /// Validate that a URL is fetchable: http(s), has a host, and does not
    /// target loopback or private address space.
    pub fn validate_url(&self, url: &Url) -> Result<()> {
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(SitegistError::invalid_url(format!(
                "scheme must be http or https: {url}"
            )));
        }
        if url.host_str().is_none() {
            return Err(SitegistError::invalid_url(format!("URL has no host: {url}")));
        }
        if !self.allow_localhost && is_private_target(url) {
            return Err(SitegistError::invalid_url(format!(
                "refusing to fetch private or loopback target: {url}"
            )));
        }
        Ok(())
    }

    /// Fetch a single page: acquire a pool permit, render with the per-fetch
    /// timeout, and classify the response status.
    #[instrument(skip_all, fields(url = %url, engine = self.engine.name()))]
    pub async fn fetch(&self, url: &Url) -> Result<RenderedPage> {
        self.validate_url(url)?;

        let _permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| SitegistError::Cancelled)?;

        debug!("fetching page");

        let rendered = tokio::time::timeout(self.timeout, self.engine.render(url, &self.options))
            .await
            .map_err(|_| {
                SitegistError::fetch_transient(format!(
                    "{url}: timed out after {}s",
                    self.timeout.as_secs()
                ))
            })??;

        match rendered.status {
            200..=299 => Ok(rendered),
            408 | 429 | 500..=599 => {
                warn!(status = rendered.status, "transient HTTP failure");
                Err(SitegistError::fetch_transient(format!(
                    "{url}: HTTP {}",
                    rendered.status
                )))
            }
            status => {
                warn!(status, "permanent HTTP failure");
                Err(SitegistError::fetch_permanent(format!(
                    "{url}: HTTP {status}"
                )))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Private-target guard
// ---------------------------------------------------------------------------

/// Check if a URL targets loopback, private, or otherwise reserved space.
fn is_private_target(url: &Url) -> bool {
    let Some(host) = url.host_str() else {
        return true;
    };

    if let Ok(ip) = host.trim_matches(['[', ']']).parse::<IpAddr>() {
        return is_reserved_ip(&ip);
    }

    host == "localhost" || host.ends_with(".local") || host.ends_with(".internal")
}

/// Non-routable or reserved address space: loopback, RFC 1918, link-local,
/// carrier-grade NAT, protocol-assignment blocks, and their IPv6 cousins.
fn is_reserved_ip(ip: &IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => {
            let [a, b, ..] = v4.octets();
            match a {
                0 | 10 | 127 => true,
                100 => (64..128).contains(&b),
                169 => b == 254,
                172 => (16..32).contains(&b),
                192 => b == 0 || b == 168,
                _ => v4.is_broadcast(),
            }
        }
        IpAddr::V6(v6) => {
            // Unique-local addresses are fc00::/7.
            v6.is_loopback() || v6.is_unspecified() || (v6.segments()[0] & 0xfe00) == 0xfc00
        }
    }
}
