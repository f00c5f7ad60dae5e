//! Session orchestration: discovery, bounded fetch workers, and the
//! per-page normalize → chunk → embed pipeline.
//!
//! Failure isolation is per page: a fetch or normalize error is logged and
//! counted, never fatal. A session fails only when nothing at all was
//! scraped, the vector store goes away, or cancellation is requested.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex, Semaphore};
use tracing::{info, instrument, warn};
use url::Url;

use sitegist_browser::Fetcher;
use sitegist_discovery::{canonicalize, DiscoveredUrls, DiscoveryOptions};
use sitegist_markdown::{chunk_markdown, normalize, ChunkOptions, NormalizeOptions};
use sitegist_shared::{
    domain_of, page_name_from_url, Config, PageRecord, Result, ScrapeMode, ScrapeRequest,
    SessionStatus, SitegistError,
};
use sitegist_vector::VectorStore;

use crate::events::{EventBus, EventPayload};
use crate::session::SessionManager;
use crate::storage::{CleanedMarkdownFile, CleanedPage, SessionStorage};

// ---------------------------------------------------------------------------
// Discovery capability
// ---------------------------------------------------------------------------

/// URL discovery for whole-site sessions. The default implementation walks
/// robots.txt and sitemaps; tests inject fixed URL lists.
#[async_trait]
pub trait UrlDiscoverer: Send + Sync {
    async fn discover(&self, seed: &Url) -> Result<DiscoveredUrls>;
}

/// The sitemap-backed discoverer.
pub struct SitemapDiscoverer {
    options: DiscoveryOptions,
}

impl SitemapDiscoverer {
    pub fn new(config: &Config) -> Self {
        Self {
            options: DiscoveryOptions {
                timeout_secs: config.default_timeout,
                max_pages: config.max_pages_per_site,
            },
        }
    }
}

#[async_trait]
impl UrlDiscoverer for SitemapDiscoverer {
    async fn discover(&self, seed: &Url) -> Result<DiscoveredUrls> {
        sitegist_discovery::discover(seed, &self.options).await
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Runs one scrape session end to end.
pub struct Orchestrator {
    config: Config,
    fetcher: Arc<Fetcher>,
    discoverer: Arc<dyn UrlDiscoverer>,
    store: Arc<VectorStore>,
    sessions: Arc<SessionManager>,
    storage: Arc<SessionStorage>,
    normalize_opts: NormalizeOptions,
    chunk_opts: ChunkOptions,
    /// Bounds outstanding embed/insert calls across all workers.
    extraction: Arc<Semaphore>,
}

impl Orchestrator {
    pub fn new(
        config: Config,
        fetcher: Arc<Fetcher>,
        discoverer: Arc<dyn UrlDiscoverer>,
        store: Arc<VectorStore>,
        sessions: Arc<SessionManager>,
        storage: Arc<SessionStorage>,
    ) -> Self {
        let chunk_opts = ChunkOptions::new(config.chunk_char_limit, config.chunk_overlap);
        let extraction = Arc::new(Semaphore::new(config.max_concurrent_extractions));
        Self {
            config,
            fetcher,
            discoverer,
            store,
            sessions,
            storage,
            normalize_opts: NormalizeOptions::default(),
            chunk_opts,
            extraction,
        }
    }

    /// Execute a session to its terminal state. The session must already
    /// exist in `pending`; this is the only task that mutates it.
    #[instrument(skip_all, fields(session_id = %session_id, url = %request.url))]
    pub async fn execute(
        &self,
        session_id: &str,
        request: &ScrapeRequest,
        bus: &EventBus,
        cancel: watch::Receiver<bool>,
    ) -> Result<()> {
        bus.emit(EventPayload::SessionCreated {
            status: SessionStatus::Pending,
        });

        let seed = match Url::parse(&request.url) {
            Ok(url) => url,
            Err(e) => {
                return self
                    .fail(session_id, format!("invalid url: {e}"), bus)
                    .await
            }
        };

        self.sessions
            .update_status(session_id, SessionStatus::InProgress, None)
            .await?;
        bus.emit(EventPayload::StatusChanged {
            status: SessionStatus::InProgress,
        });

        // Step 1: discovery (whole-site) or the seed alone (single-page).
        let (urls, warning) = match request.mode {
            ScrapeMode::SinglePage => {
                let canonical =
                    Url::parse(&canonicalize(&seed)).unwrap_or_else(|_| seed.clone());
                (vec![canonical], None)
            }
            ScrapeMode::WholeSite => match self.discoverer.discover(&seed).await {
                Ok(DiscoveredUrls { urls, warning }) => (urls, warning),
                Err(e) => {
                    return self
                        .fail(session_id, format!("discovery failed: {e}"), bus)
                        .await
                }
            },
        };

        if is_cancelled(&cancel) {
            return self.fail(session_id, "cancelled", bus).await;
        }
        if urls.is_empty() {
            return self
                .fail(session_id, "no URLs discovered for this site", bus)
                .await;
        }

        // total_pages is set before the first page counter moves.
        self.sessions
            .set_total_pages(session_id, urls.len() as u64)
            .await?;
        bus.emit(EventPayload::UrlsDiscovered {
            count: urls.len(),
            warning,
        });

        let domain = domain_of(&seed)?;
        info!(total = urls.len(), %domain, "starting fetch workers");

        // Step 2: bounded fetch workers over a shared queue.
        let worker_count = self.config.max_concurrent_browsers.min(urls.len()).max(1);
        let ctx = WorkerCtx {
            session_id: session_id.to_string(),
            site_name: domain.clone(),
            total_pages: urls.len() as u64,
            fetcher: Arc::clone(&self.fetcher),
            store: Arc::clone(&self.store),
            sessions: Arc::clone(&self.sessions),
            bus: bus.clone(),
            queue: Arc::new(Mutex::new(urls.into_iter().collect())),
            cleaned: Arc::new(Mutex::new(Vec::new())),
            store_down: Arc::new(Mutex::new(None)),
            cancel: cancel.clone(),
            extraction: Arc::clone(&self.extraction),
            normalize_opts: self.normalize_opts.clone(),
            chunk_opts: self.chunk_opts.clone(),
        };

        let handles: Vec<_> = (0..worker_count)
            .map(|_| tokio::spawn(worker_loop(ctx.clone())))
            .collect();
        for handle in handles {
            let _ = handle.await;
        }

        // Step 3: terminal transition.
        if is_cancelled(&cancel) {
            return self.fail(session_id, "cancelled", bus).await;
        }
        if let Some(message) = ctx.store_down.lock().await.take() {
            return self
                .fail(session_id, format!("vector store unavailable: {message}"), bus)
                .await;
        }

        let metadata = self.sessions.get_metadata(session_id).await?;
        if metadata.pages_scraped == 0 {
            return self
                .fail(session_id, "failed to scrape any pages", bus)
                .await;
        }

        let pages = std::mem::take(&mut *ctx.cleaned.lock().await);
        self.storage.save_cleaned_markdown(
            session_id,
            &CleanedMarkdownFile {
                website: domain.clone(),
                site_name: domain,
                pages,
            },
        )?;

        let metadata = self
            .sessions
            .update_status(session_id, SessionStatus::Completed, None)
            .await?;
        bus.emit(EventPayload::Completed {
            pages_scraped: metadata.pages_scraped,
            failures: metadata.failures,
            total_pages: metadata.total_pages,
            duration_seconds: metadata.duration_seconds.unwrap_or_default(),
        });

        info!(
            pages_scraped = metadata.pages_scraped,
            failures = metadata.failures,
            "session completed"
        );
        Ok(())
    }

    /// Mark the session failed and emit the terminal event.
    async fn fail(
        &self,
        session_id: &str,
        message: impl Into<String>,
        bus: &EventBus,
    ) -> Result<()> {
        let message = message.into();
        warn!(%message, "session failed");
        self.sessions
            .update_status(session_id, SessionStatus::Failed, Some(message.clone()))
            .await?;
        bus.emit(EventPayload::Failed { error: message });
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Workers
// ---------------------------------------------------------------------------

/// Everything a fetch worker needs, cheap to clone per worker.
#[derive(Clone)]
struct WorkerCtx {
    session_id: String,
    site_name: String,
    total_pages: u64,
    fetcher: Arc<Fetcher>,
    store: Arc<VectorStore>,
    sessions: Arc<SessionManager>,
    bus: EventBus,
    queue: Arc<Mutex<VecDeque<Url>>>,
    cleaned: Arc<Mutex<Vec<CleanedPage>>>,
    /// First vector-store failure message; set once, stops all workers.
    store_down: Arc<Mutex<Option<String>>>,
    cancel: watch::Receiver<bool>,
    extraction: Arc<Semaphore>,
    normalize_opts: NormalizeOptions,
    chunk_opts: ChunkOptions,
}

/// Drain the queue until it's empty, cancellation fires, or the store dies.
async fn worker_loop(ctx: WorkerCtx) {
    loop {
        if is_cancelled(&ctx.cancel) || ctx.store_down.lock().await.is_some() {
            return;
        }

        let Some(url) = ctx.queue.lock().await.pop_front() else {
            return;
        };

        // Cancellation aborts the in-flight page at the next suspension
        // point; a half-processed page is counted as nothing.
        let outcome = tokio::select! {
            _ = wait_cancelled(ctx.cancel.clone()) => return,
            result = process_page(&ctx, &url) => result,
        };

        match outcome {
            Ok(page) => {
                ctx.cleaned.lock().await.push(page);
                if let Ok(meta) = ctx.sessions.record_page_result(&ctx.session_id, true).await {
                    ctx.bus.emit(EventPayload::PageScraped {
                        url: url.to_string(),
                        pages_scraped: meta.pages_scraped,
                        total_pages: ctx.total_pages,
                    });
                }
            }
            Err(SitegistError::VectorStore(message)) => {
                warn!(%url, %message, "vector store unavailable, aborting session");
                *ctx.store_down.lock().await = Some(message);
                return;
            }
            Err(e) => {
                warn!(%url, error = %e, "page failed");
                let _ = ctx.sessions.record_page_result(&ctx.session_id, false).await;
                ctx.bus.emit(EventPayload::PageFailed {
                    url: url.to_string(),
                    error: e.to_string(),
                });
            }
        }
    }
}

/// Fetch → normalize → chunk → embed one page.
async fn process_page(ctx: &WorkerCtx, url: &Url) -> Result<CleanedPage> {
    let rendered = ctx.fetcher.fetch(url).await?;
    let normalized = normalize(&rendered.html, &ctx.normalize_opts)?;

    let record = PageRecord::new(url, &normalized.title, &normalized.markdown)?;
    let chunks = chunk_markdown(&record.markdown, &ctx.chunk_opts);
    if chunks.is_empty() {
        return Err(SitegistError::normalize("page produced no usable content"));
    }

    let page_name = page_name_from_url(url);

    // Embed/insert behind the extraction semaphore so fetches can run
    // ahead of embedding without flooding the embedder.
    let _permit = ctx
        .extraction
        .acquire()
        .await
        .map_err(|_| SitegistError::Cancelled)?;
    ctx.store
        .upsert_chunks(
            &record.domain,
            &ctx.site_name,
            &page_name,
            record.url.as_str(),
            &chunks,
        )
        .await?;

    Ok(CleanedPage {
        page_name,
        page_url: record.url,
        content: record.markdown,
    })
}

/// Non-blocking cancellation check.
fn is_cancelled(cancel: &watch::Receiver<bool>) -> bool {
    *cancel.borrow()
}

/// Resolve when cancellation is signalled (or the sender is gone).
async fn wait_cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow() {
            return;
        }
        if cancel.changed().await.is_err() {
            // Sender dropped without cancelling; never resolve spuriously.
            std::future::pending::<()>().await;
        }
    }
}
