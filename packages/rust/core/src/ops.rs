//! The composition root and in-process operation surface.
//!
//! [`Sitegist`] owns every injected capability and exposes the pipeline as
//! plain async methods: session lifecycle, embedding, search, and Q&A.
//! Transport bindings (HTTP, WebSocket) are thin glue over these calls and
//! live out of tree.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, watch, Mutex};
use tracing::{error, info, instrument};
use url::Url;

use sitegist_browser::{BrowserEngine, Fetcher};
use sitegist_markdown::{chunk_markdown, ChunkOptions};
use sitegist_shared::{
    Config, Hit, Result, ScrapeRequest, SessionMetadata, SessionStatus, SitegistError,
};
use sitegist_vector::{
    ChatMessage, Embedder, Llm, Reranker, VectorStore, VectorStoreBackend,
};

use crate::events::{EventBus, EventPayload, SessionEvent};
use crate::orchestrator::{Orchestrator, SitemapDiscoverer, UrlDiscoverer};
use crate::query::{Answer, QueryPipeline};
use crate::session::SessionManager;
use crate::storage::SessionStorage;

/// Hard ceiling on `top_k` for search and ask.
const MAX_TOP_K: usize = 50;

// ---------------------------------------------------------------------------
// Wiring
// ---------------------------------------------------------------------------

/// The injected capabilities the pipeline consumes. Tests substitute fakes;
/// deployments wire real providers.
pub struct Capabilities {
    pub engine: Arc<dyn BrowserEngine>,
    pub embedder: Arc<dyn Embedder>,
    pub backend: Arc<dyn VectorStoreBackend>,
    pub llm: Arc<dyn Llm>,
    pub reranker: Option<Arc<dyn Reranker>>,
    /// Defaults to the sitemap discoverer when `None`.
    pub discoverer: Option<Arc<dyn UrlDiscoverer>>,
}

// ---------------------------------------------------------------------------
// Operation payloads
// ---------------------------------------------------------------------------

/// Returned by `start_session`.
#[derive(Debug, Clone, Serialize)]
pub struct StartedSession {
    pub session_id: String,
    pub status: SessionStatus,
}

/// Input for `embed_session`: one of the two selectors must be set.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct EmbedRequest {
    pub session_id: Option<String>,
    pub filename: Option<String>,
}

/// Returned by `embed_session`.
#[derive(Debug, Clone, Serialize)]
pub struct EmbedOutcome {
    pub total_pages: usize,
    pub total_chunks: usize,
    pub status: String,
}

/// Returned by `search`.
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub query: String,
    pub results: Vec<Hit>,
    pub total_results: usize,
}

/// Returned by `health`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub ok: bool,
    pub backend: String,
}

/// A session currently being driven by an orchestrator task.
struct RunningSession {
    bus: EventBus,
    cancel: watch::Sender<bool>,
}

// ---------------------------------------------------------------------------
// Sitegist
// ---------------------------------------------------------------------------

/// The assembled pipeline.
pub struct Sitegist {
    config: Config,
    storage: Arc<SessionStorage>,
    sessions: Arc<SessionManager>,
    store: Arc<VectorStore>,
    query: QueryPipeline,
    orchestrator: Arc<Orchestrator>,
    fetcher: Arc<Fetcher>,
    chunk_opts: ChunkOptions,
    running: Arc<Mutex<HashMap<String, RunningSession>>>,
}

impl Sitegist {
    /// Compose the pipeline from a config and injected capabilities.
    pub fn new(config: Config, caps: Capabilities) -> Result<Self> {
        let storage = Arc::new(SessionStorage::new(&config.storage_base_path)?);
        let sessions = Arc::new(SessionManager::new(Arc::clone(&storage)));
        let fetcher = Arc::new(Fetcher::new(caps.engine, &config));
        let store = Arc::new(VectorStore::new(caps.embedder, caps.backend));
        let discoverer = caps
            .discoverer
            .unwrap_or_else(|| Arc::new(SitemapDiscoverer::new(&config)));

        let orchestrator = Arc::new(Orchestrator::new(
            config.clone(),
            Arc::clone(&fetcher),
            discoverer,
            Arc::clone(&store),
            Arc::clone(&sessions),
            Arc::clone(&storage),
        ));
        let query = QueryPipeline::new(caps.llm, caps.reranker, Arc::clone(&store), &config);
        let chunk_opts = ChunkOptions::new(config.chunk_char_limit, config.chunk_overlap);

        Ok(Self {
            config,
            storage,
            sessions,
            store,
            query,
            orchestrator,
            fetcher,
            chunk_opts,
            running: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    /// The vector store, for embedded callers that need direct access.
    pub fn vector_store(&self) -> &Arc<VectorStore> {
        &self.store
    }

    /// Validate the URL, create the session, and start the orchestrator in
    /// the background. Returns immediately with the pending session.
    #[instrument(skip_all, fields(url = %request.url, mode = %request.mode))]
    pub async fn start_session(&self, request: ScrapeRequest) -> Result<StartedSession> {
        let url = Url::parse(&request.url)
            .map_err(|e| SitegistError::invalid_url(format!("{}: {e}", request.url)))?;
        self.fetcher.validate_url(&url)?;

        let metadata = self.sessions.initialize_session(&request).await?;
        let session_id = metadata.session_id.clone();

        let bus = EventBus::new(&session_id);
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.running.lock().await.insert(
            session_id.clone(),
            RunningSession {
                bus: bus.clone(),
                cancel: cancel_tx,
            },
        );

        let orchestrator = Arc::clone(&self.orchestrator);
        let running = Arc::clone(&self.running);
        let task_id = session_id.clone();
        tokio::spawn(async move {
            if let Err(e) = orchestrator
                .execute(&task_id, &request, &bus, cancel_rx)
                .await
            {
                error!(session_id = %task_id, error = %e, "orchestrator task failed");
            }
            running.lock().await.remove(&task_id);
        });

        info!(%session_id, "session started");
        Ok(StartedSession {
            session_id,
            status: SessionStatus::Pending,
        })
    }

    /// Get a session's metadata.
    pub async fn get_session(&self, session_id: &str) -> Result<SessionMetadata> {
        self.sessions.get_metadata(session_id).await
    }

    /// All sessions, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        self.sessions.list_sessions().await
    }

    /// Delete a session and its artifacts, cancelling it first if running.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        if let Some(run) = self.running.lock().await.get(session_id) {
            let _ = run.cancel.send(true);
        }
        self.sessions.delete_session(session_id).await
    }

    /// Request cooperative cancellation of a running session. A session
    /// that already reached a terminal state is left as it is.
    pub async fn cancel_session(&self, session_id: &str) -> Result<()> {
        if let Some(run) = self.running.lock().await.get(session_id) {
            let _ = run.cancel.send(true);
            return Ok(());
        }
        // Not running: confirm it at least exists.
        self.sessions.get_metadata(session_id).await.map(|_| ())
    }

    /// Cancel every running session.
    pub async fn shutdown(&self) {
        for run in self.running.lock().await.values() {
            let _ = run.cancel.send(true);
        }
    }

    /// Subscribe to a session's progress events. For sessions that already
    /// reached a terminal state the stream replays that single event and
    /// ends.
    pub async fn subscribe_session(
        &self,
        session_id: &str,
    ) -> Result<broadcast::Receiver<SessionEvent>> {
        if let Some(run) = self.running.lock().await.get(session_id) {
            return Ok(run.bus.subscribe());
        }

        let metadata = self.sessions.get_metadata(session_id).await?;
        let bus = EventBus::new(session_id);
        let rx = bus.subscribe();
        let payload = match metadata.status {
            SessionStatus::Completed => EventPayload::Completed {
                pages_scraped: metadata.pages_scraped,
                failures: metadata.failures,
                total_pages: metadata.total_pages,
                duration_seconds: metadata.duration_seconds.unwrap_or_default(),
            },
            SessionStatus::Failed => EventPayload::Failed {
                error: metadata
                    .error_message
                    .unwrap_or_else(|| "failed".to_string()),
            },
            status => EventPayload::StatusChanged { status },
        };
        bus.emit(payload);
        Ok(rx)
    }

    /// Re-embed a previously scraped session from its persisted
    /// cleaned-markdown file, or any such file by name.
    #[instrument(skip_all)]
    pub async fn embed_session(&self, request: &EmbedRequest) -> Result<EmbedOutcome> {
        let file = if let Some(session_id) = &request.session_id {
            self.storage.load_cleaned_markdown(session_id)?.ok_or_else(|| {
                SitegistError::not_found(format!("no cleaned markdown for session {session_id}"))
            })?
        } else if let Some(filename) = &request.filename {
            self.storage.find_cleaned_markdown(filename)?.ok_or_else(|| {
                SitegistError::not_found(format!("no cleaned markdown file named {filename}"))
            })?
        } else {
            return Err(SitegistError::config(
                "either session_id or filename must be provided",
            ));
        };

        let mut total_chunks = 0;
        let mut pages_processed = 0;

        for page in &file.pages {
            if page.content.trim().is_empty() {
                continue;
            }
            let chunks = chunk_markdown(&page.content, &self.chunk_opts);
            if chunks.is_empty() {
                continue;
            }
            total_chunks += self
                .store
                .upsert_chunks(
                    &file.website,
                    &file.site_name,
                    &page.page_name,
                    &page.page_url,
                    &chunks,
                )
                .await?;
            pages_processed += 1;
        }

        info!(pages = pages_processed, chunks = total_chunks, "embedding complete");
        Ok(EmbedOutcome {
            total_pages: pages_processed,
            total_chunks,
            status: if pages_processed > 0 {
                "completed".to_string()
            } else {
                "failed".to_string()
            },
        })
    }

    /// Similarity search over stored chunks.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter_domain: Option<&str>,
        filter_site: Option<&str>,
    ) -> Result<SearchResponse> {
        let top_k = top_k.unwrap_or(self.config.default_top_k).min(MAX_TOP_K);
        let results = self
            .store
            .search(query, top_k, filter_domain, filter_site)
            .await?;
        Ok(SearchResponse {
            query: query.to_string(),
            total_results: results.len(),
            results,
        })
    }

    /// Grounded question answering over stored chunks.
    pub async fn ask(
        &self,
        question: &str,
        conversation_history: Option<&[ChatMessage]>,
        top_k: Option<usize>,
        filter_domain: Option<&str>,
        filter_site: Option<&str>,
    ) -> Result<Answer> {
        let top_k = top_k.unwrap_or(self.config.default_top_k).min(MAX_TOP_K);
        self.query
            .ask(
                question,
                conversation_history.unwrap_or(&[]),
                top_k,
                filter_domain,
                filter_site,
            )
            .await
    }

    /// Vector backend health.
    pub async fn health(&self) -> HealthReport {
        let health = self.store.health().await;
        HealthReport {
            ok: health.ok,
            backend: health.backend_name,
        }
    }
}
