//! End-to-end pipeline tests with fake capabilities.
//!
//! Each test assembles a [`Sitegist`] facade around a static browser
//! engine, a deterministic embedder, an in-memory vector backend, and a
//! scripted LLM, then drives sessions and queries through the public
//! operation surface.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use url::Url;

use sitegist_browser::{BrowserEngine, RenderOptions, RenderedPage};
use sitegist_core::{Capabilities, EmbedRequest, Sitegist, UrlDiscoverer};
use sitegist_discovery::DiscoveredUrls;
use sitegist_shared::{
    Config, Result, ScrapeMode, ScrapeRequest, SessionMetadata, SessionStatus, SitegistError,
};
use sitegist_vector::{ChatMessage, Embedder, Llm, MemoryBackend, ModelTier};

// ---------------------------------------------------------------------------
// Fakes
// ---------------------------------------------------------------------------

/// Serves canned HTML per URL; listed failures return 503; unknown URLs
/// either 404 or hang forever (for cancellation tests).
struct StaticEngine {
    pages: HashMap<String, String>,
    failures: Vec<String>,
    hang_on_unknown: bool,
}

impl StaticEngine {
    fn new<S: Into<String>>(pages: Vec<(S, String)>) -> Self {
        Self {
            pages: pages
                .into_iter()
                .map(|(url, html)| (url.into(), html))
                .collect(),
            failures: Vec::new(),
            hang_on_unknown: false,
        }
    }

    fn empty() -> Self {
        Self::new(Vec::<(String, String)>::new())
    }

    fn failing(mut self, url: &str) -> Self {
        self.failures.push(url.to_string());
        self
    }

    fn hang_on_unknown(mut self) -> Self {
        self.hang_on_unknown = true;
        self
    }
}

#[async_trait]
impl BrowserEngine for StaticEngine {
    async fn render(&self, url: &Url, _opts: &RenderOptions) -> Result<RenderedPage> {
        let key = url.to_string();
        if self.failures.contains(&key) {
            return Ok(RenderedPage {
                html: String::new(),
                final_url: url.clone(),
                status: 503,
            });
        }
        match self.pages.get(&key) {
            Some(html) => Ok(RenderedPage {
                html: html.clone(),
                final_url: url.clone(),
                status: 200,
            }),
            None if self.hang_on_unknown => {
                std::future::pending::<()>().await;
                unreachable!()
            }
            None => Ok(RenderedPage {
                html: String::new(),
                final_url: url.clone(),
                status: 404,
            }),
        }
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Returns a fixed URL list instead of walking sitemaps.
struct FixedDiscoverer {
    urls: Vec<Url>,
}

#[async_trait]
impl UrlDiscoverer for FixedDiscoverer {
    async fn discover(&self, _seed: &Url) -> Result<DiscoveredUrls> {
        Ok(DiscoveredUrls {
            urls: self.urls.clone(),
            warning: None,
        })
    }
}

/// Deterministic bag-of-characters embedder; similar texts land close.
struct StubEmbedder;

const DIMENSION: usize = 32;

#[async_trait]
impl Embedder for StubEmbedder {
    fn dimension(&self) -> usize {
        DIMENSION
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        Ok(texts
            .iter()
            .map(|text| {
                let mut v = vec![0.0f32; DIMENSION];
                for word in text.to_ascii_lowercase().split_whitespace() {
                    let mut h: usize = 5381;
                    for b in word.bytes() {
                        h = h.wrapping_mul(33).wrapping_add(b as usize);
                    }
                    v[h % DIMENSION] += 1.0;
                }
                let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt().max(1e-6);
                v.iter().map(|x| x / norm).collect()
            })
            .collect())
    }
}

/// Scripted LLM: the fast tier echoes the last user turn (so the rewrite
/// preserves the question's keywords), the strong tier echoes its whole
/// prompt (so the answer provably contains source text). Either tier can
/// be switched to fail.
struct ScriptedLlm {
    fail_fast: AtomicBool,
    fail_strong: AtomicBool,
}

impl ScriptedLlm {
    fn new() -> Self {
        Self {
            fail_fast: AtomicBool::new(false),
            fail_strong: AtomicBool::new(false),
        }
    }
}

#[async_trait]
impl Llm for ScriptedLlm {
    async fn complete(
        &self,
        tier: ModelTier,
        _system: Option<&str>,
        messages: &[ChatMessage],
        _max_tokens: u32,
    ) -> Result<String> {
        let last = messages
            .last()
            .map(|m| m.content.clone())
            .unwrap_or_default();
        match tier {
            ModelTier::Fast => {
                if self.fail_fast.load(Ordering::SeqCst) {
                    return Err(SitegistError::Llm("fast tier down".into()));
                }
                Ok(last)
            }
            ModelTier::Strong => {
                if self.fail_strong.load(Ordering::SeqCst) {
                    return Err(SitegistError::Llm("strong tier down".into()));
                }
                Ok(format!("Based on the provided sources: {last}"))
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct TestApp {
    app: Sitegist,
    llm: Arc<ScriptedLlm>,
    _tmp: tempfile::TempDir,
}

fn build_app(engine: StaticEngine, discoverer: Option<Vec<Url>>) -> TestApp {
    let tmp = tempfile::tempdir().expect("tempdir");
    let config = Config::from_pairs([(
        "STORAGE_BASE_PATH",
        tmp.path().to_string_lossy().to_string(),
    )])
    .expect("config");

    let llm = Arc::new(ScriptedLlm::new());
    let caps = Capabilities {
        engine: Arc::new(engine),
        embedder: Arc::new(StubEmbedder),
        backend: Arc::new(MemoryBackend::new(DIMENSION)),
        llm: Arc::clone(&llm) as Arc<dyn Llm>,
        reranker: None,
        discoverer: discoverer.map(|urls| Arc::new(FixedDiscoverer { urls }) as Arc<dyn UrlDiscoverer>),
    };

    TestApp {
        app: Sitegist::new(config, caps).expect("app"),
        llm,
        _tmp: tmp,
    }
}

fn page_html(title: &str, body: &str) -> String {
    format!(
        "<html><head><title>{title}</title></head>\
         <body><main><h1>{title}</h1><p>{body}</p></main></body></html>"
    )
}

const WIDGETS_BODY: &str = "We sell widgets of every shape and size, hand crafted for \
discerning customers who appreciate quality tooling.";

async fn wait_terminal(app: &Sitegist, session_id: &str) -> SessionMetadata {
    for _ in 0..1000 {
        let meta = app.get_session(session_id).await.expect("session exists");
        if meta.status.is_terminal() {
            return meta;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {session_id} never reached a terminal state");
}

async fn wait_scraped(app: &Sitegist, session_id: &str, count: u64) {
    for _ in 0..1000 {
        let meta = app.get_session(session_id).await.expect("session exists");
        if meta.pages_scraped >= count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("session {session_id} never scraped {count} pages");
}

// ---------------------------------------------------------------------------
// Scenarios
// ---------------------------------------------------------------------------

#[tokio::test]
async fn single_page_happy_path() {
    let engine = StaticEngine::new(vec![(
        "https://example.com/about",
        page_html("About Us", WIDGETS_BODY),
    )]);
    let harness = build_app(engine, None);
    let app = &harness.app;

    let started = app
        .start_session(ScrapeRequest {
            url: "https://example.com/about".into(),
            mode: ScrapeMode::SinglePage,
            purpose: None,
        })
        .await
        .unwrap();
    assert_eq!(started.status, SessionStatus::Pending);

    let meta = wait_terminal(app, &started.session_id).await;
    assert_eq!(meta.status, SessionStatus::Completed, "error: {:?}", meta.error_message);
    assert_eq!(meta.total_pages, 1);
    assert_eq!(meta.pages_scraped, 1);
    assert_eq!(meta.failures, 0);
    assert!(meta.duration_seconds.is_some());

    // Exactly one chunk, partitioned under the page's domain.
    assert_eq!(app.vector_store().count().await.unwrap(), 1);
    let response = app
        .search("widgets", None, Some("example.com"), None)
        .await
        .unwrap();
    assert_eq!(response.total_results, 1);
    assert_eq!(response.results[0].domain, "example.com");
    assert!(response.results[0].chunk_text.contains("widgets"));

    // Grounded answer citing the scraped page.
    let answer = app
        .ask("what do they sell?", None, None, None, None)
        .await
        .unwrap();
    assert!(answer.answer.contains("widgets"), "answer: {}", answer.answer);
    assert_eq!(answer.sources_used, 1);
    assert_eq!(answer.sources[0].page_url, "https://example.com/about");
}

#[tokio::test]
async fn whole_site_with_one_failing_page() {
    let urls: Vec<Url> = ["https://site.test/a", "https://site.test/b", "https://site.test/c"]
        .iter()
        .map(|u| Url::parse(u).unwrap())
        .collect();
    let engine = StaticEngine::new(vec![
        ("https://site.test/a", page_html("Alpha", WIDGETS_BODY)),
        ("https://site.test/c", page_html("Gamma", WIDGETS_BODY)),
    ])
    .failing("https://site.test/b");
    let harness = build_app(engine, Some(urls));
    let app = &harness.app;

    let started = app
        .start_session(ScrapeRequest {
            url: "https://site.test".into(),
            mode: ScrapeMode::WholeSite,
            purpose: None,
        })
        .await
        .unwrap();

    let meta = wait_terminal(app, &started.session_id).await;
    assert_eq!(meta.status, SessionStatus::Completed);
    assert_eq!(meta.total_pages, 3);
    assert_eq!(meta.pages_scraped, 2);
    assert_eq!(meta.failures, 1);
    assert_eq!(meta.pages_scraped + meta.failures, meta.total_pages);

    // No chunks tagged with the failed page's URL.
    let response = app
        .search("widgets", Some(10), Some("site.test"), None)
        .await
        .unwrap();
    assert_eq!(response.total_results, 2);
    assert!(response
        .results
        .iter()
        .all(|hit| hit.page_url != "https://site.test/b"));
}

#[tokio::test]
async fn re_embedding_is_idempotent() {
    let make_engine = || {
        StaticEngine::new(vec![(
            "https://example.com/about",
            page_html("About Us", WIDGETS_BODY),
        )])
    };
    let harness = build_app(make_engine(), None);
    let app = &harness.app;

    let request = ScrapeRequest {
        url: "https://example.com/about".into(),
        mode: ScrapeMode::SinglePage,
        purpose: None,
    };

    let first = app.start_session(request.clone()).await.unwrap();
    wait_terminal(app, &first.session_id).await;
    let count_after_first = app.vector_store().count().await.unwrap();

    let second = app.start_session(request).await.unwrap();
    wait_terminal(app, &second.session_id).await;
    let count_after_second = app.vector_store().count().await.unwrap();

    assert_eq!(count_after_first, count_after_second);

    // Re-embedding from the persisted session file is equally idempotent.
    let outcome = app
        .embed_session(&EmbedRequest {
            session_id: Some(first.session_id.clone()),
            filename: None,
        })
        .await
        .unwrap();
    assert_eq!(outcome.status, "completed");
    assert_eq!(outcome.total_pages, 1);
    assert_eq!(app.vector_store().count().await.unwrap(), count_after_first);
}

#[tokio::test]
async fn domain_isolation_in_search() {
    let engine = StaticEngine::new(vec![
        ("https://a.test/shop", page_html("Shop A", WIDGETS_BODY)),
        ("https://b.test/shop", page_html("Shop B", WIDGETS_BODY)),
    ]);
    let harness = build_app(engine, None);
    let app = &harness.app;

    for url in ["https://a.test/shop", "https://b.test/shop"] {
        let started = app
            .start_session(ScrapeRequest {
                url: url.into(),
                mode: ScrapeMode::SinglePage,
                purpose: None,
            })
            .await
            .unwrap();
        let meta = wait_terminal(app, &started.session_id).await;
        assert_eq!(meta.status, SessionStatus::Completed);
    }

    let response = app
        .search("widgets", Some(10), Some("a.test"), None)
        .await
        .unwrap();
    assert!(!response.results.is_empty());
    assert!(response.results.iter().all(|hit| hit.domain == "a.test"));
}

#[tokio::test]
async fn conversation_history_resolves_referents() {
    let engine = StaticEngine::new(vec![(
        "https://gym.test/pricing",
        page_html(
            "Pricing",
            "Membership pricing starts at thirty dollars per month for the basic plan, \
             and the premium plan with unlimited classes costs sixty dollars per month.",
        ),
    )]);
    let harness = build_app(engine, None);
    let app = &harness.app;

    let started = app
        .start_session(ScrapeRequest {
            url: "https://gym.test/pricing".into(),
            mode: ScrapeMode::SinglePage,
            purpose: None,
        })
        .await
        .unwrap();
    wait_terminal(app, &started.session_id).await;

    let history = vec![
        ChatMessage::user("what classes do they offer?"),
        ChatMessage::assistant("They offer yoga, HIIT, and spin."),
    ];
    let answer = app
        .ask("what about pricing?", Some(&history[..]), None, None, None)
        .await
        .unwrap();

    // The rewriter kept the pricing keyword and retrieval found the page.
    assert!(answer.optimized_query.to_lowercase().contains("pricing"));
    assert!(answer.sources_used > 0);
    assert!(answer
        .sources
        .iter()
        .any(|s| s.page_url == "https://gym.test/pricing"));
}

#[tokio::test]
async fn ask_without_sources_says_so() {
    let harness = build_app(StaticEngine::empty(), None);
    let answer = harness
        .app
        .ask("what is the meaning of life?", None, None, None, None)
        .await
        .unwrap();
    assert_eq!(answer.sources_used, 0);
    assert!(answer.sources.is_empty());
    assert!(answer.answer.contains("don't have any information"));
}

#[tokio::test]
async fn cancellation_keeps_partial_chunks() {
    let mut pages = Vec::new();
    let mut urls = Vec::new();
    for i in 0..100 {
        let url = format!("https://big.test/page-{i}");
        urls.push(Url::parse(&url).unwrap());
        if i < 10 {
            pages.push((url, page_html(&format!("Page {i}"), WIDGETS_BODY)));
        }
    }
    // Pages beyond the first ten hang until cancelled.
    let engine = StaticEngine::new(pages).hang_on_unknown();
    let harness = build_app(engine, Some(urls));
    let app = &harness.app;

    let started = app
        .start_session(ScrapeRequest {
            url: "https://big.test".into(),
            mode: ScrapeMode::WholeSite,
            purpose: None,
        })
        .await
        .unwrap();

    wait_scraped(app, &started.session_id, 10).await;
    app.cancel_session(&started.session_id).await.unwrap();

    let meta = wait_terminal(app, &started.session_id).await;
    assert_eq!(meta.status, SessionStatus::Failed);
    assert_eq!(meta.error_message.as_deref(), Some("cancelled"));
    assert_eq!(meta.pages_scraped, 10);

    // The ten pages scraped before cancellation remain searchable.
    assert_eq!(app.vector_store().count().await.unwrap(), 10);
    let response = app
        .search("widgets", Some(50), Some("big.test"), None)
        .await
        .unwrap();
    assert_eq!(response.total_results, 10);
}

// ---------------------------------------------------------------------------
// Boundaries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn zero_discovered_urls_fails_the_session() {
    let harness = build_app(StaticEngine::empty(), Some(vec![]));
    let app = &harness.app;

    let started = app
        .start_session(ScrapeRequest {
            url: "https://empty.test".into(),
            mode: ScrapeMode::WholeSite,
            purpose: None,
        })
        .await
        .unwrap();

    let meta = wait_terminal(app, &started.session_id).await;
    assert_eq!(meta.status, SessionStatus::Failed);
    assert_eq!(meta.total_pages, 0);
    assert!(!meta.error_message.as_deref().unwrap_or("").is_empty());
}

#[tokio::test]
async fn private_targets_are_rejected_up_front() {
    let harness = build_app(StaticEngine::empty(), None);
    for url in ["http://localhost:3000/", "http://127.0.0.1/", "http://10.0.0.8/admin"] {
        let err = harness
            .app
            .start_session(ScrapeRequest {
                url: url.into(),
                mode: ScrapeMode::SinglePage,
                purpose: None,
            })
            .await
            .unwrap_err();
        assert!(
            matches!(err, SitegistError::InvalidUrl { .. }),
            "expected InvalidUrl for {url}, got {err}"
        );
    }
}

#[tokio::test]
async fn top_k_zero_returns_empty_search() {
    let harness = build_app(StaticEngine::empty(), None);
    let response = harness
        .app
        .search("anything", Some(0), None, None)
        .await
        .unwrap();
    assert_eq!(response.total_results, 0);
}

#[tokio::test]
async fn session_lookup_and_listing() {
    let engine = StaticEngine::new(vec![(
        "https://example.com/about",
        page_html("About Us", WIDGETS_BODY),
    )]);
    let harness = build_app(engine, None);
    let app = &harness.app;

    let err = app.get_session("missing").await.unwrap_err();
    assert!(matches!(err, SitegistError::NotFound { .. }));

    let started = app
        .start_session(ScrapeRequest {
            url: "https://example.com/about".into(),
            mode: ScrapeMode::SinglePage,
            purpose: Some("test run".into()),
        })
        .await
        .unwrap();
    wait_terminal(app, &started.session_id).await;

    let sessions = app.list_sessions().await.unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0].session_id, started.session_id);
    assert_eq!(sessions[0].purpose.as_deref(), Some("test run"));

    app.delete_session(&started.session_id).await.unwrap();
    let err = app.get_session(&started.session_id).await.unwrap_err();
    assert!(matches!(err, SitegistError::NotFound { .. }));
}

#[tokio::test]
async fn subscribe_streams_until_terminal_event() {
    let engine = StaticEngine::new(vec![(
        "https://example.com/about",
        page_html("About Us", WIDGETS_BODY),
    )]);
    let harness = build_app(engine, None);
    let app = &harness.app;

    let started = app
        .start_session(ScrapeRequest {
            url: "https://example.com/about".into(),
            mode: ScrapeMode::SinglePage,
            purpose: None,
        })
        .await
        .unwrap();

    // A live subscription ends at (or after) the terminal event.
    if let Ok(mut rx) = app.subscribe_session(&started.session_id).await {
        let saw_terminal = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                match rx.recv().await {
                    Ok(event) => {
                        if event.payload.is_terminal() {
                            return true;
                        }
                    }
                    Err(_) => return false,
                }
            }
        })
        .await
        .unwrap_or(false);
        // Either we observed the terminal event, or the session finished
        // before we subscribed and the channel simply closed.
        let meta = app.get_session(&started.session_id).await.unwrap();
        assert!(saw_terminal || meta.status.is_terminal());
    }

    // Subscribing after completion replays the terminal event once.
    wait_terminal(app, &started.session_id).await;
    let mut rx = app.subscribe_session(&started.session_id).await.unwrap();
    let event = rx.recv().await.unwrap();
    assert!(event.payload.is_terminal());
    assert!(rx.recv().await.is_err());

    let err = app.subscribe_session("missing").await.unwrap_err();
    assert!(matches!(err, SitegistError::NotFound { .. }));
}

#[tokio::test]
async fn rewrite_failure_degrades_to_raw_question() {
    let engine = StaticEngine::new(vec![(
        "https://example.com/about",
        page_html("About Us", WIDGETS_BODY),
    )]);
    let harness = build_app(engine, None);
    let app = &harness.app;

    let started = app
        .start_session(ScrapeRequest {
            url: "https://example.com/about".into(),
            mode: ScrapeMode::SinglePage,
            purpose: None,
        })
        .await
        .unwrap();
    wait_terminal(app, &started.session_id).await;

    harness.llm.fail_fast.store(true, Ordering::SeqCst);
    let answer = app
        .ask("widgets available?", None, None, None, None)
        .await
        .unwrap();
    assert_eq!(answer.optimized_query, "widgets available?");
    assert!(answer.sources_used > 0);
}

#[tokio::test]
async fn synthesis_failure_surfaces() {
    let engine = StaticEngine::new(vec![(
        "https://example.com/about",
        page_html("About Us", WIDGETS_BODY),
    )]);
    let harness = build_app(engine, None);
    let app = &harness.app;

    let started = app
        .start_session(ScrapeRequest {
            url: "https://example.com/about".into(),
            mode: ScrapeMode::SinglePage,
            purpose: None,
        })
        .await
        .unwrap();
    wait_terminal(app, &started.session_id).await;

    harness.llm.fail_strong.store(true, Ordering::SeqCst);
    let err = app
        .ask("widgets available?", None, None, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, SitegistError::Llm(_)));
}

#[tokio::test]
async fn reranker_reorders_and_caps_results() {
    use sitegist_shared::Hit;
    use sitegist_vector::Reranker;

    /// Keeps only hits whose text mentions the query's last word.
    struct KeywordReranker;

    #[async_trait]
    impl Reranker for KeywordReranker {
        async fn rerank(
            &self,
            query: &str,
            candidates: Vec<Hit>,
            top_k: usize,
        ) -> Result<Vec<Hit>> {
            let needle = query
                .split_whitespace()
                .last()
                .unwrap_or_default()
                .trim_matches('?')
                .to_ascii_lowercase();
            let mut kept: Vec<Hit> = candidates
                .into_iter()
                .filter(|hit| hit.chunk_text.to_ascii_lowercase().contains(&needle))
                .collect();
            kept.truncate(top_k);
            Ok(kept)
        }
    }

    let tmp = tempfile::tempdir().unwrap();
    let config = Config::from_pairs([(
        "STORAGE_BASE_PATH",
        tmp.path().to_string_lossy().to_string(),
    )])
    .unwrap();
    let engine = StaticEngine::new(vec![
        ("https://shop.test/widgets", page_html("Widgets", WIDGETS_BODY)),
        (
            "https://shop.test/gadgets",
            page_html("Gadgets", "Our gadgets are battery powered and waterproof, with a two year warranty."),
        ),
    ]);
    let app = Sitegist::new(
        config,
        Capabilities {
            engine: Arc::new(engine),
            embedder: Arc::new(StubEmbedder),
            backend: Arc::new(MemoryBackend::new(DIMENSION)),
            llm: Arc::new(ScriptedLlm::new()),
            reranker: Some(Arc::new(KeywordReranker)),
            discoverer: None,
        },
    )
    .unwrap();

    for url in ["https://shop.test/widgets", "https://shop.test/gadgets"] {
        let started = app
            .start_session(ScrapeRequest {
                url: url.into(),
                mode: ScrapeMode::SinglePage,
                purpose: None,
            })
            .await
            .unwrap();
        wait_terminal(&app, &started.session_id).await;
    }

    let answer = app
        .ask("do you sell widgets?", None, Some(5), None, None)
        .await
        .unwrap();
    assert_eq!(answer.sources_used, 1);
    assert_eq!(answer.sources[0].page_url, "https://shop.test/widgets");
}
