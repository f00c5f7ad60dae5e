//! Capability interfaces the pipeline consumes but never implements:
//! embedding, completion, reranking, and vector storage backends.
//!
//! Concrete providers are injected at the composition root; tests
//! substitute fakes.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use sitegist_shared::{Hit, Result};

// ---------------------------------------------------------------------------
// Embedder
// ---------------------------------------------------------------------------

/// Text embedding capability.
///
/// Implementations return L2-normalized dense vectors of a fixed dimension,
/// so inner product equals cosine similarity.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Embedding dimensionality. Read once at store construction; never
    /// assumed by the pipeline.
    fn dimension(&self) -> usize;

    /// Embed a batch of texts, one vector per input, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

// ---------------------------------------------------------------------------
// Llm
// ---------------------------------------------------------------------------

/// Model tier requested for a completion. Mapping tiers to concrete model
/// identifiers is the provider's concern.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTier {
    /// Small, fast model for query rewriting.
    Fast,
    /// Larger model for answer synthesis.
    Strong,
}

/// Role of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One turn of conversation history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

/// Chat completion capability.
#[async_trait]
pub trait Llm: Send + Sync {
    /// Complete a conversation, returning the assistant text.
    async fn complete(
        &self,
        tier: ModelTier,
        system: Option<&str>,
        messages: &[ChatMessage],
        max_tokens: u32,
    ) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Reranker
// ---------------------------------------------------------------------------

/// Optional second-stage reranking capability.
#[async_trait]
pub trait Reranker: Send + Sync {
    /// Reorder `candidates` by relevance to `query` and keep the top `top_k`.
    async fn rerank(&self, query: &str, candidates: Vec<Hit>, top_k: usize) -> Result<Vec<Hit>>;
}

// ---------------------------------------------------------------------------
// VectorStoreBackend
// ---------------------------------------------------------------------------

/// One embedded chunk as persisted by a backend.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredChunk {
    /// Globally unique id (`{domain}_{page_name}_{ordinal}`).
    pub chunk_id: String,
    /// Owning domain, the sole partition key. Never empty.
    pub domain: String,
    /// Human-readable site name.
    pub site_name: String,
    /// Page name within the site.
    pub page_name: String,
    /// Source page URL.
    pub page_url: String,
    /// Chunk text.
    pub chunk_text: String,
    /// L2-normalized embedding.
    pub embedding: Vec<f32>,
}

/// Exact metadata filters applied to a similarity query.
#[derive(Debug, Clone, Default)]
pub struct ChunkFilter {
    pub domain: Option<String>,
    pub site_name: Option<String>,
}

impl ChunkFilter {
    /// Does a chunk pass every set filter?
    pub fn matches(&self, domain: &str, site_name: &str) -> bool {
        self.domain.as_deref().map(|d| d == domain).unwrap_or(true)
            && self
                .site_name
                .as_deref()
                .map(|s| s == site_name)
                .unwrap_or(true)
    }
}

/// Backend health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackendHealth {
    pub ok: bool,
    pub backend_name: String,
    pub collection_name: String,
}

/// Storage backend capability: approximate top-k similarity search over
/// `StoredChunk`s with metadata filtering.
///
/// Backends must be safe for concurrent insert and query; `replace_page`
/// is atomic at the `(domain, page_url)` grain.
#[async_trait]
pub trait VectorStoreBackend: Send + Sync {
    /// Replace every chunk for `(domain, page_url)` with `chunks`, as one
    /// atomic operation. An empty `chunks` deletes the page.
    async fn replace_page(
        &self,
        domain: &str,
        page_url: &str,
        chunks: Vec<StoredChunk>,
    ) -> Result<()>;

    /// Delete every chunk belonging to a domain.
    async fn delete_by_domain(&self, domain: &str) -> Result<()>;

    /// Delete the whole collection.
    async fn clear(&self) -> Result<()>;

    /// Top-k similarity search with optional exact filters. Scores are
    /// monotonic: higher means more similar.
    async fn query(&self, embedding: &[f32], top_k: usize, filter: &ChunkFilter)
        -> Result<Vec<Hit>>;

    /// Total stored chunk count.
    async fn count(&self) -> Result<usize>;

    /// Health report.
    async fn health(&self) -> BackendHealth;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filter_matching() {
        let unfiltered = ChunkFilter::default();
        assert!(unfiltered.matches("a.test", "Site A"));

        let by_domain = ChunkFilter {
            domain: Some("a.test".into()),
            site_name: None,
        };
        assert!(by_domain.matches("a.test", "anything"));
        assert!(!by_domain.matches("b.test", "anything"));

        let both = ChunkFilter {
            domain: Some("a.test".into()),
            site_name: Some("Site A".into()),
        };
        assert!(both.matches("a.test", "Site A"));
        assert!(!both.matches("a.test", "Site B"));
    }

    #[test]
    fn chat_message_roles_serialize_lowercase() {
        let msg = ChatMessage::user("hello");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"user\""));
        let msg = ChatMessage::assistant("hi");
        let json = serde_json::to_string(&msg).unwrap();
        assert!(json.contains("\"assistant\""));
    }
}
