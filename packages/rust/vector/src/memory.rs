//! In-process vector store backend.
//!
//! The reference [`VectorStoreBackend`]: a flat scan over an in-memory
//! chunk list with exact filtering and inner-product scoring. Suitable for
//! embedded use and tests; remote engines implement the same trait.

use async_trait::async_trait;
use tokio::sync::RwLock;

use sitegist_shared::{Hit, Result, SitegistError};

use crate::capability::{BackendHealth, ChunkFilter, StoredChunk, VectorStoreBackend};

/// Default collection name, matching the session store's purpose.
const DEFAULT_COLLECTION: &str = "scraped_sites";

/// Flat in-memory backend with exact top-k scan.
pub struct MemoryBackend {
    collection_name: String,
    dimension: usize,
    chunks: RwLock<Vec<StoredChunk>>,
}

impl MemoryBackend {
    /// Create a backend accepting vectors of `dimension`.
    pub fn new(dimension: usize) -> Self {
        Self {
            collection_name: DEFAULT_COLLECTION.to_string(),
            dimension,
            chunks: RwLock::new(Vec::new()),
        }
    }

    /// Override the collection name.
    pub fn with_collection_name(mut self, name: impl Into<String>) -> Self {
        self.collection_name = name.into();
        self
    }

    fn check_dimensions(&self, chunks: &[StoredChunk]) -> Result<()> {
        for chunk in chunks {
            if chunk.embedding.len() != self.dimension {
                return Err(SitegistError::VectorStore(format!(
                    "embedding dimension mismatch: got {}, collection is {}",
                    chunk.embedding.len(),
                    self.dimension
                )));
            }
            if chunk.domain.is_empty() {
                return Err(SitegistError::VectorStore(format!(
                    "chunk {} has an empty domain",
                    chunk.chunk_id
                )));
            }
        }
        Ok(())
    }
}

#[async_trait]
impl VectorStoreBackend for MemoryBackend {
    async fn replace_page(
        &self,
        domain: &str,
        page_url: &str,
        chunks: Vec<StoredChunk>,
    ) -> Result<()> {
        self.check_dimensions(&chunks)?;
        // One write-lock critical section: delete-then-insert is atomic
        // with respect to concurrent queries.
        let mut store = self.chunks.write().await;
        store.retain(|c| !(c.domain == domain && c.page_url == page_url));
        store.extend(chunks);
        Ok(())
    }

    async fn delete_by_domain(&self, domain: &str) -> Result<()> {
        let mut store = self.chunks.write().await;
        store.retain(|c| c.domain != domain);
        Ok(())
    }

    async fn clear(&self) -> Result<()> {
        self.chunks.write().await.clear();
        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<Hit>> {
        if embedding.len() != self.dimension {
            return Err(SitegistError::VectorStore(format!(
                "query dimension mismatch: got {}, collection is {}",
                embedding.len(),
                self.dimension
            )));
        }

        let store = self.chunks.read().await;
        let mut scored: Vec<Hit> = store
            .iter()
            .filter(|c| filter.matches(&c.domain, &c.site_name))
            .map(|c| Hit {
                chunk_id: c.chunk_id.clone(),
                domain: c.domain.clone(),
                site_name: c.site_name.clone(),
                page_name: c.page_name.clone(),
                page_url: c.page_url.clone(),
                chunk_text: c.chunk_text.clone(),
                score: inner_product(embedding, &c.embedding),
            })
            .collect();

        scored.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(top_k);
        Ok(scored)
    }

    async fn count(&self) -> Result<usize> {
        Ok(self.chunks.read().await.len())
    }

    async fn health(&self) -> BackendHealth {
        BackendHealth {
            ok: true,
            backend_name: "memory".to_string(),
            collection_name: self.collection_name.clone(),
        }
    }
}

/// Inner product of two equal-length vectors. With L2-normalized inputs
/// this equals cosine similarity.
pub fn inner_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}
