//! The vector store: embedding plus persistence behind one write path.
//!
//! [`VectorStore`] owns an [`Embedder`] and a [`VectorStoreBackend`] and
//! keeps the two honest: texts are embedded in a batch, chunk ids are
//! derived deterministically, and re-embedding a page replaces its prior
//! chunks rather than accumulating duplicates.

use std::sync::Arc;

use tracing::{debug, info, instrument, warn};

use sitegist_shared::{Hit, Result};

use crate::capability::{BackendHealth, ChunkFilter, Embedder, StoredChunk, VectorStoreBackend};

/// Embedding-aware front door to the chunk store.
pub struct VectorStore {
    embedder: Arc<dyn Embedder>,
    backend: Arc<dyn VectorStoreBackend>,
    dimension: usize,
}

impl VectorStore {
    /// Wire an embedder to a backend. The embedding dimension is read here,
    /// once; nothing downstream hardcodes it.
    pub fn new(embedder: Arc<dyn Embedder>, backend: Arc<dyn VectorStoreBackend>) -> Self {
        let dimension = embedder.dimension();
        Self {
            embedder,
            backend,
            dimension,
        }
    }

    /// Embedding dimensionality in use.
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Embed `texts` and store them for a page, replacing any chunks
    /// previously stored for `(domain, page_url)`. Returns the number of
    /// chunks inserted. Idempotent at the page grain.
    #[instrument(skip_all, fields(domain = %domain, page = %page_name, chunks = texts.len()))]
    pub async fn upsert_chunks(
        &self,
        domain: &str,
        site_name: &str,
        page_name: &str,
        page_url: &str,
        texts: &[String],
    ) -> Result<usize> {
        if texts.is_empty() {
            warn!("no chunks to insert");
            return Ok(0);
        }

        let embeddings = self.embedder.embed_batch(texts).await?;
        debug!(embedded = embeddings.len(), "batch embedding complete");

        let chunks: Vec<StoredChunk> = texts
            .iter()
            .zip(embeddings)
            .enumerate()
            .map(|(i, (text, embedding))| StoredChunk {
                chunk_id: format!("{domain}_{page_name}_{i}"),
                domain: domain.to_string(),
                site_name: site_name.to_string(),
                page_name: page_name.to_string(),
                page_url: page_url.to_string(),
                chunk_text: text.clone(),
                embedding,
            })
            .collect();

        let inserted = chunks.len();
        self.backend.replace_page(domain, page_url, chunks).await?;

        info!(inserted, "chunks stored");
        Ok(inserted)
    }

    /// Similarity search with optional exact filters. `top_k = 0` returns
    /// an empty result without touching the backend.
    #[instrument(skip_all, fields(top_k))]
    pub async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter_domain: Option<&str>,
        filter_site: Option<&str>,
    ) -> Result<Vec<Hit>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let embeddings = self.embedder.embed_batch(&[query.to_string()]).await?;
        let embedding = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| sitegist_shared::SitegistError::VectorStore("empty embedding response".into()))?;

        let filter = ChunkFilter {
            domain: filter_domain.map(str::to_string),
            site_name: filter_site.map(str::to_string),
        };

        let hits = self.backend.query(&embedding, top_k, &filter).await?;
        debug!(results = hits.len(), "search complete");
        Ok(hits)
    }

    /// Delete every chunk for a domain.
    pub async fn delete_domain(&self, domain: &str) -> Result<()> {
        self.backend.delete_by_domain(domain).await
    }

    /// Delete the whole collection.
    pub async fn delete_collection(&self) -> Result<()> {
        self.backend.clear().await
    }

    /// Total stored chunk count.
    pub async fn count(&self) -> Result<usize> {
        self.backend.count().await
    }

    /// Backend health report.
    pub async fn health(&self) -> BackendHealth {
        self.backend.health().await
    }
}
