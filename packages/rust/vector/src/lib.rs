//! Vector storage for sitegist.
//!
//! This crate provides:
//! - Capability interfaces the pipeline consumes ([`Embedder`], [`Llm`],
//!   [`Reranker`], [`VectorStoreBackend`])
//! - [`MemoryBackend`] — the in-process reference backend
//! - [`VectorStore`] — embedding-aware upsert/search/delete orchestration

pub mod capability;
pub mod memory;
pub mod store;

pub use capability::{
    BackendHealth, ChatMessage, ChunkFilter, Embedder, Llm, ModelTier, Reranker, Role,
    StoredChunk, VectorStoreBackend,
};
pub use memory::{inner_product, MemoryBackend};
pub use store::VectorStore;
