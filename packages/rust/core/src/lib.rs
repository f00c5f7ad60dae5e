//! Core pipeline orchestration for sitegist.
//!
//! This crate ties discovery, fetching, normalization, chunking, and the
//! vector store together into sessions ([`Orchestrator`]) and grounded
//! question answering ([`QueryPipeline`]), exposed through the [`Sitegist`]
//! operations facade.

pub mod events;
pub mod ops;
pub mod orchestrator;
pub mod query;
pub mod session;
pub mod storage;

pub use events::{EventBus, EventPayload, SessionEvent};
pub use ops::{
    Capabilities, EmbedOutcome, EmbedRequest, HealthReport, SearchResponse, Sitegist,
    StartedSession,
};
pub use orchestrator::{Orchestrator, SitemapDiscoverer, UrlDiscoverer};
pub use query::{Answer, QueryPipeline, SourceRef};
pub use session::SessionManager;
pub use storage::{CleanedMarkdownFile, CleanedPage, SessionStorage};
