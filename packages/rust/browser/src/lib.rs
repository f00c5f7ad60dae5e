//! Page fetching for sitegist.
//!
//! This crate provides:
//! - [`BrowserEngine`] — the capability interface for rendering a URL to HTML
//! - [`HttpEngine`] — the built-in plain-HTTP engine (no JavaScript)
//! - [`Fetcher`] — pooling, timeouts, status classification, and URL guards

pub mod engine;
pub mod fetcher;

pub use engine::{BrowserEngine, HttpEngine, RenderOptions, RenderedPage, ScrollPolicy};
pub use fetcher::Fetcher;
