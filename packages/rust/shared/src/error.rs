//! Error types for sitegist.
//!
//! Library crates use [`SitegistError`] via `thiserror`. Per-page failures
//! (fetch, normalize) are absorbed by the orchestrator; everything else is
//! surfaced to the caller.

use std::path::PathBuf;

/// Whether a fetch failure is worth retrying on a future run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchKind {
    /// Timeout, connection reset, 429/5xx. The page may succeed later.
    Transient,
    /// 4xx, navigation abort, unparseable response. Retrying won't help.
    Permanent,
}

impl std::fmt::Display for FetchKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Transient => write!(f, "transient"),
            Self::Permanent => write!(f, "permanent"),
        }
    }
}

/// Top-level error type for all sitegist operations.
#[derive(Debug, thiserror::Error)]
pub enum SitegistError {
    /// Malformed or disallowed input URL (bad scheme, no host, private target).
    #[error("invalid url: {message}")]
    InvalidUrl { message: String },

    /// Per-page fetch failure. Logged and counted by the orchestrator,
    /// never fatal for a session.
    #[error("fetch error ({kind}): {message}")]
    Fetch { kind: FetchKind, message: String },

    /// HTML could not be normalized into usable content.
    #[error("normalize error: {message}")]
    Normalize { message: String },

    /// Vector store backend failure. Fatal for any operation touching the store.
    #[error("vector store unavailable: {0}")]
    VectorStore(String),

    /// LLM capability failure. The rewrite stage degrades; synthesis surfaces it.
    #[error("llm unavailable: {0}")]
    Llm(String),

    /// Session lookup miss.
    #[error("not found: {message}")]
    NotFound { message: String },

    /// Cooperative cancellation was requested.
    #[error("cancelled")]
    Cancelled,

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Session storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SitegistError>;

impl SitegistError {
    /// Create an invalid-URL error from any displayable message.
    pub fn invalid_url(msg: impl Into<String>) -> Self {
        Self::InvalidUrl {
            message: msg.into(),
        }
    }

    /// Create a transient fetch error.
    pub fn fetch_transient(msg: impl Into<String>) -> Self {
        Self::Fetch {
            kind: FetchKind::Transient,
            message: msg.into(),
        }
    }

    /// Create a permanent fetch error.
    pub fn fetch_permanent(msg: impl Into<String>) -> Self {
        Self::Fetch {
            kind: FetchKind::Permanent,
            message: msg.into(),
        }
    }

    /// Create a normalize error from any displayable message.
    pub fn normalize(msg: impl Into<String>) -> Self {
        Self::Normalize {
            message: msg.into(),
        }
    }

    /// Create a not-found error from any displayable message.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// True for fetch errors worth retrying on a later run.
    pub fn is_transient_fetch(&self) -> bool {
        matches!(
            self,
            Self::Fetch {
                kind: FetchKind::Transient,
                ..
            }
        )
    }
}
