//! Core domain types for sitegist sessions, pages, and search hits.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use url::Url;
use uuid::Uuid;

use crate::error::{Result, SitegistError};

// ---------------------------------------------------------------------------
// SessionStatus / ScrapeMode
// ---------------------------------------------------------------------------

/// Lifecycle state of a scrape session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

impl SessionStatus {
    /// Completed and failed sessions never change again.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Whether a session scrapes one page or a whole site.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ScrapeMode {
    #[serde(rename = "single-page")]
    SinglePage,
    #[serde(rename = "whole-site")]
    WholeSite,
}

impl std::fmt::Display for ScrapeMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::SinglePage => "single-page",
            Self::WholeSite => "whole-site",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// ScrapeRequest / SessionMetadata
// ---------------------------------------------------------------------------

/// The caller's request to start a session, persisted as `request.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapeRequest {
    /// Absolute URL to ingest.
    pub url: String,
    /// Single-page or whole-site.
    pub mode: ScrapeMode,
    /// Free-text purpose of the scrape, if the caller provided one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
}

/// The `metadata.json` record for a session, owned by its orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionMetadata {
    /// Unique session identifier (timestamp + short random tag).
    pub session_id: String,
    /// Current lifecycle state.
    pub status: SessionStatus,
    /// The URL the session was started with.
    pub url: String,
    /// Scrape mode.
    pub mode: ScrapeMode,
    /// Free-text purpose, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub purpose: Option<String>,
    /// When the session was created.
    pub created_at: DateTime<Utc>,
    /// When the session was last mutated.
    pub updated_at: DateTime<Utc>,
    /// Deduplicated discovered URL count; 0 until discovery completes.
    #[serde(default)]
    pub total_pages: u64,
    /// Pages attempted and successfully scraped so far (monotonic).
    #[serde(default)]
    pub pages_scraped: u64,
    /// Pages attempted that failed (fetch, normalize, or empty content).
    #[serde(default)]
    pub failures: u64,
    /// Wall-clock duration, set on the terminal transition.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
    /// Failure reason, set when status is failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

impl SessionMetadata {
    /// Create a fresh pending session record for a request.
    pub fn new(session_id: impl Into<String>, request: &ScrapeRequest) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            status: SessionStatus::Pending,
            url: request.url.clone(),
            mode: request.mode,
            purpose: request.purpose.clone(),
            created_at: now,
            updated_at: now,
            total_pages: 0,
            pages_scraped: 0,
            failures: 0,
            duration_seconds: None,
            error_message: None,
        }
    }
}

/// Generate a session id: `YYYYMMDD_HHMMSS_{8-hex}`.
///
/// The timestamp keeps directory listings chronologically sortable; the
/// random tag disambiguates sessions started within the same second.
pub fn generate_session_id() -> String {
    let timestamp = Utc::now().format("%Y%m%d_%H%M%S");
    let tag = Uuid::new_v4().simple().to_string();
    format!("{timestamp}_{}", &tag[..8])
}

// ---------------------------------------------------------------------------
// PageRecord
// ---------------------------------------------------------------------------

/// One successfully scraped and normalized page.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageRecord {
    /// Canonical absolute URL.
    pub url: String,
    /// Registrable host of `url`, without scheme. The vector store's sole
    /// partitioning key.
    pub domain: String,
    /// Extracted page title.
    pub title: String,
    /// Normalized Markdown content.
    pub markdown: String,
    /// When the page was fetched.
    pub fetched_at: DateTime<Utc>,
    /// SHA-256 of the Markdown content.
    pub content_hash: String,
}

impl PageRecord {
    /// Build a record from a fetched page, deriving `domain` from the URL.
    pub fn new(url: &Url, title: impl Into<String>, markdown: impl Into<String>) -> Result<Self> {
        let domain = domain_of(url)?;
        let markdown = markdown.into();
        let content_hash = sha256_hex(&markdown);
        Ok(Self {
            url: url.to_string(),
            domain,
            title: title.into(),
            markdown,
            fetched_at: Utc::now(),
            content_hash,
        })
    }
}

/// Extract the lowercased host from a URL, the partition key for all chunks.
pub fn domain_of(url: &Url) -> Result<String> {
    url.host_str()
        .map(|h| h.to_ascii_lowercase())
        .ok_or_else(|| SitegistError::invalid_url(format!("URL has no host: {url}")))
}

/// Derive a short page name from a URL path: the last non-empty segment
/// without its file extension, or `"home"` for the root.
pub fn page_name_from_url(url: &Url) -> String {
    let segments: Vec<&str> = url
        .path()
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();

    let Some(&last) = segments.last() else {
        return "home".to_string();
    };

    let name = match last.rsplit_once('.') {
        Some((stem, _ext)) if !stem.is_empty() => stem,
        _ => last,
    };

    if name.is_empty() {
        segments
            .get(segments.len().wrapping_sub(2))
            .unwrap_or(&"home")
            .to_string()
    } else {
        name.to_string()
    }
}

/// Hex-encoded SHA-256 of a string.
pub fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

// ---------------------------------------------------------------------------
// Hit
// ---------------------------------------------------------------------------

/// A single similarity-search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Hit {
    /// Stable chunk identifier (`{domain}_{page_name}_{ordinal}`).
    pub chunk_id: String,
    /// Owning domain.
    pub domain: String,
    /// Human-readable site name.
    pub site_name: String,
    /// Page name within the site.
    pub page_name: String,
    /// Source page URL.
    pub page_url: String,
    /// The chunk text.
    pub chunk_text: String,
    /// Similarity score; higher is more similar.
    pub score: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_serializes_snake_case() {
        let json = serde_json::to_string(&SessionStatus::InProgress).unwrap();
        assert_eq!(json, "\"in_progress\"");
        let parsed: SessionStatus = serde_json::from_str("\"completed\"").unwrap();
        assert_eq!(parsed, SessionStatus::Completed);
    }

    #[test]
    fn mode_serializes_kebab_case() {
        let json = serde_json::to_string(&ScrapeMode::WholeSite).unwrap();
        assert_eq!(json, "\"whole-site\"");
        let parsed: ScrapeMode = serde_json::from_str("\"single-page\"").unwrap();
        assert_eq!(parsed, ScrapeMode::SinglePage);
    }

    #[test]
    fn terminal_states() {
        assert!(!SessionStatus::Pending.is_terminal());
        assert!(!SessionStatus::InProgress.is_terminal());
        assert!(SessionStatus::Completed.is_terminal());
        assert!(SessionStatus::Failed.is_terminal());
    }

    #[test]
    fn session_id_shape() {
        let id = generate_session_id();
        // YYYYMMDD_HHMMSS_xxxxxxxx
        assert_eq!(id.len(), 8 + 1 + 6 + 1 + 8);
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3);
        assert!(parts[0].chars().all(|c| c.is_ascii_digit()));
        assert!(parts[2].chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn session_ids_are_unique() {
        let a = generate_session_id();
        let b = generate_session_id();
        assert_ne!(a, b);
    }

    #[test]
    fn page_record_derives_domain() {
        let url = Url::parse("https://Example.COM/about").unwrap();
        let record = PageRecord::new(&url, "About", "# About Us").unwrap();
        assert_eq!(record.domain, "example.com");
        assert_eq!(record.content_hash.len(), 64);
    }

    #[test]
    fn page_name_extraction() {
        let cases = [
            ("https://example.com/", "home"),
            ("https://example.com/about", "about"),
            ("https://example.com/about/", "about"),
            ("https://example.com/docs/getting-started.html", "getting-started"),
            ("https://example.com/a/b/c.php", "c"),
        ];
        for (url, expected) in cases {
            let url = Url::parse(url).unwrap();
            assert_eq!(page_name_from_url(&url), expected, "url: {url}");
        }
    }

    #[test]
    fn metadata_roundtrip() {
        let request = ScrapeRequest {
            url: "https://example.com".into(),
            mode: ScrapeMode::WholeSite,
            purpose: Some("test".into()),
        };
        let meta = SessionMetadata::new(generate_session_id(), &request);
        let json = serde_json::to_string_pretty(&meta).unwrap();
        let parsed: SessionMetadata = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.session_id, meta.session_id);
        assert_eq!(parsed.status, SessionStatus::Pending);
        assert_eq!(parsed.total_pages, 0);
        // Optional terminal fields are omitted while unset
        assert!(!json.contains("error_message"));
        assert!(!json.contains("duration_seconds"));
    }

    #[test]
    fn sha256_is_stable() {
        assert_eq!(
            sha256_hex("hello world"),
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }
}
