//! Session storage on the file system.
//!
//! Each session owns a directory under the configured base path:
//!
//! ```text
//! {base}/{session_id}/metadata.json
//! {base}/{session_id}/request.json
//! {base}/{session_id}/cleaned_markdown/{domain}__{session_id}.json
//! ```
//!
//! Writes go through the orchestrator that owns the session; nothing else
//! mutates a session directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use sitegist_shared::{Result, ScrapeRequest, SessionMetadata, SitegistError};

/// Subdirectory holding normalized page content.
const CLEANED_MARKDOWN_DIR: &str = "cleaned_markdown";

// ---------------------------------------------------------------------------
// Cleaned markdown payload
// ---------------------------------------------------------------------------

/// One normalized page inside the cleaned-markdown file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedPage {
    pub page_name: String,
    pub page_url: String,
    pub content: String,
}

/// The `cleaned_markdown/{domain}__{session_id}.json` payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanedMarkdownFile {
    /// Domain the pages belong to.
    pub website: String,
    /// Human-readable site name used on chunk metadata.
    pub site_name: String,
    /// Normalized pages in scrape-completion order.
    pub pages: Vec<CleanedPage>,
}

impl CleanedMarkdownFile {
    /// File name for a domain/session pair.
    pub fn file_name(domain: &str, session_id: &str) -> String {
        format!("{domain}__{session_id}.json")
    }
}

// ---------------------------------------------------------------------------
// SessionStorage
// ---------------------------------------------------------------------------

/// File-system storage for session directories.
pub struct SessionStorage {
    base_path: PathBuf,
}

impl SessionStorage {
    /// Open storage rooted at `base_path`, creating it if needed.
    pub fn new(base_path: impl Into<PathBuf>) -> Result<Self> {
        let base_path = base_path.into();
        std::fs::create_dir_all(&base_path).map_err(|e| SitegistError::io(&base_path, e))?;
        Ok(Self { base_path })
    }

    /// Directory for one session.
    pub fn session_dir(&self, session_id: &str) -> PathBuf {
        self.base_path.join(session_id)
    }

    /// Create a session directory.
    pub fn create_session_dir(&self, session_id: &str) -> Result<PathBuf> {
        let dir = self.session_dir(session_id);
        std::fs::create_dir_all(&dir).map_err(|e| SitegistError::io(&dir, e))?;
        Ok(dir)
    }

    /// Persist session metadata.
    pub fn save_metadata(&self, metadata: &SessionMetadata) -> Result<()> {
        self.write_json(
            &self.session_dir(&metadata.session_id).join("metadata.json"),
            metadata,
        )
    }

    /// Load session metadata, or `None` if the session doesn't exist.
    pub fn load_metadata(&self, session_id: &str) -> Result<Option<SessionMetadata>> {
        self.read_json(&self.session_dir(session_id).join("metadata.json"))
    }

    /// Persist the original request.
    pub fn save_request(&self, session_id: &str, request: &ScrapeRequest) -> Result<()> {
        self.write_json(&self.session_dir(session_id).join("request.json"), request)
    }

    /// Load the original request.
    pub fn load_request(&self, session_id: &str) -> Result<Option<ScrapeRequest>> {
        self.read_json(&self.session_dir(session_id).join("request.json"))
    }

    /// Persist the normalized pages for a session.
    pub fn save_cleaned_markdown(
        &self,
        session_id: &str,
        file: &CleanedMarkdownFile,
    ) -> Result<PathBuf> {
        let dir = self.session_dir(session_id).join(CLEANED_MARKDOWN_DIR);
        std::fs::create_dir_all(&dir).map_err(|e| SitegistError::io(&dir, e))?;
        let path = dir.join(CleanedMarkdownFile::file_name(&file.website, session_id));
        self.write_json(&path, file)?;
        Ok(path)
    }

    /// Load a session's cleaned-markdown file, whatever its domain.
    pub fn load_cleaned_markdown(&self, session_id: &str) -> Result<Option<CleanedMarkdownFile>> {
        let dir = self.session_dir(session_id).join(CLEANED_MARKDOWN_DIR);
        if !dir.exists() {
            return Ok(None);
        }
        let entries = std::fs::read_dir(&dir).map_err(|e| SitegistError::io(&dir, e))?;
        for entry in entries.flatten() {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) == Some("json") {
                return self.read_json(&path);
            }
        }
        Ok(None)
    }

    /// Find a cleaned-markdown file by its file name across all sessions.
    pub fn find_cleaned_markdown(&self, filename: &str) -> Result<Option<CleanedMarkdownFile>> {
        for session_id in self.list_sessions()? {
            let path = self
                .session_dir(&session_id)
                .join(CLEANED_MARKDOWN_DIR)
                .join(filename);
            if path.exists() {
                return self.read_json(&path);
            }
        }
        Ok(None)
    }

    /// List session ids, newest first.
    ///
    /// Session ids embed their creation timestamp, so reverse-lexicographic
    /// order is reverse-chronological.
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let entries =
            std::fs::read_dir(&self.base_path).map_err(|e| SitegistError::io(&self.base_path, e))?;

        let mut sessions: Vec<String> = entries
            .flatten()
            .filter(|e| e.path().is_dir())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|name| !name.starts_with('.'))
            .collect();

        sessions.sort_by(|a, b| b.cmp(a));
        Ok(sessions)
    }

    /// Does a session directory exist?
    pub fn session_exists(&self, session_id: &str) -> bool {
        self.session_dir(session_id).exists()
    }

    /// Delete a session directory and everything in it. Returns `false`
    /// if the session didn't exist.
    pub fn delete_session(&self, session_id: &str) -> Result<bool> {
        let dir = self.session_dir(session_id);
        if !dir.exists() {
            return Ok(false);
        }
        std::fs::remove_dir_all(&dir).map_err(|e| SitegistError::io(&dir, e))?;
        Ok(true)
    }

    fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<()> {
        let json = serde_json::to_string_pretty(value)
            .map_err(|e| SitegistError::Storage(format!("serialize {}: {e}", path.display())))?;
        std::fs::write(path, json).map_err(|e| SitegistError::io(path, e))
    }

    fn read_json<T: for<'de> Deserialize<'de>>(&self, path: &Path) -> Result<Option<T>> {
        if !path.exists() {
            return Ok(None);
        }
        let content = std::fs::read_to_string(path).map_err(|e| SitegistError::io(path, e))?;
        let value = serde_json::from_str(&content)
            .map_err(|e| SitegistError::Storage(format!("parse {}: {e}", path.display())))?;
        Ok(Some(value))
    }
}
