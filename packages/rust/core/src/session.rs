//! Session lifecycle management.
//!
//! [`SessionManager`] owns metadata mutation for every session: status
//! transitions, progress counters, and terminal bookkeeping. All writes go
//! through one lock and are persisted immediately, so a crash mid-session
//! leaves consistent metadata on disk.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::Mutex;
use tracing::instrument;

use sitegist_shared::{
    generate_session_id, Result, ScrapeRequest, SessionMetadata, SessionStatus, SitegistError,
};

use crate::storage::SessionStorage;

/// Manager for session lifecycle and state tracking.
pub struct SessionManager {
    storage: Arc<SessionStorage>,
    /// In-memory cache of live sessions for quick status checks.
    active: Mutex<HashMap<String, SessionMetadata>>,
}

impl SessionManager {
    pub fn new(storage: Arc<SessionStorage>) -> Self {
        Self {
            storage,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Create a new pending session: directory, metadata, and request file.
    #[instrument(skip_all, fields(url = %request.url, mode = %request.mode))]
    pub async fn initialize_session(&self, request: &ScrapeRequest) -> Result<SessionMetadata> {
        let mut active = self.active.lock().await;

        let session_id = generate_session_id();
        let metadata = SessionMetadata::new(&session_id, request);

        self.storage.create_session_dir(&session_id)?;
        self.storage.save_metadata(&metadata)?;
        self.storage.save_request(&session_id, request)?;

        active.insert(session_id, metadata.clone());
        Ok(metadata)
    }

    /// Update session status. Terminal transitions also record the error
    /// message and wall-clock duration.
    pub async fn update_status(
        &self,
        session_id: &str,
        status: SessionStatus,
        error_message: Option<String>,
    ) -> Result<SessionMetadata> {
        self.mutate(session_id, |meta| {
            meta.status = status;
            if let Some(message) = error_message {
                meta.error_message = Some(message);
            }
            if status.is_terminal() {
                let elapsed = Utc::now().signed_duration_since(meta.created_at);
                meta.duration_seconds = Some(elapsed.num_milliseconds() as f64 / 1000.0);
            }
        })
        .await
    }

    /// Record the discovered URL count. Set exactly once, before any page
    /// counters move.
    pub async fn set_total_pages(&self, session_id: &str, total: u64) -> Result<SessionMetadata> {
        self.mutate(session_id, |meta| meta.total_pages = total).await
    }

    /// Record one attempted page: success bumps `pages_scraped`, failure
    /// bumps `failures`. Both counters are monotonic.
    pub async fn record_page_result(
        &self,
        session_id: &str,
        success: bool,
    ) -> Result<SessionMetadata> {
        self.mutate(session_id, |meta| {
            if success {
                meta.pages_scraped += 1;
            } else {
                meta.failures += 1;
            }
        })
        .await
    }

    /// Get session metadata, preferring the in-memory copy.
    pub async fn get_metadata(&self, session_id: &str) -> Result<SessionMetadata> {
        if let Some(meta) = self.active.lock().await.get(session_id) {
            return Ok(meta.clone());
        }
        self.storage
            .load_metadata(session_id)?
            .ok_or_else(|| SitegistError::not_found(format!("session {session_id}")))
    }

    /// List all sessions, newest first.
    pub async fn list_sessions(&self) -> Result<Vec<SessionMetadata>> {
        let mut sessions = Vec::new();
        for session_id in self.storage.list_sessions()? {
            if let Some(meta) = self.storage.load_metadata(&session_id)? {
                sessions.push(meta);
            }
        }
        Ok(sessions)
    }

    /// Delete a session and its directory.
    pub async fn delete_session(&self, session_id: &str) -> Result<()> {
        let mut active = self.active.lock().await;
        active.remove(session_id);
        if self.storage.delete_session(session_id)? {
            Ok(())
        } else {
            Err(SitegistError::not_found(format!("session {session_id}")))
        }
    }

    /// Load, mutate, persist, and cache metadata under the manager lock.
    async fn mutate<F>(&self, session_id: &str, apply: F) -> Result<SessionMetadata>
    where
        F: FnOnce(&mut SessionMetadata),
    {
        let mut active = self.active.lock().await;

        let mut metadata = match active.get(session_id) {
            Some(meta) => meta.clone(),
            None => self
                .storage
                .load_metadata(session_id)?
                .ok_or_else(|| SitegistError::not_found(format!("session {session_id}")))?,
        };

        apply(&mut metadata);
        metadata.updated_at = Utc::now();

        self.storage.save_metadata(&metadata)?;
        active.insert(session_id.to_string(), metadata.clone());
        Ok(metadata)
    }
}
