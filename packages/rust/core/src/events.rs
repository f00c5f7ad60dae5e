//! Session progress events.
//!
//! Each running session owns a bounded broadcast bus. The orchestrator
//! writes fire-and-forget; subscribers read until the terminal event, after
//! which the sender is dropped and the stream ends. There are no
//! back-pointers from session state to subscribers.

use serde::Serialize;
use tokio::sync::broadcast;

use sitegist_shared::SessionStatus;

/// Bounded channel capacity; a lagging subscriber skips events rather than
/// slowing the pipeline.
const CHANNEL_CAPACITY: usize = 256;

/// One progress event for a session.
#[derive(Debug, Clone, Serialize)]
pub struct SessionEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub payload: EventPayload,
}

/// Event payloads emitted over a session's lifetime.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    SessionCreated {
        status: SessionStatus,
    },
    StatusChanged {
        status: SessionStatus,
    },
    UrlsDiscovered {
        count: usize,
        #[serde(skip_serializing_if = "Option::is_none")]
        warning: Option<String>,
    },
    PageScraped {
        url: String,
        pages_scraped: u64,
        total_pages: u64,
    },
    PageFailed {
        url: String,
        error: String,
    },
    Completed {
        pages_scraped: u64,
        failures: u64,
        total_pages: u64,
        duration_seconds: f64,
    },
    Failed {
        error: String,
    },
}

impl EventPayload {
    /// Terminal events close the stream.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed { .. } | Self::Failed { .. })
    }
}

/// Broadcast bus for one session's events.
#[derive(Clone)]
pub struct EventBus {
    session_id: String,
    sender: broadcast::Sender<SessionEvent>,
}

impl EventBus {
    pub fn new(session_id: impl Into<String>) -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self {
            session_id: session_id.into(),
            sender,
        }
    }

    /// Subscribe to this session's events.
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Emit an event. Absent or lagging subscribers are not an error.
    pub fn emit(&self, payload: EventPayload) {
        let _ = self.sender.send(SessionEvent {
            session_id: self.session_id.clone(),
            payload,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn events_reach_subscribers_in_order() {
        let bus = EventBus::new("s1");
        let mut rx = bus.subscribe();

        bus.emit(EventPayload::SessionCreated {
            status: SessionStatus::Pending,
        });
        bus.emit(EventPayload::StatusChanged {
            status: SessionStatus::InProgress,
        });

        let first = rx.recv().await.unwrap();
        assert_eq!(first.session_id, "s1");
        assert!(matches!(first.payload, EventPayload::SessionCreated { .. }));
        let second = rx.recv().await.unwrap();
        assert!(matches!(second.payload, EventPayload::StatusChanged { .. }));
    }

    #[tokio::test]
    async fn emit_without_subscribers_is_fine() {
        let bus = EventBus::new("s1");
        bus.emit(EventPayload::Failed {
            error: "boom".into(),
        });
    }

    #[tokio::test]
    async fn stream_ends_after_sender_drops() {
        let bus = EventBus::new("s1");
        let mut rx = bus.subscribe();
        bus.emit(EventPayload::Completed {
            pages_scraped: 1,
            failures: 0,
            total_pages: 1,
            duration_seconds: 0.5,
        });
        drop(bus);

        let event = rx.recv().await.unwrap();
        assert!(event.payload.is_terminal());
        assert!(rx.recv().await.is_err());
    }

    #[test]
    fn payload_serialization_is_tagged() {
        let event = SessionEvent {
            session_id: "s1".into(),
            payload: EventPayload::PageScraped {
                url: "https://example.com/a".into(),
                pages_scraped: 1,
                total_pages: 3,
            },
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"page_scraped\""));
        assert!(json.contains("\"session_id\":\"s1\""));
    }
}
