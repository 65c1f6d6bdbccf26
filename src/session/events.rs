//! Session Events
//!
//! The single event shape the manager publishes. Each event names the
//! session it belongs to and is never changed after emission.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::state::{SessionInfo, SessionStatus};

/// One entry of the unified event stream
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionEvent {
    pub session_id: String,
    #[serde(flatten)]
    pub kind: SessionEventKind,
    pub timestamp: DateTime<Utc>,
}

/// Event payloads
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum SessionEventKind {
    /// A session was registered
    SessionCreated { session: SessionInfo },

    /// Lifecycle moved between states
    SessionStateChanged {
        old_state: SessionStatus,
        new_state: SessionStatus,
        session: SessionInfo,
    },

    /// One line of engine output
    ResponseReceived { line: String },

    /// Start, search or the engine process failed
    SessionFailed { error: String },
}

impl SessionEvent {
    pub fn new(session_id: impl Into<String>, kind: SessionEventKind) -> Self {
        Self {
            session_id: session_id.into(),
            kind,
            timestamp: Utc::now(),
        }
    }

    pub fn created(session: SessionInfo) -> Self {
        Self::new(session.id.clone(), SessionEventKind::SessionCreated { session })
    }

    pub fn state_changed(old_state: SessionStatus, session: SessionInfo) -> Self {
        Self::new(
            session.id.clone(),
            SessionEventKind::SessionStateChanged {
                old_state,
                new_state: session.state,
                session,
            },
        )
    }

    pub fn response(session_id: impl Into<String>, line: impl Into<String>) -> Self {
        Self::new(session_id, SessionEventKind::ResponseReceived { line: line.into() })
    }

    pub fn failed(session_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self::new(session_id, SessionEventKind::SessionFailed { error: error.into() })
    }

    /// Get the session ID from any event
    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    /// Wire name of the event type
    pub fn event_name(&self) -> &'static str {
        match self.kind {
            SessionEventKind::SessionCreated { .. } => "session_created",
            SessionEventKind::SessionStateChanged { .. } => "session_state_changed",
            SessionEventKind::ResponseReceived { .. } => "response_received",
            SessionEventKind::SessionFailed { .. } => "session_failed",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_names() {
        let event = SessionEvent::response("test-123", "bestmove 7g7f");

        assert_eq!(event.event_name(), "response_received");
        assert_eq!(event.session_id(), "test-123");
    }

    #[test]
    fn test_event_wire_format() {
        let event = SessionEvent::failed("test-123", "Engine process terminated");
        let json = serde_json::to_value(&event).unwrap();

        assert_eq!(json["type"], "session_failed");
        assert_eq!(json["sessionId"], "test-123");
        assert_eq!(json["error"], "Engine process terminated");
        assert!(json["timestamp"].is_string());
    }

    #[test]
    fn test_event_deserializes() {
        let event = SessionEvent::new(
            "g",
            SessionEventKind::ResponseReceived {
                line: "readyok".to_string(),
            },
        );
        let json = serde_json::to_string(&event).unwrap();
        let back: SessionEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(back.kind, event.kind);
        assert_eq!(back.event_name(), event.event_name());
    }
}
