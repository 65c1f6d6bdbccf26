//! WebSocket message shapes

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use super::validation::CreateGameRequest;

const CREATE_GAME: &str = "create_game";

/// Messages a socket client may send
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    CreateGame { data: CreateGameRequest },
}

/// Errors raised while handling inbound socket traffic
#[derive(Error, Debug)]
pub enum SinkError {
    #[error("Invalid message format: {0}")]
    MalformedMessage(#[from] serde_json::Error),
}

/// Parse one socket message. Well-formed JSON of a type the broker does not
/// handle yields `None`.
pub fn parse_client_message(raw: &str) -> Result<Option<ClientMessage>, SinkError> {
    let value: Value = serde_json::from_str(raw)?;
    match value.get("type").and_then(Value::as_str) {
        Some(CREATE_GAME) => Ok(Some(serde_json::from_value(value)?)),
        _ => Ok(None),
    }
}

/// Error reply sent back on the socket
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub error: String,
    pub timestamp: DateTime<Utc>,
}

impl ErrorMessage {
    pub fn new(error: impl Into<String>) -> Self {
        Self {
            kind: "error",
            error: error.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn malformed() -> Self {
        Self::new("Invalid message format")
    }
}
