//! Session State Management
//!
//! Tracks the lifecycle and game parameters of individual engine sessions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::engine::{EngineCommand, GoParams};

/// Default starting position
pub const DEFAULT_POSITION: &str = "startpos";
/// Default main time per side, in milliseconds
pub const DEFAULT_TIME_LIMIT: u64 = 60_000;
/// Default per-move increment, in milliseconds
pub const DEFAULT_BYOYOMI: u64 = 10_000;

/// Lifecycle state of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Created, no engine attached yet
    #[default]
    Idle,
    /// Engine attached and handshake done
    Running,
    /// Terminal
    Ended,
}

impl SessionStatus {
    /// Whether the lifecycle allows moving from `self` to `next`
    pub fn can_transition_to(self, next: SessionStatus) -> bool {
        matches!(
            (self, next),
            (Self::Idle, Self::Running) | (Self::Idle, Self::Ended) | (Self::Running, Self::Ended)
        )
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Ended
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Running => write!(f, "running"),
            Self::Ended => write!(f, "ended"),
        }
    }
}

/// Game parameters applied when the session starts
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionParameters {
    pub position: String,
    pub time_limit: u64,
    pub byoyomi: u64,
}

impl Default for SessionParameters {
    fn default() -> Self {
        Self {
            position: DEFAULT_POSITION.to_string(),
            time_limit: DEFAULT_TIME_LIMIT,
            byoyomi: DEFAULT_BYOYOMI,
        }
    }
}

impl SessionParameters {
    /// Clock for the opening search: both sides get the time limit, byoyomi
    /// is used as the per-move increment
    pub fn go_params(&self) -> GoParams {
        GoParams::clock(self.time_limit, self.byoyomi)
    }
}

/// Partial parameter update; absent fields keep their value
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ParameterUpdate {
    pub position: Option<String>,
    pub time_limit: Option<u64>,
    pub byoyomi: Option<u64>,
}

/// Request to register a new session
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewSession {
    pub owner: String,
    pub engine: EngineCommand,
    pub parameters: SessionParameters,
}

impl NewSession {
    pub fn new(owner: impl Into<String>, engine: EngineCommand) -> Self {
        Self {
            owner: owner.into(),
            engine,
            parameters: SessionParameters::default(),
        }
    }

    pub fn with_parameters(mut self, parameters: SessionParameters) -> Self {
        self.parameters = parameters;
        self
    }
}

/// Registry entry for one session
#[derive(Debug, Clone)]
pub struct SessionRecord {
    /// Unique session identifier
    pub id: String,
    /// Caller-supplied label
    pub owner: String,
    /// Engine launched on start
    pub engine: EngineCommand,
    pub status: SessionStatus,
    pub parameters: SessionParameters,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// A start is in flight; a second start must be refused
    pub starting: bool,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>, request: NewSession) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            owner: request.owner,
            engine: request.engine,
            status: SessionStatus::Idle,
            parameters: request.parameters,
            created_at: now,
            updated_at: now,
            starting: false,
        }
    }

    /// Move to `next`, returning the previous status, or `None` if the
    /// lifecycle forbids it
    pub fn transition(&mut self, next: SessionStatus) -> Option<SessionStatus> {
        if !self.status.can_transition_to(next) {
            return None;
        }
        let old = self.status;
        self.status = next;
        self.touch();
        Some(old)
    }

    pub fn apply(&mut self, update: ParameterUpdate) {
        if let Some(position) = update.position {
            self.parameters.position = position;
        }
        if let Some(time_limit) = update.time_limit {
            self.parameters.time_limit = time_limit;
        }
        if let Some(byoyomi) = update.byoyomi {
            self.parameters.byoyomi = byoyomi;
        }
        self.touch();
    }

    fn touch(&mut self) {
        self.updated_at = Utc::now();
    }
}

/// Serializable session info for API responses
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionInfo {
    pub id: String,
    pub player: String,
    pub engine_path: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub engine_args: Vec<String>,
    pub state: SessionStatus,
    pub position: String,
    pub time_limit: u64,
    pub byoyomi: u64,
    pub created_at: String,
    pub updated_at: String,
}

impl From<&SessionRecord> for SessionInfo {
    fn from(record: &SessionRecord) -> Self {
        Self {
            id: record.id.clone(),
            player: record.owner.clone(),
            engine_path: record.engine.program.clone(),
            engine_args: record.engine.args.clone(),
            state: record.status,
            position: record.parameters.position.clone(),
            time_limit: record.parameters.time_limit,
            byoyomi: record.parameters.byoyomi,
            created_at: record.created_at.to_rfc3339(),
            updated_at: record.updated_at.to_rfc3339(),
        }
    }
}
