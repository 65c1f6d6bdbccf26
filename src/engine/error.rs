//! Engine Error Types
//!
//! Failures of a single engine process. None of them is fatal beyond the
//! session that owns the process.

use thiserror::Error;

/// Errors raised by an [`EngineClient`](super::EngineClient)
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The process could not be created or its pipes were unavailable
    #[error("Failed to spawn engine: {0}")]
    SpawnFailed(String),

    /// The completion line did not arrive before the deadline
    #[error("Engine command '{command}' timed out after {timeout_ms}ms")]
    Timeout { command: String, timeout_ms: u64 },

    /// The process exited or its output stream broke
    #[error("Engine process terminated{}", .0.map(|c| format!(" with exit code {}", c)).unwrap_or_default())]
    ProcessTerminated(Option<i32>),

    /// Bytes could not be delivered to the process
    #[error("Failed to write to engine: {0}")]
    WriteFailed(String),

    /// The session was torn down while the request was pending
    #[error("Engine request cancelled")]
    Cancelled,
}

impl EngineError {
    /// Returns true if this is a timeout error.
    pub fn is_timeout(&self) -> bool {
        matches!(self, EngineError::Timeout { .. })
    }

    /// Returns true if the process is gone and the client can no longer be used.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineError::ProcessTerminated(_) | EngineError::Cancelled | EngineError::SpawnFailed(_)
        )
    }
}

/// Result type alias for engine operations
pub type EngineResult<T> = Result<T, EngineError>;
