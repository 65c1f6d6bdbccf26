//! USI engine process plumbing: spawning, line framing, request/response
//! correlation and the small slice of protocol vocabulary the broker uses.

pub mod client;
pub mod error;
pub mod framing;
pub mod protocol;
mod queue;

pub use client::{EngineClient, EngineCommand, EngineEvent, EngineEvents, EngineIdentity};
pub use error::{EngineError, EngineResult};
pub use framing::LineFramer;
pub use protocol::{BestMove, Completion, GoParams};
