//! Session Management Module
//!
//! Many concurrent engine sessions, each with:
//! - An idle/running/ended lifecycle enforced by the manager
//! - At most one attached engine process
//! - Engine output and lifecycle changes republished as one event stream

pub mod events;
pub mod manager;
pub mod state;

pub use events::{SessionEvent, SessionEventKind};
pub use manager::{ManagerSettings, SessionError, SessionEvents, SessionManager};
pub use state::{
    NewSession, ParameterUpdate, SessionInfo, SessionParameters, SessionRecord, SessionStatus,
};
