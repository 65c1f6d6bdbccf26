//! Session Manager
//!
//! Concurrent session registry using DashMap. Owns every engine process,
//! drives the idle/running/ended lifecycle and republishes engine output and
//! lifecycle changes to every subscriber.

use dashmap::DashMap;
use futures::future::join_all;
use log::{debug, error, info, warn};
use parking_lot::Mutex;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::mpsc;
use uuid::Uuid;

use super::events::SessionEvent;
use super::state::{NewSession, ParameterUpdate, SessionInfo, SessionRecord, SessionStatus};
use crate::engine::protocol::BEST_MOVE;
use crate::engine::{EngineClient, EngineCommand, EngineError, EngineEvent, EngineEvents};

/// Tunables for a [`SessionManager`]
#[derive(Debug, Clone)]
pub struct ManagerSettings {
    /// Deadline for each handshake command
    pub command_timeout: Duration,
    /// Extra time granted to a search on top of its clock budget
    pub search_margin: Duration,
}

impl Default for ManagerSettings {
    fn default() -> Self {
        Self {
            command_timeout: Duration::from_secs(10),
            search_margin: Duration::from_secs(5),
        }
    }
}

/// Receiving end of [`SessionManager::subscribe`]. Unbounded, so a slow
/// reader never loses events.
pub type SessionEvents = mpsc::UnboundedReceiver<SessionEvent>;

/// Session Manager - owns all sessions and their engine processes
#[derive(Clone)]
pub struct SessionManager {
    /// All sessions (session_id -> SessionRecord)
    sessions: Arc<DashMap<String, SessionRecord>>,
    /// Attached engines (session_id -> EngineClient). Removing an entry
    /// detaches the engine.
    engines: Arc<DashMap<String, Arc<EngineClient>>>,
    subscribers: Arc<Mutex<Vec<mpsc::UnboundedSender<SessionEvent>>>>,
    settings: ManagerSettings,
}

impl SessionManager {
    /// Create a new session manager
    pub fn new() -> Self {
        Self::with_settings(ManagerSettings::default())
    }

    pub fn with_settings(settings: ManagerSettings) -> Self {
        Self {
            sessions: Arc::new(DashMap::new()),
            engines: Arc::new(DashMap::new()),
            subscribers: Arc::new(Mutex::new(Vec::new())),
            settings,
        }
    }

    pub fn settings(&self) -> &ManagerSettings {
        &self.settings
    }

    /// Subscribe to the unified event stream
    pub fn subscribe(&self) -> SessionEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().push(tx);
        rx
    }

    fn emit(&self, event: SessionEvent) {
        debug!("[{}] event {}", event.session_id(), event.event_name());
        // Sending under the lock keeps every subscriber in emit order
        let mut subscribers = self.subscribers.lock();
        subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    /// Register a new idle session
    pub fn create_session(&self, request: NewSession) -> SessionInfo {
        let id = Uuid::new_v4().to_string();
        let record = SessionRecord::new(&id, request);
        let info = SessionInfo::from(&record);
        self.sessions.insert(id.clone(), record);

        info!("Created session: {} (player {})", id, info.player);
        self.emit(SessionEvent::created(info.clone()));
        info
    }

    pub fn get_session(&self, session_id: &str) -> Option<SessionInfo> {
        self.sessions.get(session_id).map(|r| SessionInfo::from(r.value()))
    }

    /// All sessions, oldest first
    pub fn list_sessions(&self) -> Vec<SessionInfo> {
        let mut records: Vec<SessionInfo> = self
            .sessions
            .iter()
            .map(|r| SessionInfo::from(r.value()))
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        records
    }

    /// Number of sessions in the running state
    pub fn running_count(&self) -> usize {
        self.sessions
            .iter()
            .filter(|r| r.status == SessionStatus::Running)
            .count()
    }

    /// Number of sessions with an engine process attached
    pub fn attached_count(&self) -> usize {
        self.engines.len()
    }

    /// Change game parameters of an idle session
    pub fn update_parameters(
        &self,
        session_id: &str,
        update: ParameterUpdate,
    ) -> Result<SessionInfo, SessionError> {
        let mut record = self
            .sessions
            .get_mut(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;

        if record.status != SessionStatus::Idle {
            return Err(SessionError::invalid_state(&record, "update parameters"));
        }
        if record.starting {
            return Err(SessionError::AlreadyStarting(session_id.to_string()));
        }

        record.apply(update);
        Ok(SessionInfo::from(&*record))
    }

    /// Spawn the engine, run the handshake and open the game
    pub async fn start_session(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        let command = {
            let mut record = self
                .sessions
                .get_mut(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            if record.status != SessionStatus::Idle {
                return Err(SessionError::invalid_state(&record, "start"));
            }
            if record.starting {
                return Err(SessionError::AlreadyStarting(session_id.to_string()));
            }
            record.starting = true;
            record.engine.clone()
        };

        info!("[{}] Starting engine {}", session_id, command.program);

        let (client, events) = match self.launch(session_id, &command).await {
            Ok(launched) => launched,
            Err(e) => {
                if let Some(mut record) = self.sessions.get_mut(session_id) {
                    record.starting = false;
                }
                error!("[{}] Failed to start engine: {}", session_id, e);
                self.emit(SessionEvent::failed(session_id, e.to_string()));
                return Err(e.into());
            }
        };

        let attached = match self.sessions.get_mut(session_id) {
            Some(mut record) => {
                record.starting = false;
                match record.transition(SessionStatus::Running) {
                    Some(old) => {
                        self.engines
                            .insert(session_id.to_string(), Arc::clone(&client));
                        Ok((old, SessionInfo::from(&*record)))
                    }
                    None => Err(SessionError::invalid_state(&record, "start")),
                }
            }
            None => Err(SessionError::NotFound(session_id.to_string())),
        };

        let (old, info) = match attached {
            Ok(attached) => attached,
            Err(e) => {
                // Ended or removed while the handshake was in flight
                warn!("[{}] Discarding engine: {}", session_id, e);
                let _ = client.quit().await;
                return Err(e);
            }
        };

        info!("[{}] Session running ({})", session_id, client.label());
        self.emit(SessionEvent::state_changed(old, info.clone()));

        tokio::spawn(
            self.clone()
                .listen(session_id.to_string(), Arc::downgrade(&client), events),
        );

        if let Err(e) = client.new_game().await {
            warn!("[{}] Failed to send usinewgame: {}", session_id, e);
        }

        let manager = self.clone();
        let id = session_id.to_string();
        tokio::spawn(async move {
            match manager.search(&id, None).await {
                Ok(line) => debug!("[{}] Opening search finished: {}", id, line),
                Err(SessionError::Engine(e)) if e.is_timeout() => {
                    warn!("[{}] Opening search timed out", id);
                    manager.emit(SessionEvent::failed(&id, e.to_string()));
                }
                Err(e) => debug!("[{}] Opening search did not finish: {}", id, e),
            }
        });

        Ok(info)
    }

    async fn launch(
        &self,
        session_id: &str,
        command: &EngineCommand,
    ) -> Result<(Arc<EngineClient>, EngineEvents), EngineError> {
        let (client, mut events) = EngineClient::spawn(command)?;

        match client.handshake(self.settings.command_timeout).await {
            Ok(identity) => {
                info!(
                    "[{}] Engine ready: {}",
                    session_id,
                    identity.name.as_deref().unwrap_or("unnamed")
                );
                Ok((Arc::new(client), events))
            }
            Err(e) => {
                if let Err(quit_err) = client.quit().await {
                    debug!("[{}] quit after failed handshake: {}", session_id, quit_err);
                }
                drop(client);

                // Publish whatever the engine managed to say
                while let Ok(event) = events.try_recv() {
                    if let EngineEvent::Response(line) = event {
                        self.emit(SessionEvent::response(session_id, line));
                    }
                }
                Err(e)
            }
        }
    }

    /// Send `position` and `go` for a running session and wait for the best
    /// move line. Uses the session's stored position unless one is given.
    pub async fn search(
        &self,
        session_id: &str,
        position: Option<&str>,
    ) -> Result<String, SessionError> {
        let parameters = {
            let record = self
                .sessions
                .get(session_id)
                .ok_or_else(|| SessionError::NotFound(session_id.to_string()))?;
            if record.status != SessionStatus::Running {
                return Err(SessionError::invalid_state(&record, "search"));
            }
            record.parameters.clone()
        };
        let client = self.attached(session_id)?;

        client
            .position(position.unwrap_or(&parameters.position))
            .await?;

        let go = parameters.go_params();
        let timeout = Duration::from_millis(go.budget_ms()) + self.settings.search_margin;
        Ok(client.go(&go, timeout).await?)
    }

    /// Ask the engine to halt and end the session. The process stays
    /// attached until [`end_session`](Self::end_session).
    pub async fn stop_session(&self, session_id: &str) -> Result<SessionInfo, SessionError> {
        if !self.sessions.contains_key(session_id) {
            return Err(SessionError::NotFound(session_id.to_string()));
        }
        let client = self.attached(session_id)?;

        if let Some(record) = self.sessions.get(session_id) {
            if record.status != SessionStatus::Running {
                return Err(SessionError::invalid_state(&record, "stop"));
            }
        }

        client.stop().await?;
        info!("[{}] Stop sent", session_id);

        self.mark_ended(session_id);
        self.get_session(session_id)
            .ok_or_else(|| SessionError::NotFound(session_id.to_string()))
    }

    /// Mark the session ended, then detach and quit the engine (if any).
    /// Safe to call repeatedly.
    pub async fn end_session(&self, session_id: &str) {
        // Ended first: a start still in its handshake can no longer attach
        self.mark_ended(session_id);
        if let Some((_, client)) = self.engines.remove(session_id) {
            debug!("[{}] Detached {}", session_id, client.label());
            if let Err(e) = client.quit().await {
                warn!("[{}] Failed to send quit: {}", session_id, e);
            }
        }
    }

    /// End every session that still has an engine attached
    pub async fn terminate_all(&self) {
        let ids: Vec<String> = self.engines.iter().map(|e| e.key().clone()).collect();
        info!("Terminating {} sessions...", ids.len());

        join_all(ids.iter().map(|id| self.end_session(id))).await;

        let leftover = self.attached_count();
        if leftover > 0 {
            error!("{} engines still attached after terminate_all", leftover);
        }
        info!("All sessions terminated");
    }

    fn attached(&self, session_id: &str) -> Result<Arc<EngineClient>, SessionError> {
        self.engines
            .get(session_id)
            .map(|e| Arc::clone(e.value()))
            .ok_or_else(|| SessionError::NotAttached(session_id.to_string()))
    }

    fn mark_ended(&self, session_id: &str) {
        let changed = match self.sessions.get_mut(session_id) {
            Some(mut record) => record
                .transition(SessionStatus::Ended)
                .map(|old| (old, SessionInfo::from(&*record))),
            None => {
                debug!("End requested for unknown session {}", session_id);
                None
            }
        };

        if let Some((old, info)) = changed {
            info!("[{}] Session ended (was {})", session_id, old);
            self.emit(SessionEvent::state_changed(old, info));
        }
    }

    /// Translate engine output into session events until the process is gone
    async fn listen(self, session_id: String, engine: Weak<EngineClient>, mut events: EngineEvents) {
        while let Some(event) = events.recv().await {
            match event {
                EngineEvent::Response(line) => {
                    if line.starts_with(BEST_MOVE) {
                        info!("[{}] {}", session_id, line);
                    } else {
                        debug!("[{}] {}", session_id, line);
                    }
                    self.emit(SessionEvent::response(&session_id, line));
                }
                EngineEvent::Failed(reason) => {
                    self.handle_engine_loss(&session_id, &engine, reason).await;
                }
                EngineEvent::Exited(code) => {
                    let reason = EngineError::ProcessTerminated(code).to_string();
                    self.handle_engine_loss(&session_id, &engine, reason).await;
                }
            }
        }
        debug!("[{}] Listener finished", session_id);
    }

    async fn handle_engine_loss(&self, session_id: &str, engine: &Weak<EngineClient>, reason: String) {
        // Only the instance that is still attached may drive the session
        let detached = self
            .engines
            .remove_if(session_id, |_, attached| {
                std::ptr::eq(Arc::as_ptr(attached), engine.as_ptr())
            })
            .is_some();
        if !detached {
            return;
        }

        let was_running = self
            .sessions
            .get(session_id)
            .map(|r| r.status == SessionStatus::Running)
            .unwrap_or(false);
        if was_running {
            warn!("[{}] Engine lost: {}", session_id, reason);
            self.emit(SessionEvent::failed(session_id, reason));
        }

        self.end_session(session_id).await;
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}

/// Session manager errors
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Cannot {operation} session {id} in state {state}")]
    InvalidState {
        id: String,
        state: SessionStatus,
        operation: &'static str,
    },

    #[error("Session {0} is already starting")]
    AlreadyStarting(String),

    #[error("Session {0} has no attached engine")]
    NotAttached(String),

    #[error(transparent)]
    Engine(#[from] EngineError),
}

impl SessionError {
    fn invalid_state(record: &SessionRecord, operation: &'static str) -> Self {
        Self::InvalidState {
            id: record.id.clone(),
            state: record.status,
            operation,
        }
    }
}

impl From<SessionError> for String {
    fn from(err: SessionError) -> String {
        err.to_string()
    }
}
