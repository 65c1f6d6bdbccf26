//! Engine Client
//!
//! Owns one engine child process. Commands go to its stdin one line at a
//! time; stdout is framed into lines by a supervisor task, which feeds them to
//! the pending request queue and forwards each one on the event channel.

use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStderr, ChildStdin, ChildStdout, Command};
use tokio::sync::{mpsc, oneshot, Mutex as AsyncMutex};
use tokio::time::Instant;

use super::error::{EngineError, EngineResult};
use super::framing::LineFramer;
use super::protocol::{
    position_command, Completion, GoParams, BEST_MOVE, IS_READY, QUIT, READY_OK, STOP, USI,
    USI_NEW_GAME, USI_OK,
};
use super::queue::{CloseReason, RequestQueue};

const READ_CHUNK: usize = 4096;

/// How long a released engine gets to exit on its own before it is killed
const SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

/// How long a process may outlive its closed stdout before it counts as lost
const OUTPUT_CLOSED_GRACE: Duration = Duration::from_secs(1);

/// Executable plus arguments used to launch an engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineCommand {
    pub program: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
}

impl EngineCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Short name used in log lines
    pub fn label(&self) -> String {
        Path::new(&self.program)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.program.clone())
    }
}

/// Everything the engine process reports, in arrival order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
    /// One trimmed, non-empty stdout line
    Response(String),
    /// The output stream broke
    Failed(String),
    /// The process is gone; always the last event
    Exited(Option<i32>),
}

pub type EngineEvents = mpsc::UnboundedReceiver<EngineEvent>;

/// Identification lines from the `usi` handshake
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineIdentity {
    pub name: Option<String>,
    pub author: Option<String>,
}

impl EngineIdentity {
    pub fn from_lines(lines: &[String]) -> Self {
        let mut identity = Self::default();
        for line in lines {
            if let Some(name) = line.strip_prefix("id name ") {
                identity.name = Some(name.trim().to_string());
            } else if let Some(author) = line.strip_prefix("id author ") {
                identity.author = Some(author.trim().to_string());
            }
        }
        identity
    }
}

/// Abandons the request slot if the waiting future is dropped early
struct CancelGuard {
    seq: u64,
    queue: Arc<Mutex<RequestQueue>>,
    completed: bool,
}

impl CancelGuard {
    fn new(seq: u64, queue: Arc<Mutex<RequestQueue>>) -> Self {
        Self {
            seq,
            queue,
            completed: false,
        }
    }

    fn complete(&mut self) {
        self.completed = true;
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        if !self.completed && self.queue.lock().abandon(self.seq) {
            debug!("Request {} dropped before completion", self.seq);
        }
    }
}

/// Handle to a running engine process
///
/// Dropping the client releases the process: it gets [`SHUTDOWN_GRACE`] to
/// exit and is killed afterwards.
pub struct EngineClient {
    label: String,
    pid: Option<u32>,
    stdin: AsyncMutex<ChildStdin>,
    queue: Arc<Mutex<RequestQueue>>,
    next_seq: AtomicU64,
    // Dropped with the client; wakes the supervisor
    _shutdown: oneshot::Sender<()>,
}

impl fmt::Debug for EngineClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EngineClient")
            .field("label", &self.label)
            .field("pid", &self.pid)
            .finish()
    }
}

impl EngineClient {
    /// Launch the engine and start reading its output.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn(command: &EngineCommand) -> EngineResult<(Self, EngineEvents)> {
        let mut child = Command::new(&command.program)
            .args(&command.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| EngineError::SpawnFailed(format!("{}: {}", command.program, e)))?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| EngineError::SpawnFailed("stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EngineError::SpawnFailed("stdout unavailable".to_string()))?;

        let pid = child.id();
        let label = match pid {
            Some(pid) => format!("{}#{}", command.label(), pid),
            None => command.label(),
        };

        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(drain_stderr(label.clone(), stderr));
        }

        let queue = Arc::new(Mutex::new(RequestQueue::default()));
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        tokio::spawn(supervise(Supervisor {
            label: label.clone(),
            child,
            stdout,
            queue: Arc::clone(&queue),
            events: event_tx,
            shutdown: shutdown_rx,
        }));

        info!("Spawned engine {}", label);

        Ok((
            Self {
                label,
                pid,
                stdin: AsyncMutex::new(stdin),
                queue,
                next_seq: AtomicU64::new(0),
                _shutdown: shutdown_tx,
            },
            event_rx,
        ))
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn pid(&self) -> Option<u32> {
        self.pid
    }

    /// True once the process exited or [`quit`](Self::quit) was called
    pub fn is_closed(&self) -> bool {
        self.queue.lock().is_closed()
    }

    /// Requests still waiting for their completion line
    pub fn pending_count(&self) -> usize {
        self.queue.lock().live_count()
    }

    /// Write one command and wait for its completion.
    ///
    /// Requests that expect a reply are queued in issuance order and each
    /// response line is credited to the oldest one still open. Fire-and-forget
    /// commands resolve with no lines as soon as they are written.
    pub async fn send(
        &self,
        command: &str,
        completion: Completion,
        timeout: Duration,
    ) -> EngineResult<Vec<String>> {
        let mut stdin = self.stdin.lock().await;

        if !completion.expects_reply() {
            self.queue.lock().ensure_open()?;
            write_line(&mut stdin, command).await?;
            debug!("[{}] > {}", self.label, command);
            return Ok(Vec::new());
        }

        let seq = self.next_seq.fetch_add(1, Ordering::Relaxed);
        let deadline = Instant::now() + timeout;
        let mut rx = self.queue.lock().enqueue(seq, command, completion)?;
        let mut guard = CancelGuard::new(seq, Arc::clone(&self.queue));

        if let Err(e) = write_line(&mut stdin, command).await {
            self.queue.lock().discard(seq);
            guard.complete();
            return Err(e);
        }
        drop(stdin);
        debug!("[{}] > {}", self.label, command);

        let outcome = tokio::time::timeout_at(deadline, &mut rx).await;
        let result = match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(EngineError::Cancelled),
            Err(_) => {
                if self.queue.lock().abandon(seq) {
                    warn!(
                        "[{}] '{}' timed out after {}ms",
                        self.label,
                        command,
                        timeout.as_millis()
                    );
                    Err(EngineError::Timeout {
                        command: command.to_string(),
                        timeout_ms: timeout.as_millis() as u64,
                    })
                } else {
                    // Completed between the deadline firing and taking the lock
                    rx.try_recv().unwrap_or(Err(EngineError::Cancelled))
                }
            }
        };
        guard.complete();
        result
    }

    /// `usi` handshake; returns everything up to and including `usiok`
    pub async fn usi(&self, timeout: Duration) -> EngineResult<Vec<String>> {
        self.send(USI, Completion::exact(USI_OK), timeout).await
    }

    /// `isready`; returns everything up to and including `readyok`
    pub async fn is_ready(&self, timeout: Duration) -> EngineResult<Vec<String>> {
        self.send(IS_READY, Completion::exact(READY_OK), timeout).await
    }

    /// Run `usi` then `isready` and report who answered
    pub async fn handshake(&self, timeout: Duration) -> EngineResult<EngineIdentity> {
        let lines = self.usi(timeout).await?;
        self.is_ready(timeout).await?;
        Ok(EngineIdentity::from_lines(&lines))
    }

    pub async fn new_game(&self) -> EngineResult<()> {
        self.send(USI_NEW_GAME, Completion::NoReply, Duration::ZERO)
            .await
            .map(|_| ())
    }

    pub async fn position(&self, position: &str) -> EngineResult<()> {
        self.send(&position_command(position), Completion::NoReply, Duration::ZERO)
            .await
            .map(|_| ())
    }

    /// Start a search and wait for the `bestmove` line
    pub async fn go(&self, params: &GoParams, timeout: Duration) -> EngineResult<String> {
        let mut lines = self
            .send(&params.to_string(), Completion::prefix(BEST_MOVE), timeout)
            .await?;
        Ok(lines.pop().unwrap_or_default())
    }

    /// Ask the engine to end its search early; the `bestmove` still goes to
    /// the pending `go` request
    pub async fn stop(&self) -> EngineResult<()> {
        self.send(STOP, Completion::NoReply, Duration::ZERO)
            .await
            .map(|_| ())
    }

    /// Send `quit` and cancel every pending request
    pub async fn quit(&self) -> EngineResult<()> {
        let mut stdin = self.stdin.lock().await;

        let open = {
            let mut queue = self.queue.lock();
            let open = queue.ensure_open();
            let cancelled = queue.close(CloseReason::Cancelled);
            if cancelled > 0 {
                debug!("[{}] Cancelled {} pending requests", self.label, cancelled);
            }
            open
        };
        open?;

        write_line(&mut stdin, QUIT).await?;
        debug!("[{}] > {}", self.label, QUIT);
        Ok(())
    }
}

async fn write_line(stdin: &mut ChildStdin, command: &str) -> EngineResult<()> {
    let mut line = String::with_capacity(command.len() + 1);
    line.push_str(command);
    line.push('\n');

    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| EngineError::WriteFailed(e.to_string()))?;
    stdin
        .flush()
        .await
        .map_err(|e| EngineError::WriteFailed(e.to_string()))
}

struct Supervisor {
    label: String,
    child: Child,
    stdout: ChildStdout,
    queue: Arc<Mutex<RequestQueue>>,
    events: mpsc::UnboundedSender<EngineEvent>,
    shutdown: oneshot::Receiver<()>,
}

enum ReadStep {
    Chunk(std::io::Result<usize>),
    Released,
}

fn deliver(
    label: &str,
    queue: &Mutex<RequestQueue>,
    events: &mpsc::UnboundedSender<EngineEvent>,
    line: String,
) {
    debug!("[{}] < {}", label, line);
    queue.lock().dispatch(&line);
    let _ = events.send(EngineEvent::Response(line));
}

/// Read stdout until EOF or release, then reap the process and fail
/// whatever is still pending
async fn supervise(sup: Supervisor) {
    let Supervisor {
        label,
        mut child,
        mut stdout,
        queue,
        events,
        mut shutdown,
    } = sup;

    let mut framer = LineFramer::new();
    let mut chunk = vec![0u8; READ_CHUNK];
    let mut released = false;

    let read_error = loop {
        let step = tokio::select! {
            read = stdout.read(&mut chunk) => ReadStep::Chunk(read),
            _ = &mut shutdown => ReadStep::Released,
        };

        match step {
            ReadStep::Chunk(Ok(0)) => break None,
            ReadStep::Chunk(Ok(n)) => {
                for line in framer.push(&chunk[..n]) {
                    deliver(&label, &queue, &events, line);
                }
            }
            ReadStep::Chunk(Err(e)) => break Some(e.to_string()),
            ReadStep::Released => {
                released = true;
                break None;
            }
        }
    };

    if let Some(line) = framer.finish() {
        deliver(&label, &queue, &events, line);
    }

    if let Some(reason) = read_error {
        warn!("[{}] Failed to read engine output: {}", label, reason);
        let _ = events.send(EngineEvent::Failed(reason));
    }

    let code = if released {
        reap(&mut child, &label).await
    } else {
        let mut output_lost = false;
        let exited = loop {
            tokio::select! {
                status = child.wait() => break Some(status),
                _ = &mut shutdown => break None,
                _ = tokio::time::sleep(OUTPUT_CLOSED_GRACE), if !output_lost => {
                    // Still running with stdout gone: nothing can complete any more
                    output_lost = true;
                    let failed = queue.lock().close(CloseReason::Exited(None));
                    warn!(
                        "[{}] Engine closed its output but kept running ({} pending requests failed)",
                        label, failed
                    );
                    let _ = events.send(EngineEvent::Failed("engine closed its output".to_string()));
                }
            }
        };
        match exited {
            Some(Ok(status)) => status.code(),
            Some(Err(e)) => {
                warn!("[{}] Failed to wait for engine: {}", label, e);
                None
            }
            None => reap(&mut child, &label).await,
        }
    };

    let failed = queue.lock().close(CloseReason::Exited(code));
    info!(
        "[{}] Engine exited with code {:?} ({} pending requests failed)",
        label, code, failed
    );
    let _ = events.send(EngineEvent::Exited(code));
}

/// Wait out the grace period, then kill
async fn reap(child: &mut Child, label: &str) -> Option<i32> {
    match tokio::time::timeout(SHUTDOWN_GRACE, child.wait()).await {
        Ok(Ok(status)) => status.code(),
        Ok(Err(e)) => {
            warn!("[{}] Failed to wait for engine: {}", label, e);
            None
        }
        Err(_) => {
            warn!("[{}] Engine did not exit within {:?}, killing", label, SHUTDOWN_GRACE);
            if let Err(e) = child.kill().await {
                warn!("[{}] Failed to kill engine: {}", label, e);
            }
            None
        }
    }
}

async fn drain_stderr(label: String, stderr: ChildStderr) {
    let mut lines = BufReader::new(stderr).lines();
    loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if !line.is_empty() {
                    warn!("[{}] stderr: {}", label, line);
                }
            }
            Ok(None) => break,
            Err(e) => {
                debug!("[{}] stderr closed: {}", label, e);
                break;
            }
        }
    }
}
