//! Engine-versus-engine games
//!
//! Two engine clients alternate `position` + `go` until one resigns or
//! declares a win, or the move limit is reached.

use anyhow::{Context, Result};
use log::{info, warn};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::{Duration, Instant};

use crate::config::AutoplayArgs;
use crate::engine::protocol::position_command;
use crate::engine::{BestMove, EngineClient, EngineCommand, EngineError, EngineResult, GoParams};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Black,
    White,
}

impl Side {
    fn opponent(self) -> Self {
        match self {
            Side::Black => Side::White,
            Side::White => Side::Black,
        }
    }
}

/// How the game finished
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Outcome {
    Resign { winner: Side },
    Win { winner: Side },
    MoveLimit,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordedMove {
    pub usi: String,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GameRecord {
    pub black: String,
    pub white: String,
    /// Starting position, `startpos` or `sfen ...`
    pub initial: String,
    pub moves: Vec<RecordedMove>,
    pub outcome: Outcome,
}

impl GameRecord {
    /// Full `position ... moves ...` line for the final position
    pub fn to_usi(&self) -> String {
        position_line(&self.initial, &self.moves)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("Failed to serialize game record")?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write game record to {}", path.display()))
    }
}

fn position_line(initial: &str, moves: &[RecordedMove]) -> String {
    let mut line = position_command(initial);
    if !moves.is_empty() {
        line.push_str(" moves");
        for mv in moves {
            line.push(' ');
            line.push_str(&mv.usi);
        }
    }
    line
}

/// Game settings shared by both sides
#[derive(Debug, Clone)]
pub struct MatchSettings {
    pub initial: String,
    pub limit: usize,
    pub byoyomi: u64,
    pub command_timeout: Duration,
}

/// Alternate searches between two ready engines
pub async fn play(
    black: &EngineClient,
    white: &EngineClient,
    settings: &MatchSettings,
) -> EngineResult<GameRecord> {
    let go = GoParams::per_move(settings.byoyomi);
    let search_timeout = Duration::from_millis(go.budget_ms()) + settings.command_timeout;

    let mut moves: Vec<RecordedMove> = Vec::new();
    let mut side = Side::Black;
    let mut outcome = Outcome::MoveLimit;

    while moves.len() < settings.limit {
        let engine = match side {
            Side::Black => black,
            Side::White => white,
        };

        let position = position_line(&settings.initial, &moves);
        engine.position(&position).await?;

        let started = Instant::now();
        let line = engine.go(&go, search_timeout).await?;
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let Some(best) = BestMove::parse(&line) else {
            warn!("Unparsable search result from {:?}: {}", side, line);
            break;
        };
        if best.is_resign() {
            outcome = Outcome::Resign {
                winner: side.opponent(),
            };
            break;
        }
        if best.is_win() {
            outcome = Outcome::Win { winner: side };
            break;
        }

        info!("{} {:?}: {} ({}ms)", moves.len() + 1, side, best.mv, elapsed_ms);
        moves.push(RecordedMove {
            usi: best.mv,
            elapsed_ms,
        });
        side = side.opponent();
    }

    Ok(GameRecord {
        black: black.label().to_string(),
        white: white.label().to_string(),
        initial: settings.initial.clone(),
        moves,
        outcome,
    })
}

async fn prepare(client: &EngineClient, timeout: Duration) -> EngineResult<()> {
    let identity = client.handshake(timeout).await?;
    info!(
        "{} ready: {}",
        client.label(),
        identity.name.as_deref().unwrap_or("unnamed")
    );
    client.new_game().await
}

/// Spawn both engines, play one game and quit them
pub async fn run_autoplay(args: AutoplayArgs) -> Result<GameRecord> {
    let command_timeout = Duration::from_millis(args.command_timeout_ms);

    let (black, _black_events) = EngineClient::spawn(&EngineCommand::new(&args.black))
        .with_context(|| format!("Failed to start black engine {}", args.black))?;
    let (white, _white_events) = EngineClient::spawn(&EngineCommand::new(&args.white))
        .with_context(|| format!("Failed to start white engine {}", args.white))?;

    let (black_ready, white_ready) = tokio::join!(
        prepare(&black, command_timeout),
        prepare(&white, command_timeout)
    );
    black_ready.context("Black engine failed to initialize")?;
    white_ready.context("White engine failed to initialize")?;
    info!("Engines initialized");

    let settings = MatchSettings {
        initial: args.position.clone(),
        limit: args.limit,
        byoyomi: args.byoyomi,
        command_timeout,
    };
    let result = play(&black, &white, &settings).await;

    for (name, client) in [("black", &black), ("white", &white)] {
        match client.quit().await {
            Ok(()) | Err(EngineError::ProcessTerminated(_)) => {}
            Err(e) => warn!("Failed to quit {} engine: {}", name, e),
        }
    }

    let record = result.context("Game aborted")?;
    info!("Game over after {} moves: {:?}", record.moves.len(), record.outcome);

    if let Some(path) = &args.output {
        record.save(path)?;
        info!("Record saved to {}", path.display());
    }
    Ok(record)
}
