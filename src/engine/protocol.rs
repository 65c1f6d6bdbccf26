//! USI command vocabulary
//!
//! The broker only needs a thin slice of the protocol: the handshake, game
//! setup, search and shutdown commands, two terminators and the search
//! completion marker.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Capability negotiation command
pub const USI: &str = "usi";
/// Terminator for [`USI`]
pub const USI_OK: &str = "usiok";
/// Readiness command
pub const IS_READY: &str = "isready";
/// Terminator for [`IS_READY`]
pub const READY_OK: &str = "readyok";
/// Start-of-game command
pub const USI_NEW_GAME: &str = "usinewgame";
/// Halt the current search
pub const STOP: &str = "stop";
/// Terminal command; the engine exits after reading it
pub const QUIT: &str = "quit";
/// Prefix of the line that ends a search
pub const BEST_MOVE: &str = "bestmove";

/// How a sent command is considered complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    /// Fire-and-forget: done as soon as the line is written
    NoReply,
    /// Done when a response line equals the terminator exactly
    Exact(String),
    /// Done on the first response line starting with the marker
    Prefix(String),
}

impl Completion {
    pub fn exact(terminator: impl Into<String>) -> Self {
        Self::Exact(terminator.into())
    }

    pub fn prefix(marker: impl Into<String>) -> Self {
        Self::Prefix(marker.into())
    }

    /// Whether the command waits for any response at all
    pub fn expects_reply(&self) -> bool {
        !matches!(self, Self::NoReply)
    }

    /// Check a response line against this predicate
    pub fn matches(&self, line: &str) -> bool {
        match self {
            Self::NoReply => false,
            Self::Exact(terminator) => line == terminator,
            Self::Prefix(marker) => line.starts_with(marker.as_str()),
        }
    }
}

/// `position` command for the given position text
///
/// Accepts both `startpos ...`/`sfen ...` and an already prefixed command.
pub fn position_command(position: &str) -> String {
    let position = position.trim();
    match position.strip_prefix("position ") {
        Some(rest) => format!("position {}", rest.trim()),
        None => format!("position {}", position),
    }
}

/// Clock parameters of a `go` command, in milliseconds
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct GoParams {
    pub btime: u64,
    pub wtime: u64,
    pub binc: u64,
    pub winc: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub byoyomi: Option<u64>,
}

impl GoParams {
    /// Symmetric clock: both sides get `time_limit` plus `increment` per move
    pub fn clock(time_limit: u64, increment: u64) -> Self {
        Self {
            btime: time_limit,
            wtime: time_limit,
            binc: increment,
            winc: increment,
            byoyomi: None,
        }
    }

    /// Fixed time per move
    pub fn per_move(byoyomi: u64) -> Self {
        Self {
            byoyomi: Some(byoyomi),
            ..Self::default()
        }
    }

    /// Upper bound on how long a search with these parameters may take
    pub fn budget_ms(&self) -> u64 {
        self.btime.max(self.wtime) + self.binc.max(self.winc) + self.byoyomi.unwrap_or(0)
    }
}

impl fmt::Display for GoParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "go btime {} wtime {} binc {} winc {}",
            self.btime, self.wtime, self.binc, self.winc
        )?;
        if let Some(byoyomi) = self.byoyomi {
            write!(f, " byoyomi {}", byoyomi)?;
        }
        Ok(())
    }
}

/// Parsed `bestmove <move> [ponder <move>]` line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BestMove {
    pub mv: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ponder: Option<String>,
}

impl BestMove {
    /// The engine gave up
    pub fn is_resign(&self) -> bool {
        self.mv == "resign"
    }

    /// The engine declared a win (entering-king rule)
    pub fn is_win(&self) -> bool {
        self.mv == "win"
    }

    pub fn parse(line: &str) -> Option<Self> {
        let mut parts = line.split_whitespace();
        if parts.next()? != BEST_MOVE {
            return None;
        }
        let mv = parts.next()?.to_string();
        let ponder = match (parts.next(), parts.next()) {
            (Some("ponder"), Some(p)) => Some(p.to_string()),
            _ => None,
        };
        Some(Self { mv, ponder })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_completion_predicates() {
        let exact = Completion::exact(USI_OK);
        assert!(exact.matches("usiok"));
        assert!(!exact.matches("usiok extra"));
        assert!(exact.expects_reply());

        let prefix = Completion::prefix(BEST_MOVE);
        assert!(prefix.matches("bestmove 7g7f ponder 3c3d"));
        assert!(!prefix.matches("info depth 3 bestmove"));

        assert!(!Completion::NoReply.expects_reply());
        assert!(!Completion::NoReply.matches(""));
    }

    #[test]
    fn test_position_command() {
        assert_eq!(position_command("startpos"), "position startpos");
        assert_eq!(
            position_command("position startpos moves 7g7f"),
            "position startpos moves 7g7f"
        );
        assert_eq!(position_command("  sfen 4k/5/5/5/K4 b - 1 "), "position sfen 4k/5/5/5/K4 b - 1");
    }

    #[test]
    fn test_go_params_format() {
        assert_eq!(
            GoParams::clock(60000, 10000).to_string(),
            "go btime 60000 wtime 60000 binc 10000 winc 10000"
        );
        assert_eq!(
            GoParams::per_move(1000).to_string(),
            "go btime 0 wtime 0 binc 0 winc 0 byoyomi 1000"
        );
        assert_eq!(GoParams::clock(60000, 10000).budget_ms(), 70000);
    }

    #[test]
    fn test_parse_best_move() {
        let best = BestMove::parse("bestmove 7g7f ponder 3c3d").unwrap();
        assert_eq!(best.mv, "7g7f");
        assert_eq!(best.ponder.as_deref(), Some("3c3d"));

        let resign = BestMove::parse("bestmove resign").unwrap();
        assert!(resign.is_resign());
        assert!(resign.ponder.is_none());

        assert!(BestMove::parse("info depth 1").is_none());
        assert!(BestMove::parse("bestmove").is_none());
    }
}
