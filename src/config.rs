//! Command line and environment configuration

use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

use crate::session::state::{DEFAULT_BYOYOMI, DEFAULT_POSITION, DEFAULT_TIME_LIMIT};
use crate::session::ManagerSettings;

pub const DEFAULT_ENGINE_PATH: &str = "../source/minishogi-by-gcc";

#[derive(Debug, Parser)]
#[command(name = "usi-broker", version, about = "Session broker for USI shogi engines")]
pub struct Cli {
    /// Log level (error, warn, info, debug, trace); RUST_LOG takes precedence
    #[arg(long, global = true, env = "LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run the HTTP/WebSocket server
    Serve(ServerConfig),
    /// Let two engines play each other
    Autoplay(AutoplayArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServerConfig {
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: String,

    #[arg(long, env = "PORT", default_value_t = 3000)]
    pub port: u16,

    /// Engine used when a create request names none
    #[arg(long, env = "DEFAULT_ENGINE_PATH", default_value = DEFAULT_ENGINE_PATH)]
    pub default_engine_path: String,

    /// Main time per side in milliseconds
    #[arg(long, env = "DEFAULT_TIME_LIMIT", default_value_t = DEFAULT_TIME_LIMIT)]
    pub default_time_limit: u64,

    /// Per-move increment in milliseconds
    #[arg(long, env = "DEFAULT_BYOYOMI", default_value_t = DEFAULT_BYOYOMI)]
    pub default_byoyomi: u64,

    /// Deadline for handshake commands in milliseconds
    #[arg(long, env = "COMMAND_TIMEOUT_MS", default_value_t = 10_000)]
    pub command_timeout_ms: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 3000,
            default_engine_path: DEFAULT_ENGINE_PATH.to_string(),
            default_time_limit: DEFAULT_TIME_LIMIT,
            default_byoyomi: DEFAULT_BYOYOMI,
            command_timeout_ms: 10_000,
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn manager_settings(&self) -> ManagerSettings {
        ManagerSettings {
            command_timeout: Duration::from_millis(self.command_timeout_ms),
            ..ManagerSettings::default()
        }
    }
}

#[derive(Debug, Clone, Args)]
pub struct AutoplayArgs {
    /// Engine playing first (sente)
    #[arg(long)]
    pub black: String,

    /// Engine playing second (gote)
    #[arg(long)]
    pub white: String,

    /// Stop after this many moves
    #[arg(long, default_value_t = 256)]
    pub limit: usize,

    /// Time per move in milliseconds
    #[arg(long, default_value_t = 1000)]
    pub byoyomi: u64,

    #[arg(long, default_value = DEFAULT_POSITION)]
    pub position: String,

    /// Write the game record here as JSON
    #[arg(long)]
    pub output: Option<PathBuf>,

    /// Deadline for handshake commands in milliseconds
    #[arg(long, default_value_t = 10_000)]
    pub command_timeout_ms: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_serve_defaults() {
        let cli = Cli::try_parse_from(["usi-broker", "serve", "--port", "4000"]).unwrap();
        let Command::Serve(config) = cli.command else {
            panic!("expected serve");
        };
        assert_eq!(config.port, 4000);
        assert_eq!(config.bind_address(), format!("{}:4000", config.host));
        assert_eq!(
            config.manager_settings().command_timeout,
            Duration::from_millis(config.command_timeout_ms)
        );
    }

    #[test]
    fn test_autoplay_args() {
        let cli = Cli::try_parse_from([
            "usi-broker",
            "autoplay",
            "--black",
            "./a",
            "--white",
            "./b",
            "--limit",
            "10",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(cli.log_level, "debug");
        let Command::Autoplay(args) = cli.command else {
            panic!("expected autoplay");
        };
        assert_eq!(args.limit, 10);
        assert_eq!(args.position, "startpos");
        assert!(args.output.is_none());
    }
}
