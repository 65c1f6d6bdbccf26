//! Create-game request body and its validation

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::ServerConfig;
use crate::engine::EngineCommand;
use crate::session::{NewSession, SessionParameters};

const MAX_PLAYER_LEN: usize = 100;
const MAX_TIME_LIMIT: f64 = 3_600_000.0;
const MAX_BYOYOMI: f64 = 60_000.0;

/// Body of `POST /games` and of the `create_game` socket message
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateGameRequest {
    pub player: Option<String>,
    pub engine_path: Option<String>,
    #[serde(default)]
    pub engine_args: Vec<String>,
    pub position: Option<String>,
    /// Milliseconds; kept as raw JSON so a non-number is reported by
    /// [`validate`](Self::validate) instead of failing the parse
    pub time_limit: Option<Value>,
    pub byoyomi: Option<Value>,
}

/// Positive millisecond count, or `None` for anything else
fn positive_millis(value: &Value) -> Option<f64> {
    value.as_f64().filter(|ms| *ms > 0.0)
}

fn to_millis(value: Option<&Value>) -> Option<u64> {
    value.and_then(positive_millis).map(|ms| ms.ceil() as u64)
}

impl CreateGameRequest {
    /// Every problem with the request, in field order
    pub fn validate(&self) -> Vec<String> {
        let mut errors = Vec::new();

        match self.player.as_deref() {
            None => errors.push("Player name is required".to_string()),
            Some(player) if player.trim().is_empty() => {
                errors.push("Player name must be a non-empty string".to_string())
            }
            Some(player) if player.chars().count() > MAX_PLAYER_LEN => {
                errors.push("Player name must be at most 100 characters".to_string())
            }
            Some(_) => {}
        }

        if let Some(time_limit) = &self.time_limit {
            match positive_millis(time_limit) {
                None => errors.push("Time limit must be a positive number".to_string()),
                Some(ms) if ms > MAX_TIME_LIMIT => {
                    errors.push("Time limit must be at most 1 hour".to_string())
                }
                Some(_) => {}
            }
        }

        if let Some(byoyomi) = &self.byoyomi {
            match positive_millis(byoyomi) {
                None => errors.push("Byoyomi must be a positive number".to_string()),
                Some(ms) if ms > MAX_BYOYOMI => {
                    errors.push("Byoyomi must be at most 1 minute".to_string())
                }
                Some(_) => {}
            }
        }

        if matches!(self.engine_path.as_deref(), Some(path) if path.trim().is_empty()) {
            errors.push("Engine path must be a non-empty string".to_string());
        }

        if matches!(self.position.as_deref(), Some(position) if position.trim().is_empty()) {
            errors.push("Position must be a non-empty string".to_string());
        }

        errors
    }

    /// Validate and fill in server defaults
    pub fn into_new_session(self, config: &ServerConfig) -> Result<NewSession, Vec<String>> {
        let errors = self.validate();
        if !errors.is_empty() {
            return Err(errors);
        }

        let engine = EngineCommand::new(
            self.engine_path
                .unwrap_or_else(|| config.default_engine_path.clone()),
        )
        .with_args(self.engine_args);

        let parameters = SessionParameters {
            position: self
                .position
                .unwrap_or_else(|| SessionParameters::default().position),
            time_limit: to_millis(self.time_limit.as_ref()).unwrap_or(config.default_time_limit),
            byoyomi: to_millis(self.byoyomi.as_ref()).unwrap_or(config.default_byoyomi),
        };

        Ok(NewSession::new(self.player.unwrap_or_default().trim(), engine).with_parameters(parameters))
    }
}
