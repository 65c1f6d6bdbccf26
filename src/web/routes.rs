//! REST handlers for game sessions

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use log::{info, warn};
use serde_json::json;

use super::validation::CreateGameRequest;
use super::AppState;
use crate::session::SessionError;

/// JSON error reply: `{error, timestamp}` plus validation details when present
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    details: Vec<String>,
}

impl ApiError {
    pub fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message)
    }

    fn with_details(mut self, details: Vec<String>) -> Self {
        self.details = details;
        self
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let mut body = json!({
            "error": self.message,
            "timestamp": Utc::now(),
        });
        if !self.details.is_empty() {
            body["details"] = json!(self.details);
        }
        (self.status, Json(body)).into_response()
    }
}

impl From<SessionError> for ApiError {
    fn from(err: SessionError) -> Self {
        match err {
            SessionError::NotFound(_) => ApiError::not_found("Game not found"),
            other => ApiError::bad_request(other.to_string()),
        }
    }
}

type ApiResult = Result<Response, ApiError>;

fn success(message: &str) -> Response {
    Json(json!({
        "status": "success",
        "data": { "message": message },
        "timestamp": Utc::now(),
    }))
    .into_response()
}

pub async fn health() -> Response {
    Json(json!({ "status": "ok", "timestamp": Utc::now() })).into_response()
}

pub async fn list_games(State(state): State<AppState>) -> Response {
    Json(json!({ "games": state.manager.list_sessions() })).into_response()
}

pub async fn get_game(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    let game = state
        .manager
        .get_session(&id)
        .ok_or_else(|| ApiError::not_found("Game not found"))?;
    Ok(Json(json!({ "game": game })).into_response())
}

pub async fn create_game(
    State(state): State<AppState>,
    body: Result<Json<CreateGameRequest>, JsonRejection>,
) -> ApiResult {
    let Json(request) = body.map_err(|e| {
        warn!("Rejected create request: {}", e);
        ApiError::bad_request("Invalid request format")
    })?;

    let new_session = request
        .into_new_session(&state.config)
        .map_err(|errors| ApiError::bad_request("Validation failed").with_details(errors))?;

    let game = state.manager.create_session(new_session);
    Ok((StatusCode::CREATED, Json(json!({ "game": game }))).into_response())
}

pub async fn start_game(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.manager.start_session(&id).await?;
    Ok(success("Game started successfully"))
}

pub async fn stop_game(State(state): State<AppState>, Path(id): Path<String>) -> ApiResult {
    state.manager.stop_session(&id).await?;
    Ok(success("Game stopped successfully"))
}

pub async fn end_game(State(state): State<AppState>, Path(id): Path<String>) -> Response {
    state.manager.end_session(&id).await;
    info!("Game {} ended via API", id);
    success("Game ended successfully")
}

pub async fn not_found() -> ApiError {
    ApiError::not_found("Endpoint not found")
}

#[cfg(test)]
mod tests {
    use super::super::router;
    use super::*;
    use crate::config::ServerConfig;
    use crate::session::SessionManager;
    use axum::body::Body;
    use axum::http::Request;
    use serde_json::Value;
    use tower::ServiceExt;

    fn state() -> AppState {
        AppState::new(SessionManager::new(), ServerConfig::default())
    }

    async fn call(state: &AppState, method: &str, uri: &str, body: Option<&str>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map(|b| Body::from(b.to_string())).unwrap_or_else(Body::empty))
            .unwrap();

        let response = router(state.clone()).oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let json = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, json)
    }

    #[tokio::test]
    async fn test_health() {
        let (status, body) = call(&state(), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_create_and_get_game() {
        let state = state();
        let (status, body) = call(
            &state,
            "POST",
            "/games",
            Some(r#"{"player":"alice","timeLimit":30000}"#),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(body["game"]["state"], "idle");
        assert_eq!(body["game"]["timeLimit"], 30000);
        let id = body["game"]["id"].as_str().unwrap().to_string();

        let (status, body) = call(&state, "GET", &format!("/games/{}", id), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["game"]["player"], "alice");

        let (_, body) = call(&state, "GET", "/games", None).await;
        assert_eq!(body["games"].as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_create_game_rejects_bad_input() {
        let state = state();

        let (status, body) = call(&state, "POST", "/games", Some("{not json")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Invalid request format");

        let (status, body) = call(&state, "POST", "/games", Some(r#"{"byoyomi":0}"#)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["details"].as_array().unwrap().len(), 2);

        let (status, body) = call(
            &state,
            "POST",
            "/games",
            Some(r#"{"player":"alice","timeLimit":"soon"}"#),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "Validation failed");
        assert_eq!(body["details"][0], "Time limit must be a positive number");
        assert!(state.manager.list_sessions().is_empty());
    }

    #[tokio::test]
    async fn test_missing_game_and_route() {
        let state = state();
        let (status, body) = call(&state, "GET", "/games/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Game not found");

        let (status, body) = call(&state, "GET", "/nowhere", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"], "Endpoint not found");
    }

    #[tokio::test]
    async fn test_start_failure_is_bad_request() {
        let state = state();
        let (_, body) = call(
            &state,
            "POST",
            "/games",
            Some(r#"{"player":"alice","enginePath":"/nonexistent/usi-engine"}"#),
        )
        .await;
        let id = body["game"]["id"].as_str().unwrap().to_string();

        let (status, _) = call(&state, "POST", &format!("/games/{}/start", id), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, _) = call(&state, "POST", &format!("/games/{}/stop", id), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        assert_eq!(state.manager.get_session(&id).unwrap().state.to_string(), "idle");
    }

    #[tokio::test]
    async fn test_delete_is_idempotent() {
        let state = state();
        let (_, body) = call(&state, "POST", "/games", Some(r#"{"player":"alice"}"#)).await;
        let id = body["game"]["id"].as_str().unwrap().to_string();

        for _ in 0..2 {
            let (status, body) = call(&state, "DELETE", &format!("/games/{}", id), None).await;
            assert_eq!(status, StatusCode::OK);
            assert_eq!(body["status"], "success");
        }
        assert_eq!(state.manager.get_session(&id).unwrap().state.to_string(), "ended");
    }
}
