//! HTTP API and WebSocket event relay

pub mod messages;
pub mod routes;
pub mod validation;
pub mod websocket;

use anyhow::{Context, Result};
use axum::routing::{get, post};
use axum::Router;
use log::info;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

use crate::config::ServerConfig;
use crate::session::SessionManager;

/// Shared handler state
#[derive(Clone)]
pub struct AppState {
    pub manager: SessionManager,
    pub config: Arc<ServerConfig>,
}

impl AppState {
    pub fn new(manager: SessionManager, config: ServerConfig) -> Self {
        Self {
            manager,
            config: Arc::new(config),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health))
        .route("/games", get(routes::list_games).post(routes::create_game))
        .route("/games/{id}", get(routes::get_game).delete(routes::end_game))
        .route("/games/{id}/start", post(routes::start_game))
        .route("/games/{id}/stop", post(routes::stop_game))
        .route("/ws", get(websocket::ws_handler))
        .fallback(routes::not_found)
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Run the server until Ctrl-C or SIGTERM, then end every session
pub async fn serve(config: ServerConfig) -> Result<()> {
    let manager = SessionManager::with_settings(config.manager_settings());
    let addr = config.bind_address();
    let app = router(AppState::new(manager.clone(), config));

    let listener = TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind server to {}", addr))?;
    info!("Server listening on http://{}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Shutting down, ending all sessions...");
    manager.terminate_all().await;
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Failed to listen for Ctrl-C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                log::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
