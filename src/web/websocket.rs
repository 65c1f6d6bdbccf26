//! WebSocket event relay
//!
//! Every connection receives the full session event stream as JSON text and
//! may create games with `create_game` messages.

use axum::extract::ws::{Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use futures::{SinkExt, StreamExt};
use log::{debug, info, warn};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use super::messages::{parse_client_message, ClientMessage, ErrorMessage};
use super::AppState;

pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let connection_id = Uuid::new_v4();
    info!("WebSocket connected: {}", connection_id);

    let (mut ws_tx, mut ws_rx) = socket.split();
    let (reply_tx, mut reply_rx) = mpsc::unbounded_channel::<String>();
    let mut events = UnboundedReceiverStream::new(state.manager.subscribe());

    let send_task = tokio::spawn(async move {
        loop {
            let text = tokio::select! {
                event = events.next() => match event {
                    Some(event) => match serde_json::to_string(&event) {
                        Ok(text) => text,
                        Err(e) => {
                            warn!("Failed to serialize event: {}", e);
                            continue;
                        }
                    },
                    None => break,
                },
                reply = reply_rx.recv() => match reply {
                    Some(text) => text,
                    None => break,
                },
            };

            if ws_tx.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
    });

    while let Some(msg) = ws_rx.next().await {
        match msg {
            Ok(Message::Text(text)) => handle_client_text(&state, text.as_str(), &reply_tx),
            Ok(Message::Close(_)) => break,
            Ok(_) => {}
            Err(e) => {
                warn!("WebSocket {} error: {}", connection_id, e);
                break;
            }
        }
    }

    send_task.abort();
    info!("WebSocket disconnected: {}", connection_id);
}

fn handle_client_text(state: &AppState, text: &str, reply: &mpsc::UnboundedSender<String>) {
    let error = match parse_client_message(text) {
        Ok(None) => {
            debug!("Ignoring unhandled message: {}", text);
            return;
        }
        Ok(Some(ClientMessage::CreateGame { data })) => match data.into_new_session(&state.config) {
            Ok(new_session) => {
                // The session_created event reaches this socket through the relay
                let info = state.manager.create_session(new_session);
                debug!("Game {} created over WebSocket", info.id);
                return;
            }
            Err(errors) => ErrorMessage::new(format!("Validation failed: {}", errors.join(", "))),
        },
        Err(e) => {
            warn!("{}", e);
            ErrorMessage::malformed()
        }
    };

    match serde_json::to_string(&error) {
        Ok(text) => {
            let _ = reply.send(text);
        }
        Err(e) => warn!("Failed to serialize error reply: {}", e),
    }
}
