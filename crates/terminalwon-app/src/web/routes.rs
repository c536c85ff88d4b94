use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket},
        State, WebSocketUpgrade,
    },
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::get,
    Router,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use terminalwon_types::SERVER_VERSION;

use crate::hub::Hub;

/// How long a closing socket gets to flush queued frames
const SEND_DRAIN_TIMEOUT: Duration = Duration::from_secs(2);

/// Application state shared across routes
#[derive(Clone)]
pub struct AppState {
    pub hub: Arc<Hub>,
}

/// Create router with all routes
pub fn create_router(state: AppState) -> Router {
    Router::new()
        // WebSocket upgrades are accepted on the root path too
        .route("/", get(root))
        .route("/ws", get(websocket_handler))
        .route("/health", get(health))
        .route("/api/terminals", get(list_terminals))
        .route("/api/chat/sessions", get(list_chat_sessions))
        .with_state(state)
}

/// GET / - WebSocket upgrade, or a short banner for plain HTTP
async fn root(State(state): State<AppState>, ws: Option<WebSocketUpgrade>) -> Response {
    match ws {
        Some(ws) => ws.on_upgrade(move |socket| handle_websocket(socket, state)),
        None => Json(serde_json::json!({
            "name": "TerminalWON Hub",
            "version": SERVER_VERSION,
            "websocket": "/ws",
        }))
        .into_response(),
    }
}

/// GET /health - liveness and counts
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "clients": state.hub.client_count(),
        "terminals": state.hub.terminal_count(),
        "ptyAvailable": state.hub.pty_available(),
        "uptime": state.hub.uptime_secs(),
    }))
}

/// GET /api/terminals - hub and external terminals
async fn list_terminals(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({ "terminals": state.hub.terminal_list() }))
}

/// GET /api/chat/sessions - chat session summaries
async fn list_chat_sessions(State(state): State<AppState>) -> Result<Json<serde_json::Value>, AppError> {
    let chat = state
        .hub
        .chat()
        .ok_or_else(|| AppError::NotFound("Chat history not available".into()))?;
    Ok(Json(serde_json::json!({ "sessions": chat.list_sessions() })))
}

/// GET /ws - WebSocket endpoint
async fn websocket_handler(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(move |socket| handle_websocket(socket, state))
}

/// Pump one socket: outbound frames come from the hub through a channel,
/// inbound text frames go to `Hub::handle_text`
async fn handle_websocket(socket: WebSocket, state: AppState) {
    let hub = state.hub;
    let (ws_sender, mut ws_receiver) = mpsc::unbounded_channel::<String>();
    let client_id = hub.connect(ws_sender);

    let (mut ws_sink, mut ws_stream) = socket.split();

    let mut send_task = tokio::spawn(async move {
        while let Some(json) = ws_receiver.recv().await {
            if ws_sink.send(WsMessage::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_sink.send(WsMessage::Close(None)).await;
    });

    let shutdown = hub.shutdown_token();
    loop {
        let msg = tokio::select! {
            _ = shutdown.cancelled() => break,
            msg = ws_stream.next() => msg,
        };
        match msg {
            Some(Ok(WsMessage::Text(text))) => hub.handle_text(&client_id, &text).await,
            Some(Ok(WsMessage::Close(_))) | None => break,
            Some(Ok(_)) => {}
            Some(Err(e)) => {
                warn!("WebSocket error for {}: {}", client_id, e);
                break;
            }
        }
    }

    // Dropping the bus entry closes the channel, which ends the send task
    hub.disconnect(&client_id);
    if tokio::time::timeout(SEND_DRAIN_TIMEOUT, &mut send_task).await.is_err() {
        debug!("Send task for {} did not drain in time", client_id);
        send_task.abort();
    }
}

/// Error type for HTTP handlers
#[derive(Debug)]
pub enum AppError {
    Anyhow(anyhow::Error),
    NotFound(String),
    SerdeJson(serde_json::Error),
}

impl From<anyhow::Error> for AppError {
    fn from(err: anyhow::Error) -> Self {
        AppError::Anyhow(err)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::SerdeJson(err)
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::Anyhow(err) => (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::SerdeJson(err) => (StatusCode::BAD_REQUEST, err.to_string()),
        };

        let body = Json(serde_json::json!({
            "error": message,
            "status": status.as_u16(),
        }));

        (status, body).into_response()
    }
}
