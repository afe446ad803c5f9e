use crate::broadcast::SessionInfo;
use crate::pipeline::Pipeline;
use crate::types::{ControlMessage, ServerEvent};
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    http::HeaderValue,
    response::Response,
    routing::get,
    Json, Router,
};
use futures_util::{stream::SplitSink, SinkExt, StreamExt};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, error, info, warn};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub pipeline: Pipeline,
}

/// Build the HTTP router: `/ws`, `/health`, `/status` and `/sessions`
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    let origins: Vec<HeaderValue> = cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                warn!("Ignoring invalid CORS origin: {}", origin);
                None
            }
        })
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/ws", get(handle_websocket))
        .route("/health", get(health_check))
        .route("/status", get(get_status))
        .route("/sessions", get(list_sessions))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Handle WebSocket upgrade
pub async fn handle_websocket(ws: WebSocketUpgrade, State(state): State<AppState>) -> Response {
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Health check endpoint
async fn health_check() -> &'static str {
    "OK"
}

async fn get_status(State(state): State<AppState>) -> Json<crate::types::PipelineStatus> {
    Json(state.pipeline.status())
}

async fn list_sessions(State(state): State<AppState>) -> Json<Vec<SessionInfo>> {
    Json(state.pipeline.broadcaster().sessions())
}

/// Serve one consumer for the lifetime of its connection
async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sender, mut receiver) = socket.split();
    let broadcaster = state.pipeline.broadcaster().clone();
    let mut session = broadcaster.connect();
    let session_id = session.id;

    info!("New WebSocket connection established: {}", session_id);

    let greeting = [
        ServerEvent::Connect { session_id },
        state.pipeline.status_event(),
    ];
    for event in &greeting {
        if send_event(&mut sender, event).await.is_err() {
            broadcaster.disconnect(&session_id);
            return;
        }
    }

    loop {
        tokio::select! {
            event = session.receiver.recv() => {
                let Some(event) = event else {
                    // Removed from the registry by the broadcaster
                    break;
                };
                if let Err(e) = send_event(&mut sender, &event).await {
                    warn!("Failed to send to {}: {}", session_id, e);
                    break;
                }
            }

            msg = receiver.next() => {
                let msg = match msg {
                    Some(Ok(msg)) => msg,
                    Some(Err(e)) => {
                        error!("WebSocket error on {}: {}", session_id, e);
                        break;
                    }
                    None => break,
                };

                match msg {
                    Message::Text(text) => {
                        let reply = match serde_json::from_str::<ControlMessage>(&text) {
                            Ok(control) => {
                                debug!("Control message from {}: {:?}", session_id, control);
                                state.pipeline.handle_control(control).await
                            }
                            Err(e) => {
                                warn!("Failed to parse message from {}: {}", session_id, e);
                                Some(ServerEvent::error(
                                    format!("Invalid message format: {}", e),
                                    "PARSE_ERROR",
                                ))
                            }
                        };

                        if let Some(reply) = reply {
                            if send_event(&mut sender, &reply).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => {
                        info!("WebSocket connection closed by client: {}", session_id);
                        break;
                    }
                    Message::Ping(data) => {
                        if let Err(e) = sender.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    _ => {}
                }
            }
        }
    }

    broadcaster.disconnect(&session_id);
    info!("WebSocket connection terminated: {}", session_id);
}

async fn send_event(
    sender: &mut SplitSink<WebSocket, Message>,
    event: &ServerEvent,
) -> Result<(), axum::Error> {
    match serde_json::to_string(event) {
        Ok(json) => sender.send(Message::Text(json.into())).await,
        Err(e) => {
            error!("Failed to serialize event: {}", e);
            Ok(())
        }
    }
}
