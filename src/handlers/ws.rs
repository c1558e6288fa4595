//! `GET /ws/upload-progress?token=<jwt>` — the push channel side of progress
//! reporting (spec.md §4.1, §6). Query-string auth because the WebSocket
//! handshake has no way to attach an `Authorization` header from a browser
//! client, so the token is verified here with the same `auth::verify_token`
//! the REST extractor uses rather than through `FromRequestParts`.

use crate::app_state::AppState;
use crate::auth::verify_token;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use ingestion::{ProgressEvent, ProgressSink};
use kernel::Principal;
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    token: String,
}

pub async fn upgrade(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    match verify_token(&state.jwt_secret, &query.token) {
        Ok(principal) => ws.on_upgrade(move |socket| handle_socket(socket, state, principal)),
        Err(err) => {
            warn!(%err, "rejected websocket upgrade: invalid bearer token");
            (axum::http::StatusCode::UNAUTHORIZED, "invalid bearer token").into_response()
        }
    }
}

/// Bridges one live `ProgressBus` subscription into a websocket connection.
/// A forwarding task owns the socket's write half and serializes every
/// `ProgressEvent` — bus-originated or a reply to a client `ping` — onto
/// the wire as a JSON text frame. The read loop owns the read half and
/// only watches for `ping`/close; a dead or closed socket is pruned from
/// the bus immediately rather than left to the sweeper (spec.md §4.1).
async fn handle_socket(socket: WebSocket, state: AppState, principal: Principal) {
    let (mut sender, mut receiver) = socket.split();
    let (tx, mut rx) = mpsc::channel::<ProgressEvent>(64);

    let sink: Arc<dyn ProgressSink> = Arc::new(WebSocketSink { tx: tx.clone() });
    let subscription = state.progress_bus.subscribe(principal.id.clone(), sink);

    let forward_principal = principal.id.clone();
    let mut forward_task = tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let Ok(text) = serde_json::to_string(&event) else { continue };
            if sender.send(Message::Text(text.into())).await.is_err() {
                break;
            }
        }
        info!(principal_id = %forward_principal, "progress websocket forwarder stopped");
    });

    while let Some(Ok(message)) = receiver.next().await {
        match message {
            Message::Text(text) if is_ping(&text) => {
                let pong = ProgressEvent::Pong { timestamp: time::OffsetDateTime::now_utc() };
                if tx.send(pong).await.is_err() {
                    break;
                }
            }
            Message::Close(_) => break,
            _ => {}
        }
    }

    subscription.cancel();
    forward_task.abort();
}

fn is_ping(text: &str) -> bool {
    matches!(serde_json::from_str::<serde_json::Value>(text), Ok(v) if v.get("type").and_then(|t| t.as_str()) == Some("ping"))
}

struct WebSocketSink {
    tx: mpsc::Sender<ProgressEvent>,
}

#[async_trait::async_trait]
impl ProgressSink for WebSocketSink {
    async fn send(&self, event: &ProgressEvent) -> bool {
        self.tx.send(event.clone()).await.is_ok()
    }
}
