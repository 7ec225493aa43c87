//! Observer WebSocket — live log, QR and agent-stats events.
//!
//! Protocol:
//! → Client connects to `/ws?sessionKey=<key>` (401 before upgrade if the key is unknown)
//! ← Server replays recent events, then streams `{"type":"log"|"qr"|"agentStats", ...}`
//! ← Server pings every heartbeat interval; no pong by the next tick evicts the client

use axum::{
    body::Bytes,
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade, rejection::WebSocketUpgradeRejection},
    },
    response::{IntoResponse, Response},
};
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;

use remindclaw_core::events::Event;

use crate::auth::unauthorized;
use crate::server::AppState;

#[derive(Debug, Deserialize)]
pub struct WsParams {
    #[serde(default, rename = "sessionKey")]
    pub session_key: String,
}

/// Authenticate, then upgrade.
pub async fn ws_handler(
    State(state): State<Arc<AppState>>,
    Query(params): Query<WsParams>,
    upgrade: Result<WebSocketUpgrade, WebSocketUpgradeRejection>,
) -> Response {
    if state.config.require_login && !state.sessions.is_valid(&params.session_key) {
        tracing::warn!("🔒 Observer rejected: missing or unknown session key");
        return unauthorized();
    }
    match upgrade {
        Ok(ws) => ws.on_upgrade(move |socket| handle_socket(socket, state)),
        Err(rejection) => rejection.into_response(),
    }
}

fn text(event: &Event) -> Message {
    Message::Text(event.to_json().into())
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let events = state.control.events();
    let mut subscription = events.subscribe();
    let id = subscription.id();
    let (mut sender, mut receiver) = socket.split();
    tracing::info!("👀 Observer {id} connected ({} live)", events.observer_count());

    for event in events.history() {
        if sender.send(text(&event)).await.is_err() {
            return;
        }
    }

    let period = state.heartbeat;
    let mut heartbeat = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
    let mut alive = true;

    loop {
        tokio::select! {
            event = subscription.recv() => {
                let Some(event) = event else { break };
                if sender.send(text(&event)).await.is_err() {
                    break;
                }
            }
            incoming = receiver.next() => match incoming {
                Some(Ok(Message::Pong(_))) => alive = true,
                Some(Ok(Message::Close(_))) | None => break,
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::debug!("Observer {id} read error: {e}");
                    break;
                }
            },
            _ = heartbeat.tick() => {
                if !alive {
                    tracing::info!("💔 Observer {id} missed heartbeat, disconnecting");
                    let _ = sender.send(Message::Close(None)).await;
                    break;
                }
                alive = false;
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
            }
        }
    }

    events.unsubscribe(id);
    tracing::info!("👋 Observer {id} disconnected");
}
