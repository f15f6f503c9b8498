//! WebSocket upgrade and per-connection event loop.
//!
//! Follows the same shape as the upstream signal broadcaster: subscribe to
//! a shared `broadcast::Receiver` on upgrade, forward every event to the
//! socket as JSON, and handle a client-sent JSON ping by echoing a pong.
//! Unlike the upstream handler this tracks per-user liveness through
//! `SessionHub::touch` and drops the connection once its failure count
//! crosses the configured threshold rather than looping forever on a dead
//! socket. `connect` sends the welcome frame before the loop starts;
//! `subscribe`/`unsubscribe`/`get_stats` map onto room membership and the
//! hub's own counters rather than maintaining separate client state here.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::Response;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use crate::service::Service;
use crate::session_hub::WsServerEvent;

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub user_id: Option<String>,
}

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    Query(query): Query<WsQuery>,
    State(service): State<Arc<Service>>,
) -> Response {
    let user_id = query.user_id.unwrap_or_else(|| "anonymous".to_string());
    ws.on_upgrade(move |socket| handle_socket(socket, service, user_id))
}

async fn handle_socket(mut socket: WebSocket, service: Arc<Service>, user_id: String) {
    let (mut rx, welcome) = service.session_hub.connect(&user_id);
    if let Ok(text) = serde_json::to_string(&welcome) {
        if socket.send(Message::Text(text)).await.is_err() {
            service.session_hub.disconnect(&user_id);
            return;
        }
    }

    loop {
        tokio::select! {
            event = rx.recv() => {
                let event = match event {
                    Ok(event) => event,
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!(skipped, user_id, "websocket receiver lagged, dropping skipped events");
                        continue;
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                };

                let text = match serde_json::to_string(&event) {
                    Ok(text) => text,
                    Err(err) => {
                        warn!(error = %err, "failed to serialize websocket event");
                        continue;
                    }
                };

                if socket.send(Message::Text(text)).await.is_err() {
                    if service.session_hub.record_failure(&user_id) {
                        break;
                    }
                }
            }
            incoming = socket.recv() => {
                let Some(Ok(msg)) = incoming else { break };
                match msg {
                    Message::Text(text) => handle_client_text(&mut socket, &service, &user_id, &text).await,
                    Message::Close(_) => break,
                    _ => {}
                }
            }
        }
    }

    service.session_hub.drop_session(&user_id);
    debug!(user_id, "websocket connection closed");
}

async fn handle_client_text(socket: &mut WebSocket, service: &Arc<Service>, user_id: &str, text: &str) {
    service.session_hub.touch(user_id);

    if text.trim() == "ping" {
        let _ = socket.send(Message::Text("pong".to_string())).await;
        return;
    }

    let Ok(parsed) = serde_json::from_str::<Value>(text) else {
        return;
    };
    let Some(msg_type) = parsed.get("type").and_then(Value::as_str) else {
        return;
    };

    match msg_type {
        "ping" => {
            let timestamp = parsed
                .get("data")
                .and_then(|d| d.get("timestamp"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            send_event(socket, WsServerEvent::Pong { timestamp }).await;
        }
        "subscribe" => {
            if let Some(channel) = parsed.get("channel").and_then(Value::as_str) {
                service.session_hub.join_room(user_id, channel);
                send_event(socket, WsServerEvent::Ack { for_type: "subscribe".to_string() }).await;
            }
        }
        "unsubscribe" => {
            if let Some(channel) = parsed.get("channel").and_then(Value::as_str) {
                service.session_hub.leave_room(user_id, channel);
                send_event(socket, WsServerEvent::Ack { for_type: "unsubscribe".to_string() }).await;
            }
        }
        "get_stats" => {
            let stats = service.session_hub.stats();
            send_event(
                socket,
                WsServerEvent::Stats {
                    connected_sessions: stats.connected_sessions,
                    sent: stats.total_sent,
                    received: stats.total_received,
                    failed: stats.total_failed,
                    queued: stats.total_queued,
                },
            )
            .await;
        }
        _ => {}
    }
}

async fn send_event(socket: &mut WebSocket, event: WsServerEvent) {
    if let Ok(payload) = serde_json::to_string(&event) {
        let _ = socket.send(Message::Text(payload)).await;
    }
}
