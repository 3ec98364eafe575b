//! WebSocket endpoint streaming campaign progress to observers.
//!
//! Protocol:
//! ← Server sends: {"type":"connected","version":"..."}
//! → Client sends: {"type":"subscribe","tenant_id":"..."} (optional filter)
//! → Client sends: {"type":"ping"}
//! ← Server sends: {"type":"pong"}
//! ← Server sends: {"type":"campaign_update", campaign_id, tenant_id,
//!                  total, sent, failed, blocked, invalid, delta?, done}
//!
//! Events carry cumulative counters, so a lagged subscriber that misses
//! intermediate frames still renders correct totals from the next one.

use std::sync::Arc;

use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use tokio::sync::broadcast::error::RecvError;

use super::server::AppState;

/// WebSocket upgrade handler.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(mut socket: WebSocket, state: Arc<AppState>) {
    tracing::info!("WebSocket observer connected");
    let mut events = state.progress.subscribe();
    let mut tenant_filter: Option<String> = None;

    let welcome = serde_json::json!({
        "type": "connected",
        "version": env!("CARGO_PKG_VERSION"),
    });
    if send_json(&mut socket, &welcome).await.is_err() {
        return;
    }

    loop {
        tokio::select! {
            msg = socket.recv() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let json: serde_json::Value = match serde_json::from_str(&text) {
                            Ok(j) => j,
                            Err(e) => {
                                send_error(&mut socket, &format!("Invalid JSON: {e}")).await;
                                continue;
                            }
                        };
                        match json["type"].as_str().unwrap_or("unknown") {
                            "subscribe" => {
                                tenant_filter =
                                    json["tenant_id"].as_str().map(String::from);
                                let ack = serde_json::json!({
                                    "type": "subscribed",
                                    "tenant_id": tenant_filter,
                                });
                                let _ = send_json(&mut socket, &ack).await;
                            }
                            "ping" => {
                                let _ = send_json(
                                    &mut socket,
                                    &serde_json::json!({"type": "pong"}),
                                )
                                .await;
                            }
                            other => {
                                send_error(&mut socket, &format!("Unknown message type: {other}"))
                                    .await;
                            }
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!("WebSocket receive error: {e}");
                        break;
                    }
                }
            }
            event = events.recv() => {
                match event {
                    Ok(progress) => {
                        if tenant_filter
                            .as_deref()
                            .is_some_and(|t| t != progress.tenant_id)
                        {
                            continue;
                        }
                        let mut frame = match serde_json::to_value(&progress) {
                            Ok(v) => v,
                            Err(_) => continue,
                        };
                        if let Some(map) = frame.as_object_mut() {
                            map.insert("type".into(), "campaign_update".into());
                        }
                        if send_json(&mut socket, &frame).await.is_err() {
                            break;
                        }
                    }
                    // Skipped frames are fine, counters are cumulative.
                    Err(RecvError::Lagged(n)) => {
                        tracing::debug!("WebSocket observer lagged, skipped {n} event(s)");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }
    tracing::info!("WebSocket observer disconnected");
}

async fn send_json(socket: &mut WebSocket, value: &serde_json::Value) -> Result<(), ()> {
    socket
        .send(Message::Text(value.to_string().into()))
        .await
        .map_err(|e| {
            tracing::error!("WS send failed: {e}");
        })
}

async fn send_error(socket: &mut WebSocket, message: &str) {
    let error = serde_json::json!({
        "type": "error",
        "message": message,
    });
    let _ = send_json(socket, &error).await;
}
