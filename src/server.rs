//! ==============================================================================
//! server.rs - websocket transport
//! ==============================================================================
//!
//! purpose:
//!     maps websocket traffic onto gateway events:
//!     - socket upgrade        -> Gateway::open_channel
//!     - {"type":"subscribe"}  -> Gateway::on_subscribe
//!     - {"type":"unsubscribe"}-> Gateway::on_unsubscribe
//!     - close / socket error  -> Gateway::on_disconnect
//!     each socket gets one writer task draining the connection's channel,
//!     so messages for a client leave in the order they were pushed.
//!
//! routes:
//!     - GET /ws      websocket endpoint
//!     - GET /health  json counters
//!
//! ==============================================================================

use crate::domain::{ClientMessage, ConnectionId, ServerMessage};
use crate::gateway::Gateway;
use axum::{
    extract::{
        ws::{Message, WebSocket},
        State, WebSocketUpgrade,
    },
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use futures::{SinkExt, StreamExt};
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tracing::{debug, warn};

pub fn create_router(gateway: Arc<Gateway>) -> Router {
    Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(health_handler))
        .layer(CorsLayer::permissive())
        .with_state(gateway)
}

async fn health_handler(State(gateway): State<Arc<Gateway>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "connections": gateway.connection_count(),
        "subscriptions": gateway.registry().len(),
        "sensors": gateway.registry().distinct_sensors(),
    }))
}

async fn ws_handler(ws: WebSocketUpgrade, State(gateway): State<Arc<Gateway>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, gateway))
}

async fn handle_socket(socket: WebSocket, gateway: Arc<Gateway>) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (conn, mut outbound) = gateway.open_channel();

    let writer = tokio::spawn(async move {
        while let Some(message) = outbound.recv().await {
            let json = match serde_json::to_string(&message) {
                Ok(json) => json,
                Err(e) => {
                    warn!("failed to encode message for {}: {}", conn, e);
                    continue;
                }
            };
            if ws_tx.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
        let _ = ws_tx.close().await;
    });

    while let Some(frame) = ws_rx.next().await {
        let text = match frame {
            Ok(Message::Text(text)) => text,
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => text,
                Err(_) => {
                    reply(&gateway, conn, ServerMessage::notice("binary frames must be utf-8 json"));
                    continue;
                }
            },
            // axum answers pings itself
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => continue,
            Ok(Message::Close(_)) => break,
            Err(e) => {
                debug!("websocket error on {}: {}", conn, e);
                break;
            }
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Subscribe { sensor_id }) => {
                if let Err(e) = gateway.on_subscribe(conn, &sensor_id).await {
                    debug!("subscribe from {} rejected: {}", conn, e);
                }
            }
            Ok(ClientMessage::Unsubscribe) => {
                if let Err(e) = gateway.on_unsubscribe(conn) {
                    debug!("unsubscribe from {} failed: {}", conn, e);
                }
            }
            Ok(ClientMessage::Ping) => reply(&gateway, conn, ServerMessage::Pong),
            Err(e) => reply(&gateway, conn, ServerMessage::notice(format!("invalid message: {}", e))),
        }

        if !gateway.is_connected(conn) {
            break;
        }
    }

    gateway.on_disconnect(conn);
    // dropping the gateway's handle closed the channel; the writer drains and exits
    let _ = writer.await;
}

fn reply(gateway: &Gateway, conn: ConnectionId, message: ServerMessage) {
    if gateway.push(conn, message).is_err() {
        gateway.prune(conn);
    }
}
