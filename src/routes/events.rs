// WebSocket endpoint streaming hub messages to the authenticated user

use axum::{
    extract::{
        ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
    routing::get,
    Router,
};
use futures::{stream::SplitSink, SinkExt, StreamExt};
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;
use tracing::{debug, info};

use crate::events::{EventHub, Message};
use crate::middleware::verify_jwt;
use crate::models::AppState;
use crate::types::{AppError, AppResult};

const PING_INTERVAL: Duration = Duration::from_secs(54);

pub fn router() -> Router<AppState> {
    Router::new().route("/api/events/ws", get(events_ws))
}

#[derive(Debug, Deserialize)]
struct WsParams {
    token: Option<String>,
}

/// Browsers cannot set headers on a WebSocket handshake, so the JWT travels
/// in the `token` query parameter.
fn authenticate(params: &WsParams, secret: &str) -> AppResult<String> {
    let token = params
        .token
        .as_deref()
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Auth("Missing token".to_string()))?;
    Ok(verify_jwt(token, secret)?.user_id)
}

async fn events_ws(
    State(state): State<AppState>,
    Query(params): Query<WsParams>,
    ws: WebSocketUpgrade,
) -> AppResult<Response> {
    let user_id = authenticate(&params, &state.config.auth.jwt_secret)?;
    let hub = state.hub.clone();
    Ok(ws.on_upgrade(move |socket| handle_socket(socket, hub, user_id)))
}

async fn handle_socket(socket: WebSocket, hub: EventHub, user_id: String) {
    let (mut sink, mut stream) = socket.split();

    let (connection, mut outbound) = hub.open(user_id.clone());
    let connection_id = connection.id();
    hub.register(connection).await;
    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket client connected");

    let connected = Message::new(
        "connected",
        user_id.clone(),
        json!({ "message": "WebSocket connection established" }),
    );
    if send_json(&mut sink, &connected).await.is_err() {
        hub.unregister(connection_id, user_id).await;
        return;
    }

    let mut write_task = tokio::spawn(async move {
        let mut ping = tokio::time::interval(PING_INTERVAL);
        ping.tick().await;
        loop {
            tokio::select! {
                message = outbound.recv() => match message {
                    Some(message) => {
                        if send_json(&mut sink, &message).await.is_err() {
                            break;
                        }
                    }
                    // Hub closed the buffer.
                    None => {
                        let _ = sink.send(WsMessage::Close(None)).await;
                        break;
                    }
                },
                _ = ping.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new().into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut read_task = tokio::spawn(async move {
        while let Some(Ok(message)) = stream.next().await {
            if let WsMessage::Close(_) = message {
                break;
            }
        }
    });

    tokio::select! {
        _ = &mut write_task => read_task.abort(),
        _ = &mut read_task => write_task.abort(),
    }

    hub.unregister(connection_id, user_id.clone()).await;
    info!(user_id = %user_id, connection_id = %connection_id, "WebSocket client disconnected");
}

async fn send_json(sink: &mut SplitSink<WebSocket, WsMessage>, message: &Message) -> Result<(), ()> {
    let text = match serde_json::to_string(message) {
        Ok(text) => text,
        Err(e) => {
            debug!("Skipping unserializable message: {}", e);
            return Ok(());
        }
    };
    sink.send(WsMessage::Text(text.into())).await.map_err(|e| {
        debug!("WebSocket write failed: {}", e);
    })
}
