use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use std::sync::Arc;
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, warn};

use crate::server::engine::Engine;

#[derive(Deserialize, Debug)]
pub struct SubscribeQuery {
    /// Optional event-kind filter, e.g. `?kind=device_unreachable`.
    kind: Option<String>,
}

/// Push subscription for the presentation layer's toast/alert rendering.
/// Every engine event is forwarded as one JSON text frame.
pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(engine): State<Arc<Engine>>,
    Query(query): Query<SubscribeQuery>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, engine, query.kind))
}

async fn handle_socket(socket: WebSocket, engine: Arc<Engine>, kind_filter: Option<String>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = BroadcastStream::new(engine.subscribe());
    debug!(?kind_filter, "WebSocket subscriber connected.");

    let mut push_task = tokio::spawn(async move {
        while let Some(event) = events.next().await {
            let event = match event {
                Ok(event) => event,
                Err(BroadcastStreamRecvError::Lagged(missed)) => {
                    warn!(missed, "WebSocket subscriber lagged; events dropped.");
                    continue;
                }
            };
            if let Some(filter) = &kind_filter {
                if event.kind_label() != filter {
                    continue;
                }
            }
            let payload = match serde_json::to_string(&event) {
                Ok(json) => json,
                Err(e) => {
                    warn!(error = %e, "Failed to serialize engine event.");
                    continue;
                }
            };
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    });

    // The receive side only watches for the client going away.
    let mut close_task = tokio::spawn(async move {
        while let Some(message) = receiver.next().await {
            match message {
                Ok(Message::Close(_)) | Err(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut push_task => close_task.abort(),
        _ = &mut close_task => push_task.abort(),
    }
    debug!("WebSocket subscriber disconnected.");
}
