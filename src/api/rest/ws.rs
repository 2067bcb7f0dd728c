use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures::SinkExt;
use futures::StreamExt;
use tracing::{info, warn};
use uuid::Uuid;

use crate::state::AppState;

/// Push channel for one order: every change to its record, as JSON text frames.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Path(order_id): Path<Uuid>,
    State(state): State<Arc<AppState>>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, order_id, state))
}

async fn handle_socket(socket: WebSocket, order_id: Uuid, state: Arc<AppState>) {
    let (mut sender, mut receiver) = socket.split();
    let mut subscription = state.feed.subscribe(order_id);

    state.metrics.eta_push_clients.inc();
    info!(order_id = %order_id, "eta push client connected");

    let mut send_task = tokio::spawn(async move {
        while let Some(change) = subscription.recv().await {
            let json = match serde_json::to_string(&change) {
                Ok(json) => json,
                Err(err) => {
                    warn!(error = %err, "failed to serialize order change for ws");
                    continue;
                }
            };

            if sender.send(Message::Text(json)).await.is_err() {
                break;
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(_msg)) = receiver.next().await {}
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }

    state.metrics.eta_push_clients.dec();
    info!(order_id = %order_id, "eta push client disconnected");
}
