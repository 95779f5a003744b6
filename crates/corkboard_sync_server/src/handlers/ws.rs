//! WebSocket push endpoint.
//!
//! Clients connect once per session and receive the JSON events the
//! broadcaster addresses to them. The socket is push-only: mutations travel
//! over the HTTP surface, and a client that was disconnected catches up by
//! re-fetching its scopes, not by replay.

use std::sync::Arc;

use axum::{
    extract::{
        Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use corkboard_core::store::BoardRepo;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::identity::resolve_identity;
use crate::sync::ConnectionRegistry;

/// Query parameters for WebSocket connection
#[derive(Debug, Deserialize)]
pub struct WsQuery {
    /// Auth token
    pub token: String,
}

/// Shared state for WebSocket handler
#[derive(Clone)]
pub struct WsState {
    pub repo: Arc<BoardRepo>,
    pub registry: Arc<ConnectionRegistry>,
}

/// WebSocket upgrade handler
pub async fn ws_handler(
    State(state): State<WsState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let identity = match resolve_identity(&state.repo, &query.token) {
        Ok(Some(identity)) => identity,
        Ok(None) => {
            warn!("WebSocket connection rejected: invalid or missing token");
            return StatusCode::UNAUTHORIZED.into_response();
        }
        Err(e) => {
            error!("identity resolution failed: {}", e);
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let user_id = identity.user_id;
    ws.on_upgrade(move |socket| handle_socket(socket, state, user_id))
        .into_response()
}

/// Handle an established WebSocket connection
async fn handle_socket(socket: WebSocket, state: WsState, user_id: String) {
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (tx, mut rx) = mpsc::unbounded_channel::<String>();
    let connection_id = state.registry.register(&user_id, tx);

    info!(
        "WebSocket connected: user={}, connections={}",
        user_id,
        state.registry.connection_count()
    );

    loop {
        tokio::select! {
            // Events addressed to this user by the broadcaster
            Some(payload) = rx.recv() => {
                if let Err(e) = ws_tx.send(Message::Text(payload.into())).await {
                    error!("Failed to push event: {}", e);
                    break;
                }
            }

            // The client side only ever pings or closes
            Some(msg) = ws_rx.next() => {
                match msg {
                    Ok(Message::Ping(data)) => {
                        if let Err(e) = ws_tx.send(Message::Pong(data)).await {
                            error!("Failed to send pong: {}", e);
                            break;
                        }
                    }
                    Ok(Message::Close(_)) => {
                        debug!("Client requested close");
                        break;
                    }
                    Err(e) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    _ => {}
                }
            }

            else => break,
        }
    }

    state.registry.unregister(&user_id, connection_id);
    info!("WebSocket disconnected: user={}", user_id);
}
