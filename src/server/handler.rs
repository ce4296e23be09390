//! WebSocket connection handlers and presence endpoints.
//!
//! Each accepted connection runs a pump pair: a reader loop turning
//! inbound frames into hub commands and a writer loop draining the
//! connection's outbound queue. Whichever loop finishes first aborts the
//! other, and the join point issues the single (idempotent) unregister.

use std::sync::Arc;

use axum::{
    Json,
    extract::{
        Path, Query, State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    http::StatusCode,
    response::IntoResponse,
};
use futures_util::{
    sink::SinkExt,
    stream::{SplitSink, SplitStream, StreamExt},
};
use tokio::sync::mpsc;

use crate::domain::{ClientFrame, ConnectionId, Identity, MessageStore, NewMessage, RoomId, ServerEvent};
use crate::hub::{ClientHandle, ConnectedUser, HubHandle};

use super::state::{AppState, ConnectQuery};

pub async fn websocket_handler(
    ws: WebSocketUpgrade,
    State(state): State<Arc<AppState>>,
    Query(query): Query<ConnectQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    let identity = Identity::new(query.user_id, query.username);

    // The identity is already verified upstream; register it with the hub
    // before the upgrade completes so the first events are not lost.
    let client = match state.hub.register(identity).await {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("Failed to register connection: {}", e);
            return Err(StatusCode::SERVICE_UNAVAILABLE);
        }
    };

    tracing::info!(
        user_id = client.identity.user_id,
        username = %client.identity.username,
        "client connected and registered"
    );

    Ok(ws.on_upgrade(move |socket| handle_socket(socket, state, client)))
}

async fn handle_socket(socket: WebSocket, state: Arc<AppState>, client: ClientHandle) {
    let (sender, receiver) = socket.split();
    let ClientHandle {
        connection_id,
        identity,
        outbound,
    } = client;

    let mut send_task = writer_loop(outbound, sender);

    let hub = state.hub.clone();
    let store = state.store.clone();
    let reader_identity = identity.clone();
    let mut recv_task = tokio::spawn(async move {
        reader_loop(receiver, connection_id, reader_identity, hub, store).await;
    });

    // If one side of the pump pair completes, abort the other.
    tokio::select! {
        _ = &mut recv_task => send_task.abort(),
        _ = &mut send_task => recv_task.abort(),
    };

    // Both a read failure and a write failure converge here; unregister is
    // idempotent, so it does not matter which loop died first or whether
    // the hub already evicted this connection.
    if state.hub.unregister(connection_id).is_err() {
        tracing::warn!("Hub is gone; skipping unregister");
    }
    tracing::info!(
        user_id = identity.user_id,
        username = %identity.username,
        "client disconnected"
    );
}

/// Writer loop: drain the outbound queue onto the transport.
///
/// Ends when the hub closes the queue (unregister or eviction) or when a
/// write fails; the failure itself is handled at the pump join point.
fn writer_loop(
    mut outbound: mpsc::Receiver<String>,
    mut sender: SplitSink<WebSocket, Message>,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        while let Some(payload) = outbound.recv().await {
            if sender.send(Message::Text(payload.into())).await.is_err() {
                break;
            }
        }
    })
}

/// Reader loop: turn inbound frames into hub commands.
///
/// Ends on transport error or an explicit close frame.
async fn reader_loop(
    mut receiver: SplitStream<WebSocket>,
    connection_id: ConnectionId,
    identity: Identity,
    hub: HubHandle,
    store: Arc<dyn MessageStore>,
) {
    while let Some(msg) = receiver.next().await {
        let msg = match msg {
            Ok(msg) => msg,
            Err(e) => {
                tracing::error!("WebSocket error: {}", e);
                break;
            }
        };

        match msg {
            Message::Text(text) => {
                let frame = match serde_json::from_str::<ClientFrame>(&text) {
                    Ok(frame) => frame,
                    Err(e) => {
                        tracing::warn!("Failed to parse frame as JSON: {}", e);
                        continue;
                    }
                };
                handle_frame(frame, connection_id, &identity, &hub, store.as_ref()).await;
            }
            Message::Ping(_) => {
                tracing::debug!("Received ping");
                // Ping/pong is handled automatically by the WebSocket protocol
            }
            Message::Close(_) => {
                tracing::info!("Client '{}' requested close", identity.username);
                break;
            }
            _ => {}
        }
    }
}

/// Apply one parsed inbound frame.
///
/// Chat messages go to the persistence collaborator first and are fanned
/// out only once committed; a store failure means nothing is broadcast.
pub(crate) async fn handle_frame(
    frame: ClientFrame,
    connection_id: ConnectionId,
    identity: &Identity,
    hub: &HubHandle,
    store: &dyn MessageStore,
) {
    match frame {
        ClientFrame::JoinRoom { room_id } => {
            if hub.join_room(connection_id, room_id).is_err() {
                tracing::warn!("Hub is gone; dropping join_room");
            }
        }
        ClientFrame::LeaveRoom { room_id } => {
            if hub.leave_room(connection_id, room_id).is_err() {
                tracing::warn!("Hub is gone; dropping leave_room");
            }
        }
        ClientFrame::Message { room_id, content } => {
            let message = NewMessage {
                room_id,
                user_id: identity.user_id,
                username: identity.username.clone(),
                content,
            };
            match store.store_message(message).await {
                Ok(stored) => {
                    let event = ServerEvent::chat_message(room_id, identity, stored.content);
                    if hub.broadcast_room(room_id, event.to_json()).is_err() {
                        tracing::warn!("Hub is gone; dropping chat broadcast");
                    }
                }
                Err(e) => {
                    // Not committed, so nothing fans out.
                    tracing::warn!("Failed to store message: {}", e);
                }
            }
        }
    }
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({"status": "ok"}))
}

/// Currently connected users, for presence display.
pub async fn get_online_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<ConnectedUser>>, StatusCode> {
    state
        .hub
        .list_connected()
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}

/// Current members of one room; an unknown room is an empty list.
pub async fn get_room_presence(
    State(state): State<Arc<AppState>>,
    Path(room_id): Path<RoomId>,
) -> Result<Json<Vec<ConnectedUser>>, StatusCode> {
    state
        .hub
        .list_room_members(room_id)
        .await
        .map(Json)
        .map_err(|_| StatusCode::SERVICE_UNAVAILABLE)
}
