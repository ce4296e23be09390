//! Inbound frames sent by clients over the WebSocket.

use serde::{Deserialize, Serialize};

use super::RoomId;

/// Client-to-server frame, JSON with a `"type"` tag.
///
/// Frames either mutate room membership or carry an application message.
/// Anything that does not parse into one of these variants is logged and
/// dropped by the reader loop.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    /// Subscribe this connection to a room.
    JoinRoom { room_id: RoomId },
    /// Unsubscribe this connection from a room.
    LeaveRoom { room_id: RoomId },
    /// Send a chat message to a room.
    Message { room_id: RoomId, content: String },
}
