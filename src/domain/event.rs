//! Outbound event envelope pushed to connected clients.
//!
//! The wire schema is a closed set of tagged variants so that every event
//! the server can emit is enumerable and testable, instead of being
//! assembled ad hoc at each call site.

use serde::{Deserialize, Serialize};

use super::{Identity, RoomId, UserId};

/// Server-to-client event, serialized as JSON with a `"type"` tag.
///
/// Room-scoped events carry `room_id`; every event names the user it is
/// about via `user_id`/`username`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A user connected to the server.
    UserJoined { user_id: UserId, username: String },
    /// A user disconnected from the server.
    UserLeft { user_id: UserId, username: String },
    /// A user joined a specific room.
    RoomUserJoined {
        room_id: RoomId,
        user_id: UserId,
        username: String,
    },
    /// A user left a specific room.
    RoomUserLeft {
        room_id: RoomId,
        user_id: UserId,
        username: String,
    },
    /// A chat message, already committed by the persistence collaborator.
    ChatMessage {
        room_id: RoomId,
        user_id: UserId,
        username: String,
        content: String,
    },
}

impl ServerEvent {
    pub fn user_joined(identity: &Identity) -> Self {
        Self::UserJoined {
            user_id: identity.user_id,
            username: identity.username.clone(),
        }
    }

    pub fn user_left(identity: &Identity) -> Self {
        Self::UserLeft {
            user_id: identity.user_id,
            username: identity.username.clone(),
        }
    }

    pub fn room_user_joined(room_id: RoomId, identity: &Identity) -> Self {
        Self::RoomUserJoined {
            room_id,
            user_id: identity.user_id,
            username: identity.username.clone(),
        }
    }

    pub fn room_user_left(room_id: RoomId, identity: &Identity) -> Self {
        Self::RoomUserLeft {
            room_id,
            user_id: identity.user_id,
            username: identity.username.clone(),
        }
    }

    pub fn chat_message(room_id: RoomId, identity: &Identity, content: impl Into<String>) -> Self {
        Self::ChatMessage {
            room_id,
            user_id: identity.user_id,
            username: identity.username.clone(),
            content: content.into(),
        }
    }

    /// Serialize to the wire representation.
    ///
    /// All variants are plain data, so serialization cannot fail.
    pub fn to_json(&self) -> String {
        serde_json::to_string(self).expect("event serialization cannot fail")
    }
}
