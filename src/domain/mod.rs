//! Domain types shared across the hub and the server layer.

pub mod event;
pub mod frame;
pub mod store;

pub use event::ServerEvent;
pub use frame::ClientFrame;
pub use store::{MessageStore, NewMessage, StoreError, StoredMessage};

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Numeric user id, assigned by the (external) account system.
pub type UserId = u64;

/// Numeric room id, assigned by the (external) room CRUD layer.
pub type RoomId = u64;

/// Identifier of one live connection.
///
/// Distinct from [`UserId`]: the same user may hold several connections
/// (e.g. two browser tabs), each with its own `ConnectionId`.
pub type ConnectionId = Uuid;

/// Verified identity of one connection, immutable for its lifetime.
///
/// Token/credential validation happens upstream; by the time an `Identity`
/// reaches the hub it is already authenticated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Identity {
    pub user_id: UserId,
    pub username: String,
}

impl Identity {
    pub fn new(user_id: UserId, username: impl Into<String>) -> Self {
        Self {
            user_id,
            username: username.into(),
        }
    }
}
