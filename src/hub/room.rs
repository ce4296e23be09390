//! Room index: which connections are subscribed to which room.

use std::collections::{HashMap, HashSet};

use crate::domain::{ConnectionId, RoomId};

/// Mapping from room id to its current member set.
///
/// Entries are created lazily on first join and removed as soon as the last
/// member leaves; an empty room never persists in the index. The hub keeps
/// this map and each client's room set in lockstep: a connection appears in
/// `rooms[r]` exactly when `r` is in that client's room set.
#[derive(Debug, Default)]
pub struct RoomIndex {
    rooms: HashMap<RoomId, HashSet<ConnectionId>>,
}

impl RoomIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to a room, creating the entry if absent.
    ///
    /// Returns `true` if the connection was not already a member.
    pub fn join(&mut self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        self.rooms.entry(room_id).or_default().insert(connection_id)
    }

    /// Remove a connection from a room, reaping the entry if it empties.
    ///
    /// Returns `true` if the connection was a member. Unknown rooms are a
    /// no-op.
    pub fn leave(&mut self, room_id: RoomId, connection_id: ConnectionId) -> bool {
        let Some(members) = self.rooms.get_mut(&room_id) else {
            return false;
        };
        let was_member = members.remove(&connection_id);
        if members.is_empty() {
            self.rooms.remove(&room_id);
        }
        was_member
    }

    /// Current members of a room, if the room has any.
    pub fn members(&self, room_id: RoomId) -> Option<&HashSet<ConnectionId>> {
        self.rooms.get(&room_id)
    }

    /// Number of rooms currently holding at least one member.
    pub fn len(&self) -> usize {
        self.rooms.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rooms.is_empty()
    }
}
