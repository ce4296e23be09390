//! Real-time fan-out hub.
//!
//! The hub is the single authority over the live-connection registry and
//! the room index. Every mutation and every read goes through one command
//! channel consumed by a single task, so there is one well-defined total
//! order of register/unregister/join/leave/broadcast events, and each
//! broadcast's target set is exactly the membership at its point in that
//! order. No locks are involved; the owning task is the serialization
//! point.
//!
//! Delivery is a non-blocking enqueue per target. A target whose outbound
//! queue is full (or whose writer loop is gone) is treated as a stalled
//! consumer and evicted: stalled targets are collected during the delivery
//! pass and unregistered after it, so the registry is never mutated while
//! it is being iterated.

pub mod client;
pub mod room;

pub use client::{ClientHandle, ClientRecord, PushOutcome};
pub use room::RoomIndex;

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::domain::{ConnectionId, Identity, RoomId, ServerEvent, UserId};

/// Default outbound queue depth per connection.
pub const DEFAULT_OUTBOUND_CAPACITY: usize = 256;

/// Hub tuning knobs.
#[derive(Debug, Clone)]
pub struct HubConfig {
    /// Capacity of each connection's outbound queue. When a connection
    /// falls this many undelivered payloads behind, it is evicted.
    pub outbound_capacity: usize,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: DEFAULT_OUTBOUND_CAPACITY,
        }
    }
}

/// Errors surfaced to hub callers.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HubError {
    /// The hub task is no longer running.
    #[error("hub is no longer running")]
    Closed,
}

/// Point-in-time view of one connected user, for presence queries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConnectedUser {
    pub user_id: UserId,
    pub username: String,
    pub connected_at: DateTime<Utc>,
}

/// Hub counters, for observability and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct HubStats {
    /// Currently registered connections.
    pub connected: usize,
    /// Rooms currently holding at least one member.
    pub rooms: usize,
    /// Connections evicted because their outbound queue overflowed.
    pub slow_consumer_evictions: u64,
}

enum HubCommand {
    Register {
        identity: Identity,
        reply: oneshot::Sender<ClientHandle>,
    },
    Unregister {
        connection_id: ConnectionId,
    },
    JoinRoom {
        connection_id: ConnectionId,
        room_id: RoomId,
    },
    LeaveRoom {
        connection_id: ConnectionId,
        room_id: RoomId,
    },
    BroadcastAll {
        payload: String,
    },
    BroadcastRoom {
        room_id: RoomId,
        payload: String,
    },
    ListConnected {
        reply: oneshot::Sender<Vec<ConnectedUser>>,
    },
    ListRoomMembers {
        room_id: RoomId,
        reply: oneshot::Sender<Vec<ConnectedUser>>,
    },
    Stats {
        reply: oneshot::Sender<HubStats>,
    },
}

/// Cheaply cloneable submitter of hub commands.
///
/// Commands from one handle are processed in submission order; the total
/// order across all handles is the order they arrive at the hub's single
/// intake channel.
#[derive(Clone)]
pub struct HubHandle {
    commands: mpsc::UnboundedSender<HubCommand>,
}

impl HubHandle {
    /// Register a verified identity as a new live connection.
    ///
    /// Every currently registered client (the new one included) is notified
    /// with a `user_joined` event. The returned handle carries the receiver
    /// half of the connection's outbound queue.
    pub async fn register(&self, identity: Identity) -> Result<ClientHandle, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Register { identity, reply })
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Remove a connection. Safe to call any number of times, from either
    /// pump loop; only the first call has any effect.
    pub fn unregister(&self, connection_id: ConnectionId) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::Unregister { connection_id })
            .map_err(|_| HubError::Closed)
    }

    /// Subscribe a connection to a room. Idempotent.
    pub fn join_room(&self, connection_id: ConnectionId, room_id: RoomId) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::JoinRoom {
                connection_id,
                room_id,
            })
            .map_err(|_| HubError::Closed)
    }

    /// Unsubscribe a connection from a room. Idempotent.
    pub fn leave_room(&self, connection_id: ConnectionId, room_id: RoomId) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::LeaveRoom {
                connection_id,
                room_id,
            })
            .map_err(|_| HubError::Closed)
    }

    /// Deliver a payload to every client registered at the instant the
    /// command is processed.
    pub fn broadcast_all(&self, payload: impl Into<String>) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::BroadcastAll {
                payload: payload.into(),
            })
            .map_err(|_| HubError::Closed)
    }

    /// Deliver a payload to a room's member set at the instant the command
    /// is processed. An unknown room is a no-op.
    pub fn broadcast_room(
        &self,
        room_id: RoomId,
        payload: impl Into<String>,
    ) -> Result<(), HubError> {
        self.commands
            .send(HubCommand::BroadcastRoom {
                room_id,
                payload: payload.into(),
            })
            .map_err(|_| HubError::Closed)
    }

    /// Point-in-time list of connected users, sorted by user id.
    pub async fn list_connected(&self) -> Result<Vec<ConnectedUser>, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::ListConnected { reply })
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Point-in-time list of a room's members, sorted by user id. An
    /// unknown room yields an empty list.
    pub async fn list_room_members(&self, room_id: RoomId) -> Result<Vec<ConnectedUser>, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::ListRoomMembers { room_id, reply })
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }

    /// Current hub counters.
    pub async fn stats(&self) -> Result<HubStats, HubError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(HubCommand::Stats { reply })
            .map_err(|_| HubError::Closed)?;
        response.await.map_err(|_| HubError::Closed)
    }
}

/// The hub state machine. Owned exclusively by the task spawned in
/// [`Hub::spawn`]; nothing outside that task ever touches the registry or
/// the room index.
pub struct Hub {
    config: HubConfig,
    clients: HashMap<ConnectionId, ClientRecord>,
    rooms: RoomIndex,
    slow_consumer_evictions: u64,
}

impl Hub {
    /// Spawn the hub task and return a handle for submitting commands.
    pub fn spawn(config: HubConfig) -> HubHandle {
        let (tx, rx) = mpsc::unbounded_channel();
        let hub = Self {
            config,
            clients: HashMap::new(),
            rooms: RoomIndex::new(),
            slow_consumer_evictions: 0,
        };
        tokio::spawn(hub.run(rx));
        HubHandle { commands: tx }
    }

    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<HubCommand>) {
        while let Some(command) = commands.recv().await {
            self.handle(command);
        }
        tracing::debug!("hub command channel closed, shutting down");
    }

    fn handle(&mut self, command: HubCommand) {
        match command {
            HubCommand::Register { identity, reply } => {
                let handle = self.register(identity);
                if let Err(handle) = reply.send(handle) {
                    // The caller vanished between submitting and receiving;
                    // roll the registration back through the normal path.
                    self.remove_client(handle.connection_id);
                }
            }
            HubCommand::Unregister { connection_id } => self.remove_client(connection_id),
            HubCommand::JoinRoom {
                connection_id,
                room_id,
            } => self.join_room(connection_id, room_id),
            HubCommand::LeaveRoom {
                connection_id,
                room_id,
            } => self.leave_room(connection_id, room_id),
            HubCommand::BroadcastAll { payload } => self.deliver_all(&payload),
            HubCommand::BroadcastRoom { room_id, payload } => {
                self.deliver_room(room_id, &payload)
            }
            HubCommand::ListConnected { reply } => {
                let _ = reply.send(self.list_connected());
            }
            HubCommand::ListRoomMembers { room_id, reply } => {
                let _ = reply.send(self.list_room_members(room_id));
            }
            HubCommand::Stats { reply } => {
                let _ = reply.send(HubStats {
                    connected: self.clients.len(),
                    rooms: self.rooms.len(),
                    slow_consumer_evictions: self.slow_consumer_evictions,
                });
            }
        }
    }

    fn register(&mut self, identity: Identity) -> ClientHandle {
        let connection_id = Uuid::new_v4();
        let (record, outbound) =
            ClientRecord::new(identity.clone(), self.config.outbound_capacity);
        self.clients.insert(connection_id, record);
        tracing::info!(
            user_id = identity.user_id,
            username = %identity.username,
            total = self.clients.len(),
            "client registered"
        );

        let payload = ServerEvent::user_joined(&identity).to_json();
        self.deliver_all(&payload);

        ClientHandle {
            connection_id,
            identity,
            outbound,
        }
    }

    /// Remove a connection: vacate its rooms, drop its record (closing the
    /// outbound queue) and notify the remaining clients. Idempotent; a
    /// connection not currently registered is a no-op.
    fn remove_client(&mut self, connection_id: ConnectionId) {
        let Some(record) = self.clients.remove(&connection_id) else {
            return;
        };
        for &room_id in &record.rooms {
            self.rooms.leave(room_id, connection_id);
            let payload = ServerEvent::room_user_left(room_id, &record.identity).to_json();
            self.deliver_room(room_id, &payload);
        }
        tracing::info!(
            user_id = record.identity.user_id,
            username = %record.identity.username,
            total = self.clients.len(),
            "client unregistered"
        );
        let payload = ServerEvent::user_left(&record.identity).to_json();
        self.deliver_all(&payload);
        // record (and with it the outbound sender) drops here; the writer
        // loop sees the queue close and terminates.
    }

    fn join_room(&mut self, connection_id: ConnectionId, room_id: RoomId) {
        let Some(record) = self.clients.get_mut(&connection_id) else {
            return;
        };
        if !record.rooms.insert(room_id) {
            // Already a member; repeated joins have no further effect.
            return;
        }
        let identity = record.identity.clone();
        self.rooms.join(room_id, connection_id);
        tracing::debug!(
            user_id = identity.user_id,
            room_id,
            "client joined room"
        );
        let payload = ServerEvent::room_user_joined(room_id, &identity).to_json();
        self.deliver_room(room_id, &payload);
    }

    fn leave_room(&mut self, connection_id: ConnectionId, room_id: RoomId) {
        let Some(record) = self.clients.get_mut(&connection_id) else {
            return;
        };
        if !record.rooms.remove(&room_id) {
            return;
        }
        let identity = record.identity.clone();
        self.rooms.leave(room_id, connection_id);
        tracing::debug!(user_id = identity.user_id, room_id, "client left room");
        let payload = ServerEvent::room_user_left(room_id, &identity).to_json();
        self.deliver_room(room_id, &payload);
    }

    fn deliver_all(&mut self, payload: &str) {
        let targets: Vec<ConnectionId> = self.clients.keys().copied().collect();
        self.deliver(&targets, payload);
    }

    fn deliver_room(&mut self, room_id: RoomId, payload: &str) {
        let Some(members) = self.rooms.members(room_id) else {
            return;
        };
        let targets: Vec<ConnectionId> = members.iter().copied().collect();
        self.deliver(&targets, payload);
    }

    /// Fan a payload out to the given targets.
    ///
    /// Stalled consumers are collected during the pass and evicted after
    /// it; eviction runs the full removal path, so its own notifications
    /// may in turn evict further stalled consumers. Each eviction shrinks
    /// the registry, so the cascade terminates.
    fn deliver(&mut self, targets: &[ConnectionId], payload: &str) {
        let mut stalled = Vec::new();
        for connection_id in targets {
            if let Some(record) = self.clients.get(connection_id) {
                if record.try_push(payload) == PushOutcome::Stalled {
                    stalled.push(*connection_id);
                }
            }
        }
        for connection_id in stalled {
            // A cascaded eviction may already have removed this one.
            let Some(record) = self.clients.get(&connection_id) else {
                continue;
            };
            tracing::warn!(
                user_id = record.identity.user_id,
                username = %record.identity.username,
                "outbound queue overflow, evicting slow consumer"
            );
            self.slow_consumer_evictions += 1;
            self.remove_client(connection_id);
        }
    }

    fn list_connected(&self) -> Vec<ConnectedUser> {
        let mut users: Vec<ConnectedUser> = self.clients.values().map(Self::as_user).collect();
        users.sort_by_key(|u| u.user_id);
        users
    }

    fn list_room_members(&self, room_id: RoomId) -> Vec<ConnectedUser> {
        let Some(members) = self.rooms.members(room_id) else {
            return Vec::new();
        };
        let mut users: Vec<ConnectedUser> = members
            .iter()
            .filter_map(|id| self.clients.get(id))
            .map(Self::as_user)
            .collect();
        users.sort_by_key(|u| u.user_id);
        users
    }

    fn as_user(record: &ClientRecord) -> ConnectedUser {
        ConnectedUser {
            user_id: record.identity.user_id,
            username: record.identity.username.clone(),
            connected_at: record.connected_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_hub(outbound_capacity: usize) -> HubHandle {
        Hub::spawn(HubConfig { outbound_capacity })
    }

    async fn register(hub: &HubHandle, user_id: UserId, username: &str) -> ClientHandle {
        hub.register(Identity::new(user_id, username))
            .await
            .unwrap()
    }

    /// Wait for every previously submitted command to be processed.
    async fn settle(hub: &HubHandle) -> HubStats {
        hub.stats().await.unwrap()
    }

    /// Pull everything currently buffered on a connection's queue.
    fn drain(handle: &mut ClientHandle) -> Vec<String> {
        let mut payloads = Vec::new();
        while let Ok(payload) = handle.outbound.try_recv() {
            payloads.push(payload);
        }
        payloads
    }

    fn events(payloads: &[String]) -> Vec<ServerEvent> {
        payloads
            .iter()
            .filter_map(|p| serde_json::from_str(p).ok())
            .collect()
    }

    #[tokio::test]
    async fn test_register_then_unregister_leaves_no_residue() {
        // given: a client that joined a room
        let hub = test_hub(8);
        let alice = register(&hub, 1, "alice").await;
        hub.join_room(alice.connection_id, 5).unwrap();
        settle(&hub).await;

        // when:
        hub.unregister(alice.connection_id).unwrap();
        let stats = settle(&hub).await;

        // then: no registry entry and no room-index entry survives
        assert_eq!(stats.connected, 0);
        assert_eq!(stats.rooms, 0);
        assert!(hub.list_connected().await.unwrap().is_empty());
        assert!(hub.list_room_members(5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_unregister_is_idempotent() {
        // given:
        let hub = test_hub(8);
        let alice = register(&hub, 1, "alice").await;
        let mut bob = register(&hub, 2, "bob").await;
        settle(&hub).await;
        drain(&mut bob);

        // when: the same connection is unregistered twice
        hub.unregister(alice.connection_id).unwrap();
        hub.unregister(alice.connection_id).unwrap();
        let stats = settle(&hub).await;

        // then: only one user_left reaches the survivor
        assert_eq!(stats.connected, 1);
        let left: Vec<_> = events(&drain(&mut bob))
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::UserLeft { user_id: 1, .. }))
            .collect();
        assert_eq!(left.len(), 1);
    }

    #[tokio::test]
    async fn test_same_user_may_hold_two_connections() {
        // given:
        let hub = test_hub(8);

        // when: the same identity registers twice
        let first = register(&hub, 1, "alice").await;
        let second = register(&hub, 1, "alice").await;

        // then: two distinct records exist
        assert_ne!(first.connection_id, second.connection_id);
        assert_eq!(hub.list_connected().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_duplicate_join_counts_once_and_notifies_once() {
        // given:
        let hub = test_hub(8);
        let mut alice = register(&hub, 1, "alice").await;

        // when: the same room is joined twice
        hub.join_room(alice.connection_id, 7).unwrap();
        hub.join_room(alice.connection_id, 7).unwrap();
        settle(&hub).await;

        // then: membership counts once and only one notification went out
        assert_eq!(hub.list_room_members(7).await.unwrap().len(), 1);
        let joins: Vec<_> = events(&drain(&mut alice))
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::RoomUserJoined { room_id: 7, .. }))
            .collect();
        assert_eq!(joins.len(), 1);
    }

    #[tokio::test]
    async fn test_room_is_reaped_after_last_leave() {
        // given:
        let hub = test_hub(8);
        let alice = register(&hub, 1, "alice").await;
        hub.join_room(alice.connection_id, 7).unwrap();
        settle(&hub).await;

        // when:
        hub.leave_room(alice.connection_id, 7).unwrap();
        let stats = settle(&hub).await;

        // then: the room no longer exists anywhere
        assert_eq!(stats.rooms, 0);
        assert!(hub.list_room_members(7).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_broadcast_to_unknown_room_is_noop() {
        // given:
        let hub = test_hub(8);
        let mut alice = register(&hub, 1, "alice").await;
        settle(&hub).await;
        drain(&mut alice);

        // when:
        hub.broadcast_room(99, "into the void").unwrap();
        let stats = settle(&hub).await;

        // then: nothing was delivered and nobody was harmed
        assert_eq!(stats.connected, 1);
        assert!(drain(&mut alice).is_empty());
    }

    #[tokio::test]
    async fn test_room_broadcast_reaches_members_only() {
        // Scenario: x and y join room 7, z does not; a room-7 broadcast is
        // delivered to x and y exactly once each and never to z.
        let hub = test_hub(16);
        let mut x = register(&hub, 1, "x").await;
        let mut y = register(&hub, 2, "y").await;
        let mut z = register(&hub, 3, "z").await;
        hub.join_room(x.connection_id, 7).unwrap();
        hub.join_room(y.connection_id, 7).unwrap();
        settle(&hub).await;
        drain(&mut x);
        drain(&mut y);
        drain(&mut z);

        // when:
        hub.broadcast_room(7, "hello").unwrap();
        settle(&hub).await;

        // then:
        let count = |payloads: &[String]| payloads.iter().filter(|p| *p == "hello").count();
        assert_eq!(count(&drain(&mut x)), 1);
        assert_eq!(count(&drain(&mut y)), 1);
        assert_eq!(count(&drain(&mut z)), 0);
    }

    #[tokio::test]
    async fn test_slow_consumer_is_evicted_without_harming_others() {
        // Scenario: a capacity-2 queue that is never drained overflows on
        // the 3rd enqueue and the connection is evicted; a client that
        // keeps draining receives all 5 payloads.
        let hub = test_hub(2);
        let mut healthy = register(&hub, 1, "healthy").await;
        let mut stalled = register(&hub, 2, "stalled").await;
        settle(&hub).await;
        drain(&mut healthy);
        // Clear the stalled client's own user_joined, then stop draining.
        drain(&mut stalled);

        // when: five broadcasts, the healthy queue drained between them the
        // way its writer loop would
        let mut received = Vec::new();
        for n in 1..=5 {
            hub.broadcast_all(format!("ping{n}")).unwrap();
            settle(&hub).await;
            received.extend(drain(&mut healthy));
        }

        // then: the stalled connection is gone and counted
        let stats = settle(&hub).await;
        assert_eq!(stats.connected, 1);
        assert_eq!(stats.slow_consumer_evictions, 1);

        // the stalled queue holds the two buffered payloads, then closes
        assert_eq!(stalled.outbound.recv().await.as_deref(), Some("ping1"));
        assert_eq!(stalled.outbound.recv().await.as_deref(), Some("ping2"));
        assert!(stalled.outbound.recv().await.is_none());

        // and the healthy client saw every ping (plus the eviction's
        // user_left, which is filtered out here)
        let pings: Vec<_> = received
            .iter()
            .filter(|p| p.starts_with("ping"))
            .collect();
        assert_eq!(pings, vec!["ping1", "ping2", "ping3", "ping4", "ping5"]);
    }

    #[tokio::test]
    async fn test_disconnect_cleans_all_rooms_and_notifies_each() {
        // Scenario: w is in rooms 3 and 9; on disconnect, room 3's
        // remaining member sees exactly one room_user_left for w, and a
        // member of unrelated room 12 sees none.
        let hub = test_hub(16);
        let w = register(&hub, 1, "w").await;
        let mut m3 = register(&hub, 2, "m3").await;
        let mut m12 = register(&hub, 3, "m12").await;
        hub.join_room(w.connection_id, 3).unwrap();
        hub.join_room(w.connection_id, 9).unwrap();
        hub.join_room(m3.connection_id, 3).unwrap();
        hub.join_room(m12.connection_id, 12).unwrap();
        settle(&hub).await;
        drain(&mut m3);
        drain(&mut m12);

        // when: w's transport fails and its pump triggers unregister
        hub.unregister(w.connection_id).unwrap();
        settle(&hub).await;

        // then: w is out of both rooms
        assert!(hub.list_room_members(3).await.unwrap().iter().all(|u| u.user_id != 1));
        assert!(hub.list_room_members(9).await.unwrap().is_empty());

        let room_left_for_w = |payloads: &[String]| {
            events(payloads)
                .into_iter()
                .filter(|e| matches!(e, ServerEvent::RoomUserLeft { user_id: 1, .. }))
                .count()
        };
        assert_eq!(room_left_for_w(&drain(&mut m3)), 1);
        assert_eq!(room_left_for_w(&drain(&mut m12)), 0);
    }

    #[tokio::test]
    async fn test_broadcast_target_set_tracks_registration() {
        // Scenario: both registered clients receive a broadcast; after one
        // disconnects, the next broadcast reaches only the survivor.
        let hub = test_hub(16);
        let mut u1 = register(&hub, 1, "u1").await;
        let mut u2 = register(&hub, 2, "u2").await;

        // when:
        hub.broadcast_all("ping").unwrap();
        settle(&hub).await;
        hub.unregister(u1.connection_id).unwrap();
        hub.broadcast_all("ping2").unwrap();
        settle(&hub).await;

        // then:
        let u1_payloads = drain(&mut u1);
        assert!(u1_payloads.iter().any(|p| p == "ping"));
        assert!(!u1_payloads.iter().any(|p| p == "ping2"));

        let u2_payloads = drain(&mut u2);
        assert!(u2_payloads.iter().any(|p| p == "ping"));
        assert!(u2_payloads.iter().any(|p| p == "ping2"));
    }

    #[tokio::test]
    async fn test_registration_is_announced_to_existing_clients() {
        // given:
        let hub = test_hub(16);
        let mut alice = register(&hub, 1, "alice").await;
        settle(&hub).await;
        drain(&mut alice);

        // when:
        let _bob = register(&hub, 2, "bob").await;
        settle(&hub).await;

        // then:
        let joins: Vec<_> = events(&drain(&mut alice))
            .into_iter()
            .filter(|e| matches!(e, ServerEvent::UserJoined { user_id: 2, .. }))
            .collect();
        assert_eq!(joins.len(), 1);
    }

    #[tokio::test]
    async fn test_commands_for_unknown_connection_are_noops() {
        // given:
        let hub = test_hub(8);
        let ghost = Uuid::new_v4();

        // when: every mutation is aimed at a connection that never existed
        hub.join_room(ghost, 1).unwrap();
        hub.leave_room(ghost, 1).unwrap();
        hub.unregister(ghost).unwrap();
        let stats = settle(&hub).await;

        // then: the hub is unharmed and still serves commands
        assert_eq!(stats.connected, 0);
        assert_eq!(stats.rooms, 0);
    }
}
