//! In-memory message store.
//!
//! Stand-in for the relational store the production deployment would use.
//! Good enough for the hub's contract: `store_message` returns only after
//! the message is committed to the vector, so broadcasts still follow the
//! persist-then-fan-out rule.

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::domain::{MessageStore, NewMessage, RoomId, StoreError, StoredMessage};

/// Message store backed by a process-local vector.
#[derive(Debug, Default)]
pub struct InMemoryMessageStore {
    messages: Mutex<Vec<StoredMessage>>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Messages committed for one room, oldest first.
    pub async fn messages_in_room(&self, room_id: RoomId) -> Vec<StoredMessage> {
        let messages = self.messages.lock().await;
        messages
            .iter()
            .filter(|m| m.room_id == room_id)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn store_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError> {
        let mut messages = self.messages.lock().await;
        let stored = StoredMessage {
            id: messages.len() as u64 + 1,
            room_id: message.room_id,
            user_id: message.user_id,
            username: message.username,
            content: message.content,
            created_at: chrono::Utc::now(),
        };
        messages.push(stored.clone());
        tracing::debug!(
            id = stored.id,
            room_id = stored.room_id,
            "message committed"
        );
        Ok(stored)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(room_id: RoomId, content: &str) -> NewMessage {
        NewMessage {
            room_id,
            user_id: 1,
            username: "alice".to_string(),
            content: content.to_string(),
        }
    }

    #[tokio::test]
    async fn test_store_assigns_sequential_ids() {
        // given:
        let store = InMemoryMessageStore::new();

        // when:
        let first = store.store_message(message(1, "one")).await.unwrap();
        let second = store.store_message(message(1, "two")).await.unwrap();

        // then:
        assert_eq!(first.id, 1);
        assert_eq!(second.id, 2);
        assert_eq!(first.content, "one");
    }

    #[tokio::test]
    async fn test_messages_are_scoped_to_their_room() {
        // given:
        let store = InMemoryMessageStore::new();
        store.store_message(message(1, "in room 1")).await.unwrap();
        store.store_message(message(2, "in room 2")).await.unwrap();
        store.store_message(message(1, "also room 1")).await.unwrap();

        // when:
        let room1 = store.messages_in_room(1).await;
        let room3 = store.messages_in_room(3).await;

        // then:
        assert_eq!(room1.len(), 2);
        assert_eq!(room1[0].content, "in room 1");
        assert_eq!(room1[1].content, "also room 1");
        assert!(room3.is_empty());
    }
}
