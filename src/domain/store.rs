//! Persistence collaborator interface.
//!
//! The hub only fans out events that are already committed, so the reader
//! loop hands every chat message to a [`MessageStore`] first and broadcasts
//! only on success. The concrete store (relational database in production,
//! in-memory in this repo and in tests) lives behind this trait.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;

use super::{RoomId, UserId};

/// A chat message as submitted by a connection, before persistence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
    pub content: String,
}

/// A chat message after the store has committed it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StoredMessage {
    pub id: u64,
    pub room_id: RoomId,
    pub user_id: UserId,
    pub username: String,
    pub content: String,
    pub created_at: DateTime<Utc>,
}

/// Errors reported by the persistence collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The backing store rejected or could not complete the write.
    #[error("message store unavailable: {0}")]
    Unavailable(String),
}

/// Message persistence interface.
///
/// Implementations must be safe to call from the per-connection reader
/// loops concurrently.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Durably store a message, returning the committed record.
    async fn store_message(&self, message: NewMessage) -> Result<StoredMessage, StoreError>;
}
