//! Server state and connection query types.

use std::sync::Arc;

use serde::Deserialize;

use crate::domain::{MessageStore, UserId};
use crate::hub::HubHandle;

/// Query parameters for a WebSocket connection.
///
/// The fronting auth layer validates the caller's token and rewrites the
/// upgrade request with the verified identity; by the time these
/// parameters reach this process they are trusted.
#[derive(Debug, Deserialize)]
pub struct ConnectQuery {
    pub user_id: UserId,
    pub username: String,
}

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    /// Handle to the fan-out hub task.
    pub hub: HubHandle,
    /// Message persistence collaborator.
    pub store: Arc<dyn MessageStore>,
}
