//! Chat backend with a real-time WebSocket fan-out hub.
//!
//! The hub keeps the process-wide view of live connections and room
//! membership and pushes committed events to exactly the connections that
//! should see them. Everything around it (persistence, identity
//! verification) is reached through collaborator traits in `domain`.

// layers
pub mod domain;
pub mod hub;
pub mod infrastructure;
pub mod server;

// shared library
pub mod common;
