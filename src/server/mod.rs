//! HTTP/WebSocket surface: connection handlers, router and runner.

pub mod handler;
pub mod runner;
pub mod signal;
pub mod state;

pub use runner::{build_router, run_server};
pub use state::AppState;
