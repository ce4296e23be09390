//! Router construction and server execution.

use std::sync::Arc;

use axum::{Router, routing::get};
use tower_http::trace::TraceLayer;

use super::{
    handler::{get_online_users, get_room_presence, health_check, websocket_handler},
    signal::shutdown_signal,
    state::AppState,
};

/// Build the application router.
///
/// Split out from [`run_server`] so tests can serve the same routes on an
/// ephemeral listener.
pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        // WebSocket endpoint (identity pre-verified by the fronting auth layer)
        .route("/api/ws", get(websocket_handler))
        // HTTP read model
        .route("/api/health", get(health_check))
        .route("/api/presence/online", get(get_online_users))
        .route("/api/rooms/{room_id}/presence", get(get_room_presence))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the chat backend server.
///
/// # Arguments
///
/// * `host` - The host address to bind to (e.g., "127.0.0.1")
/// * `port` - The port number to bind to (e.g., 8080)
/// * `state` - Shared application state (hub handle + store)
///
/// # Errors
///
/// Returns an error if the server fails to bind to the specified address
/// or if there's an error during server execution.
pub async fn run_server(
    host: String,
    port: u16,
    state: Arc<AppState>,
) -> Result<(), Box<dyn std::error::Error>> {
    let app = build_router(state);

    let bind_addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;

    tracing::info!("Chat backend listening on {}", listener.local_addr()?);
    tracing::info!("Connect to: ws://{}/api/ws", bind_addr);
    tracing::info!("Press Ctrl+C to shutdown gracefully");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server shutdown complete");

    Ok(())
}
