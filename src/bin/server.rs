//! Chat backend server with a real-time WebSocket fan-out hub.
//!
//! Run with:
//! ```not_rust
//! cargo run --bin server
//! cargo run --bin server -- --host 0.0.0.0 --port 3000
//! ```

use std::sync::Arc;

use chat_backend_rs::{
    common::logger::setup_logger,
    domain::MessageStore,
    hub::{DEFAULT_OUTBOUND_CAPACITY, Hub, HubConfig},
    infrastructure::InMemoryMessageStore,
    server::{AppState, run_server},
};
use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "server")]
#[command(about = "Chat backend with WebSocket fan-out hub", long_about = None)]
struct Args {
    /// Host address to bind the server to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,

    /// Port number to bind the server to
    #[arg(short = 'p', long, default_value = "8080")]
    port: u16,

    /// Per-connection outbound queue depth; a connection this far behind
    /// is evicted as a slow consumer
    #[arg(long, default_value_t = DEFAULT_OUTBOUND_CAPACITY)]
    outbound_capacity: usize,
}

#[tokio::main]
async fn main() {
    // Initialize tracing
    setup_logger(env!("CARGO_BIN_NAME"), "debug");

    let args = Args::parse();

    // Initialize dependencies in order:
    // 1. Hub (fan-out task)
    // 2. MessageStore (persistence collaborator)
    // 3. AppState
    // 4. Server
    let hub = Hub::spawn(HubConfig {
        outbound_capacity: args.outbound_capacity,
    });
    let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
    let state = Arc::new(AppState { hub, store });

    if let Err(e) = run_server(args.host, args.port, state).await {
        tracing::error!("Server error: {}", e);
        std::process::exit(1);
    }
}
