//! Mock coding backend server
//!
//! Serves the WebSocket message channel plus the HTTP preview analysis and
//! editor endpoints, so the loop and the CLI can run without the real
//! dashboard backend.

mod backend;
mod events;
mod http;
mod state;

pub use backend::{analyze_code, BackendReply, MockBackend};
pub use events::EventBroadcaster;
pub use state::BackendState;

use crate::preview::{ANALYZE_PREVIEW_PATH, EDITOR_PROMPT_PATH};
use axum::{
    http::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE},
    routing::{get, post},
    Router,
};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};

/// Build the router for the mock backend
pub fn build_router(state: BackendState) -> Router {
    // Permissive CORS: the dashboard is served from a different origin in development
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers([AUTHORIZATION, CONTENT_TYPE, ACCEPT]);

    Router::new()
        .route("/ws", get(events::ws_handler))
        .route(ANALYZE_PREVIEW_PATH, post(http::analyze_preview_handler))
        .route(EDITOR_PROMPT_PATH, post(http::editor_prompt_handler))
        .route("/health", get(health_handler))
        .layer(cors)
        .with_state(state)
}

/// Bind and run the mock backend until shutdown is requested
pub async fn run_server(bind: &str, port: u16, state: BackendState) -> Result<(), String> {
    let addr: SocketAddr = format!("{}:{}", bind, port)
        .parse()
        .map_err(|e| format!("Invalid address: {}", e))?;

    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;

    println!("\nCoding manager mock backend");
    println!("  WebSocket:  ws://{}/ws", addr);
    println!("  Analysis:   POST http://{}{}", addr, ANALYZE_PREVIEW_PATH);
    println!("  Editor:     POST http://{}{}", addr, EDITOR_PROMPT_PATH);
    println!("  Health:     GET  http://{}/health\n", addr);

    serve(listener, state).await
}

/// Serve on an already bound listener until shutdown is requested
pub async fn serve(listener: TcpListener, state: BackendState) -> Result<(), String> {
    if let Ok(addr) = listener.local_addr() {
        log::info!("[Backend] Listening on http://{}", addr);
    }

    // Create shutdown signal that waits for the shutdown state flag
    let shutdown_state = state.shutdown_state.clone();
    let shutdown_signal = async move {
        shutdown_state
            .wait_for_shutdown(std::time::Duration::from_millis(100))
            .await;
        log::info!("[Backend] Shutdown signal received, stopping server...");
    };

    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(shutdown_signal)
        .await
        .map_err(|e| format!("Server error: {}", e))
}

/// Health check endpoint
async fn health_handler() -> &'static str {
    "OK"
}
