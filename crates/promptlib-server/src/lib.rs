//! Promptlib server library: HTTP routes, the chat WebSocket and application state.
//!
//! Kept apart from main.rs so integration tests can drive [`app`] directly.

pub mod config;
pub mod logging;
pub mod routes;
pub mod state;
pub mod websocket;

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::{
    cors::{Any, CorsLayer},
    services::ServeDir,
    trace::TraceLayer,
};

use state::AppState;

/// Build the full router.
pub fn app(state: Arc<AppState>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(routes::health))
        .route("/models", get(routes::models::list))
        // Conversation history
        .route("/conversations", get(routes::conversations::list))
        .route(
            "/conversations/{id}",
            get(routes::conversations::get).patch(routes::conversations::update),
        )
        .route(
            "/conversations/{id}/messages",
            get(routes::conversations::messages),
        )
        // Prompt library
        .route("/prompts/assemble", post(routes::prompts::assemble));

    let ws_routes = Router::new().route("/chat", get(routes::ws::upgrade));

    Router::new()
        .nest("/api", api_routes)
        .nest("/ws", ws_routes)
        .fallback_service(ServeDir::new(&state.config.static_dir))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
