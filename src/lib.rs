//! Real-time WebSocket hub for a chat backend.
//!
//! Keeps the live connections of every online user, routes chat events
//! (messages, edits, deletes, read receipts, typing, presence) to each
//! participant's open sockets, and answers "who is online" queries.

pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod services;

pub use config::Config;
pub use error::AppError;
pub use handlers::http::AppState;
pub use services::{Broadcaster, Hub, HubRunner, OnlineChecker};

use axum::routing::{get, post};
use handlers::http;
use tower_http::trace::TraceLayer;

/// Build the API router (ws, online status, stats, health). Used by main and by integration tests.
pub fn create_app(state: AppState) -> axum::Router {
    let chat_routes = axum::Router::new()
        .route("/ws", get(handlers::ws_handler))
        .route("/ws/stats", get(http::ws_stats))
        .route("/users/online-status", post(http::online_status));

    axum::Router::new()
        .nest("/chat", chat_routes)
        .route("/health", get(http::health))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
