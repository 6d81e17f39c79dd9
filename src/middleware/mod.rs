//! Middleware: request extractors shared by the REST endpoints.
//! WebSocket upgrades authenticate from the `token` query parameter instead.

pub mod auth;

pub use auth::AuthUser;
