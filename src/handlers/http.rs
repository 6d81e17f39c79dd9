//! HTTP handlers: online status, hub stats and health.

use std::sync::Arc;

use axum::{extract::State, http::StatusCode, Json};
use serde_json::json;
use validator::Validate;

use crate::auth::TokenValidator;
use crate::config::ConnectionSettings;
use crate::error::AppError;
use crate::middleware::AuthUser;
use crate::models::{OnlineStatusRequest, OnlineStatusResponse};
use crate::services::{
    Broadcaster, ChatMembership, Hub, HubBroadcaster, HubStats, OnlineChecker,
};

/// Shared application state for HTTP and WS handlers.
#[derive(Clone)]
pub struct AppState {
    pub hub: Hub,
    pub tokens: Arc<dyn TokenValidator>,
    pub membership: Arc<dyn ChatMembership>,
    pub broadcaster: Arc<dyn Broadcaster>,
    pub settings: ConnectionSettings,
}

impl AppState {
    pub fn new(
        hub: Hub,
        tokens: Arc<dyn TokenValidator>,
        membership: Arc<dyn ChatMembership>,
        settings: ConnectionSettings,
    ) -> Self {
        let broadcaster = Arc::new(HubBroadcaster::new(hub.clone()));
        Self {
            hub,
            tokens,
            membership,
            broadcaster,
            settings,
        }
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }
    pub fn tokens(&self) -> &dyn TokenValidator {
        self.tokens.as_ref()
    }
    pub fn membership(&self) -> &dyn ChatMembership {
        self.membership.as_ref()
    }
    /// Entry point for message use-cases to push events after a durable write.
    pub fn broadcaster(&self) -> &dyn Broadcaster {
        self.broadcaster.as_ref()
    }
    pub fn online_checker(&self) -> &dyn OnlineChecker {
        &self.hub
    }
}

/// POST /chat/users/online-status — which of the given users have an open connection.
pub async fn online_status(
    State(state): State<AppState>,
    AuthUser(_caller): AuthUser,
    Json(body): Json<OnlineStatusRequest>,
) -> Result<Json<OnlineStatusResponse>, AppError> {
    body.validate().map_err(|e| AppError::Validation(e.to_string()))?;
    let online = state.online_checker().online_users(&body.user_ids).await;
    Ok(Json(OnlineStatusResponse::from_online(&body.user_ids, &online)))
}

/// GET /chat/ws/stats — live connection counters.
pub async fn ws_stats(State(state): State<AppState>) -> Json<HubStats> {
    Json(state.hub().stats().await)
}

/// GET /health — liveness check.
pub async fn health() -> (StatusCode, Json<serde_json::Value>) {
    (
        StatusCode::OK,
        Json(json!({ "status": "ok", "service": "chathub" })),
    )
}
