//! WebSocket handler: token check, membership load, upgrade.

use std::sync::Arc;

use axum::{
    extract::{
        ws::{close_code, CloseFrame, Message, WebSocket, WebSocketUpgrade},
        Query, State,
    },
    response::Response,
};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ConnectionSettings;
use crate::error::AppError;
use crate::handlers::http::AppState;
use crate::models::{ChatId, UserId};
use crate::services::{Connection, Hub};

#[derive(Debug, Deserialize)]
pub struct WsQuery {
    pub token: Option<String>,
}

/// GET /chat/ws?token=<access token>. Rejected with 401 before the handshake
/// when the token is missing or invalid.
pub async fn ws_handler(
    State(state): State<AppState>,
    Query(query): Query<WsQuery>,
    ws: WebSocketUpgrade,
) -> Result<Response, AppError> {
    let token = query
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| AppError::Auth("missing token".to_string()))?;
    let user = state.tokens().validate_token(&token).await.map_err(|e| {
        debug!(error = %e, "rejected websocket upgrade");
        e
    })?;
    let chat_ids = state.membership().user_chat_ids(user.id).await?;

    let hub = state.hub().clone();
    let settings = state.settings;
    Ok(ws
        .max_message_size(settings.max_message_size)
        .max_frame_size(settings.max_message_size)
        .on_upgrade(move |socket| serve_connection(hub, settings, socket, user.id, chat_ids)))
}

/// Register the socket with the hub and drive it to completion. The hub
/// announces presence on the user's first and last connection.
pub async fn serve_connection(
    hub: Hub,
    settings: ConnectionSettings,
    mut socket: WebSocket,
    user_id: UserId,
    chat_ids: Vec<ChatId>,
) {
    let (connection, outbound) = Connection::new(user_id, chat_ids, settings.send_buffer);

    let first_connection = match hub.register(Arc::clone(&connection)).await {
        Ok(first) => first,
        Err(e) => {
            warn!(user_id, error = %e, "could not register connection");
            let close = Message::Close(Some(CloseFrame {
                code: close_code::AWAY,
                reason: "server shutting down".into(),
            }));
            let _ = socket.send(close).await;
            return;
        }
    };

    debug!(user_id, connection_id = %connection.id(), first_connection, "connection open");

    let went_offline = Arc::clone(&connection)
        .run(socket, outbound, &hub, &settings)
        .await;

    info!(user_id, connection_id = %connection.id(), went_offline, "connection finished");
}
