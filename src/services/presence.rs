//! Presence: online queries and the online/offline announcements.
//!
//! A user is online while they have at least one open connection. Only the
//! first connect and the last disconnect are announced, both from inside the
//! hub control loop so they stay ordered with the edges that cause them.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::info;

use crate::models::{ChatId, Event, UserId};

use super::hub::Hub;
use super::registry::{Delivery, Registry};

/// "Who is online" queries, consumed by the unread/presence use-cases.
#[async_trait]
pub trait OnlineChecker: Send + Sync {
    async fn is_user_online(&self, user_id: UserId) -> bool;

    /// The subset of `user_ids` currently online, in input order.
    async fn online_users(&self, user_ids: &[UserId]) -> Vec<UserId>;
}

#[async_trait]
impl OnlineChecker for Hub {
    async fn is_user_online(&self, user_id: UserId) -> bool {
        Hub::is_user_online(self, user_id).await
    }

    async fn online_users(&self, user_ids: &[UserId]) -> Vec<UserId> {
        Hub::online_users(self, user_ids).await
    }
}

/// Tell each chat that the user came online. The user's own connections are skipped.
pub(crate) fn announce_online(registry: &Registry, user_id: UserId, chat_ids: &[ChatId]) -> Delivery {
    let delivery = announce(registry, user_id, chat_ids, Event::presence_online(user_id));
    info!(
        user_id,
        chats = chat_ids.len(),
        delivered = delivery.delivered,
        dropped = delivery.dropped,
        "presence online"
    );
    delivery
}

pub(crate) fn announce_offline(
    registry: &Registry,
    user_id: UserId,
    chat_ids: &[ChatId],
    last_seen: DateTime<Utc>,
) -> Delivery {
    let event = Event::presence_offline(user_id, last_seen);
    let delivery = announce(registry, user_id, chat_ids, event);
    info!(
        user_id,
        chats = chat_ids.len(),
        delivered = delivery.delivered,
        dropped = delivery.dropped,
        "presence offline"
    );
    delivery
}

fn announce(registry: &Registry, user_id: UserId, chat_ids: &[ChatId], event: Event) -> Delivery {
    let event = Arc::new(event);
    let mut delivery = Delivery::default();
    for &chat_id in chat_ids {
        delivery += registry.broadcast_to_chat(chat_id, &event, Some(user_id));
    }
    delivery
}
