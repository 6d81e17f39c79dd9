//! The hub's state: connections per user and subscribers per chat.
//!
//! Only the hub control loop owns a `Registry`, so no locking happens here.

use std::collections::{HashMap, HashSet};
use std::ops::AddAssign;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::models::{ChatId, Event, UserId};

use super::connection::{Connection, ConnectionId};

/// Outcome of one fan-out.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct Delivery {
    pub delivered: usize,
    pub dropped: usize,
}

impl AddAssign for Delivery {
    fn add_assign(&mut self, other: Self) {
        self.delivered += other.delivered;
        self.dropped += other.dropped;
    }
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct HubStats {
    pub online_users: usize,
    pub connections: usize,
    pub chats: usize,
}

#[derive(Default)]
pub struct Registry {
    clients: HashMap<UserId, HashMap<ConnectionId, Arc<Connection>>>,
    chat_subscriptions: HashMap<ChatId, HashSet<UserId>>,
    /// Chats that have seen the user online since their first connection.
    /// Their offline edge goes to all of them.
    presence_audience: HashMap<UserId, HashSet<ChatId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection and subscribe its user to the connection's chats.
    /// Returns `true` if this is the user's first open connection.
    pub fn register(&mut self, conn: Arc<Connection>) -> bool {
        let user_id = conn.user_id();
        let audience = self.presence_audience.entry(user_id).or_default();
        for chat_id in conn.chat_ids() {
            self.chat_subscriptions
                .entry(chat_id)
                .or_default()
                .insert(user_id);
            audience.insert(chat_id);
        }
        conn.mark_open();

        let connections = self.clients.entry(user_id).or_default();
        let first = connections.is_empty();
        connections.insert(conn.id(), conn);

        info!(
            user_id,
            total_connections = connections.len(),
            "client registered"
        );
        first
    }

    /// Remove a connection and close it. Chats no remaining connection of the
    /// user listens to are pruned. When this removed the user's last
    /// connection, returns the sorted chats to announce the offline edge in;
    /// unknown or already removed connections are a no-op.
    pub fn unregister(&mut self, conn: &Connection) -> Option<Vec<ChatId>> {
        conn.close();
        let user_id = conn.user_id();

        let connections = self.clients.get_mut(&user_id)?;
        connections.remove(&conn.id())?;

        let remaining = connections.len();
        let mut departed = None;
        if remaining == 0 {
            self.clients.remove(&user_id);
            self.chat_subscriptions.retain(|_, users| {
                users.remove(&user_id);
                !users.is_empty()
            });
            let mut audience: Vec<ChatId> = self
                .presence_audience
                .remove(&user_id)
                .unwrap_or_default()
                .into_iter()
                .collect();
            audience.sort_unstable();
            departed = Some(audience);
        } else {
            let orphaned: Vec<ChatId> = conn
                .chat_ids()
                .into_iter()
                .filter(|&chat_id| !connections.values().any(|c| c.is_member(chat_id)))
                .collect();
            for chat_id in orphaned {
                self.remove_subscriber(chat_id, user_id);
            }
        }

        info!(
            user_id,
            remaining_connections = remaining,
            "client unregistered"
        );
        departed
    }

    /// Deliver to every connection of every subscriber of `chat_id`, except `exclude`.
    pub fn broadcast_to_chat(
        &self,
        chat_id: ChatId,
        event: &Arc<Event>,
        exclude: Option<UserId>,
    ) -> Delivery {
        let mut delivery = Delivery::default();
        let Some(users) = self.chat_subscriptions.get(&chat_id) else {
            return delivery;
        };

        for &user_id in users {
            if Some(user_id) == exclude {
                continue;
            }
            delivery += self.broadcast_to_user(user_id, event);
        }

        debug!(
            chat_id,
            event = %event.kind(),
            delivered = delivery.delivered,
            dropped = delivery.dropped,
            "broadcast to chat"
        );
        delivery
    }

    /// Deliver to every connection of one user.
    pub fn broadcast_to_user(&self, user_id: UserId, event: &Arc<Event>) -> Delivery {
        let mut delivery = Delivery::default();
        let Some(connections) = self.clients.get(&user_id) else {
            return delivery;
        };

        for conn in connections.values() {
            if conn.send(Arc::clone(event)) {
                delivery.delivered += 1;
                continue;
            }
            delivery.dropped += 1;
            if conn.is_closed() {
                debug!(user_id, connection_id = %conn.id(), "skipping closed connection");
            } else {
                warn!(
                    user_id,
                    connection_id = %conn.id(),
                    event = %event.kind(),
                    "client send buffer full, dropping message"
                );
            }
        }
        delivery
    }

    /// Route `chat_id` to an online user without a reconnect. Every open
    /// connection of the user joins the chat. Returns `false` if the user is offline.
    pub fn subscribe(&mut self, chat_id: ChatId, user_id: UserId) -> bool {
        let Some(connections) = self.clients.get(&user_id) else {
            return false;
        };
        for conn in connections.values() {
            conn.join_chat(chat_id);
        }
        self.chat_subscriptions
            .entry(chat_id)
            .or_default()
            .insert(user_id);
        self.presence_audience
            .entry(user_id)
            .or_default()
            .insert(chat_id);
        debug!(chat_id, user_id, "subscribed to chat");
        true
    }

    /// Stop routing `chat_id` to a user and drop it from their connections' chat sets.
    pub fn unsubscribe(&mut self, chat_id: ChatId, user_id: UserId) {
        if let Some(connections) = self.clients.get(&user_id) {
            for conn in connections.values() {
                conn.leave_chat(chat_id);
            }
        }
        self.remove_subscriber(chat_id, user_id);
        if let Some(audience) = self.presence_audience.get_mut(&user_id) {
            audience.remove(&chat_id);
        }
        debug!(chat_id, user_id, "unsubscribed from chat");
    }

    pub fn is_online(&self, user_id: UserId) -> bool {
        self.clients
            .get(&user_id)
            .is_some_and(|connections| !connections.is_empty())
    }

    /// The subset of `candidates` currently online, in candidate order.
    pub fn online_users(&self, candidates: &[UserId]) -> Vec<UserId> {
        candidates
            .iter()
            .copied()
            .filter(|&user_id| self.is_online(user_id))
            .collect()
    }

    /// Sorted subscribers of a chat.
    #[cfg(test)]
    pub(crate) fn subscribers(&self, chat_id: ChatId) -> Vec<UserId> {
        let mut users: Vec<UserId> = self
            .chat_subscriptions
            .get(&chat_id)
            .map(|users| users.iter().copied().collect())
            .unwrap_or_default();
        users.sort_unstable();
        users
    }

    pub fn stats(&self) -> HubStats {
        HubStats {
            online_users: self.clients.len(),
            connections: self.clients.values().map(HashMap::len).sum(),
            chats: self.chat_subscriptions.len(),
        }
    }

    /// Close every connection and forget all state.
    pub fn shutdown(&mut self) {
        for connections in self.clients.values() {
            for conn in connections.values() {
                conn.close();
            }
        }
        self.clients.clear();
        self.chat_subscriptions.clear();
        self.presence_audience.clear();
    }

    fn remove_subscriber(&mut self, chat_id: ChatId, user_id: UserId) {
        if let Some(users) = self.chat_subscriptions.get_mut(&chat_id) {
            users.remove(&user_id);
            if users.is_empty() {
                self.chat_subscriptions.remove(&chat_id);
            }
        }
    }
}
