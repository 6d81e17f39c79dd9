//! Broadcaster: the seam message use-cases call after a durable write.
//!
//! Every method is fire-and-forget. A failed or dropped delivery never turns
//! into an error for the caller.

use chrono::{DateTime, Utc};

use crate::models::{ChatId, Event, MessageId, UserId};

use super::hub::Hub;

pub trait Broadcaster: Send + Sync {
    /// `message.new` to the whole chat, sender included (their other devices).
    fn new_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        content: &str,
        sent_at: DateTime<Utc>,
    );

    fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        content: &str,
        edited_at: DateTime<Utc>,
    );

    fn delete_message(&self, chat_id: ChatId, message_id: MessageId);

    /// `message.read` to the chat, excluding the reader.
    fn read_receipt(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        message_id: MessageId,
        read_at: DateTime<Utc>,
    );
}

/// Broadcaster backed by the live hub.
#[derive(Clone)]
pub struct HubBroadcaster {
    hub: Hub,
}

impl HubBroadcaster {
    pub fn new(hub: Hub) -> Self {
        Self { hub }
    }
}

impl Broadcaster for HubBroadcaster {
    fn new_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        content: &str,
        sent_at: DateTime<Utc>,
    ) {
        let event = Event::message_new(chat_id, message_id, sender_id, content, sent_at);
        self.hub.broadcast_to_chat(chat_id, event, None);
    }

    fn edit_message(
        &self,
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        content: &str,
        edited_at: DateTime<Utc>,
    ) {
        let event = Event::message_edit(chat_id, message_id, sender_id, content, edited_at);
        self.hub.broadcast_to_chat(chat_id, event, None);
    }

    fn delete_message(&self, chat_id: ChatId, message_id: MessageId) {
        self.hub
            .broadcast_to_chat(chat_id, Event::message_delete(chat_id, message_id), None);
    }

    fn read_receipt(
        &self,
        chat_id: ChatId,
        user_id: UserId,
        message_id: MessageId,
        read_at: DateTime<Utc>,
    ) {
        let event = Event::message_read(chat_id, user_id, message_id, read_at);
        self.hub.broadcast_to_chat(chat_id, event, Some(user_id));
    }
}

/// Accepts everything and delivers nothing. For tests and deployments without real-time delivery.
#[derive(Debug, Clone, Copy, Default)]
pub struct NopBroadcaster;

impl Broadcaster for NopBroadcaster {
    fn new_message(&self, _: ChatId, _: MessageId, _: UserId, _: &str, _: DateTime<Utc>) {}

    fn edit_message(&self, _: ChatId, _: MessageId, _: UserId, _: &str, _: DateTime<Utc>) {}

    fn delete_message(&self, _: ChatId, _: MessageId) {}

    fn read_receipt(&self, _: ChatId, _: UserId, _: MessageId, _: DateTime<Utc>) {}
}
