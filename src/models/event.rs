//! Wire events exchanged over the chat WebSocket.
//!
//! Server → client frames are `{"type": "...", "payload": {...}}`. Each
//! [`EventType`] has exactly one payload shape; [`Event`] can only be built
//! through its constructors, so a mismatched pair cannot exist.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{ChatId, MessageId, UserId};

/// Event type tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventType {
    #[serde(rename = "message.new")]
    MessageNew,
    #[serde(rename = "message.edit")]
    MessageEdit,
    #[serde(rename = "message.delete")]
    MessageDelete,
    #[serde(rename = "message.read")]
    MessageRead,
    #[serde(rename = "typing.start")]
    TypingStart,
    #[serde(rename = "typing.stop")]
    TypingStop,
    #[serde(rename = "presence.online")]
    PresenceOnline,
    #[serde(rename = "presence.offline")]
    PresenceOffline,
    #[serde(rename = "error")]
    Error,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::MessageNew => "message.new",
            EventType::MessageEdit => "message.edit",
            EventType::MessageDelete => "message.delete",
            EventType::MessageRead => "message.read",
            EventType::TypingStart => "typing.start",
            EventType::TypingStop => "typing.stop",
            EventType::PresenceOnline => "presence.online",
            EventType::PresenceOffline => "presence.offline",
            EventType::Error => "error",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Server → client envelope. Immutable once built; the hub shares one
/// instance between every recipient behind an `Arc`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Event {
    #[serde(rename = "type")]
    kind: EventType,
    payload: Payload,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Message(MessagePayload),
    MessageDelete(MessageDeletePayload),
    MessageRead(MessageReadPayload),
    Typing(TypingPayload),
    Presence(PresencePayload),
    Error(ErrorPayload),
}

/// `message.new` / `message.edit`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessagePayload {
    pub id: MessageId,
    pub chat_id: ChatId,
    pub sender_id: UserId,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sent_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub edited_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageDeletePayload {
    pub id: MessageId,
    pub chat_id: ChatId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MessageReadPayload {
    pub chat_id: ChatId,
    pub user_id: UserId,
    pub message_id: MessageId,
    pub read_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TypingPayload {
    pub chat_id: ChatId,
    pub user_id: UserId,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PresencePayload {
    pub user_id: UserId,
    pub online: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_seen: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorPayload {
    pub code: String,
    pub message: String,
}

impl Event {
    pub fn message_new(
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        content: impl Into<String>,
        sent_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventType::MessageNew,
            payload: Payload::Message(MessagePayload {
                id: message_id,
                chat_id,
                sender_id,
                content: content.into(),
                sent_at: Some(sent_at),
                edited_at: None,
            }),
        }
    }

    pub fn message_edit(
        chat_id: ChatId,
        message_id: MessageId,
        sender_id: UserId,
        content: impl Into<String>,
        edited_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventType::MessageEdit,
            payload: Payload::Message(MessagePayload {
                id: message_id,
                chat_id,
                sender_id,
                content: content.into(),
                sent_at: None,
                edited_at: Some(edited_at),
            }),
        }
    }

    pub fn message_delete(chat_id: ChatId, message_id: MessageId) -> Self {
        Self {
            kind: EventType::MessageDelete,
            payload: Payload::MessageDelete(MessageDeletePayload {
                id: message_id,
                chat_id,
            }),
        }
    }

    pub fn message_read(
        chat_id: ChatId,
        user_id: UserId,
        message_id: MessageId,
        read_at: DateTime<Utc>,
    ) -> Self {
        Self {
            kind: EventType::MessageRead,
            payload: Payload::MessageRead(MessageReadPayload {
                chat_id,
                user_id,
                message_id,
                read_at,
            }),
        }
    }

    /// `typing.start` when `started`, otherwise `typing.stop`.
    pub fn typing(started: bool, chat_id: ChatId, user_id: UserId) -> Self {
        Self {
            kind: if started {
                EventType::TypingStart
            } else {
                EventType::TypingStop
            },
            payload: Payload::Typing(TypingPayload { chat_id, user_id }),
        }
    }

    pub fn presence_online(user_id: UserId) -> Self {
        Self {
            kind: EventType::PresenceOnline,
            payload: Payload::Presence(PresencePayload {
                user_id,
                online: true,
                last_seen: None,
            }),
        }
    }

    pub fn presence_offline(user_id: UserId, last_seen: DateTime<Utc>) -> Self {
        Self {
            kind: EventType::PresenceOffline,
            payload: Payload::Presence(PresencePayload {
                user_id,
                online: false,
                last_seen: Some(last_seen),
            }),
        }
    }

    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            kind: EventType::Error,
            payload: Payload::Error(ErrorPayload {
                code: code.into(),
                message: message.into(),
            }),
        }
    }

    pub fn kind(&self) -> EventType {
        self.kind
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }
}

/// Client → server frame. Only `typing.start` and `typing.stop` are acted on.
#[derive(Debug, Clone, Deserialize)]
pub struct ClientMessage {
    #[serde(rename = "type")]
    pub kind: ClientEventKind,
    #[serde(default)]
    pub payload: ClientPayload,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub enum ClientEventKind {
    #[serde(rename = "typing.start")]
    TypingStart,
    #[serde(rename = "typing.stop")]
    TypingStop,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ClientPayload {
    #[serde(default)]
    pub chat_id: Option<ChatId>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 5, 1, 12, 30, 0).unwrap()
    }

    #[test]
    fn message_new_envelope() {
        let event = Event::message_new(7, 55, 1, "hi", at());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({
                "type": "message.new",
                "payload": {
                    "id": 55,
                    "chat_id": 7,
                    "sender_id": 1,
                    "content": "hi",
                    "sent_at": "2024-05-01T12:30:00Z"
                }
            })
        );
    }

    #[test]
    fn message_edit_carries_edited_at_only() {
        let event = Event::message_edit(7, 55, 1, "hello", at());
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "message.edit");
        assert_eq!(value["payload"]["edited_at"], "2024-05-01T12:30:00Z");
        assert!(value["payload"].get("sent_at").is_none());
    }

    #[test]
    fn presence_omits_missing_last_seen() {
        let online = serde_json::to_value(Event::presence_online(4)).unwrap();
        assert_eq!(
            online,
            json!({ "type": "presence.online", "payload": { "user_id": 4, "online": true } })
        );

        let offline = serde_json::to_value(Event::presence_offline(4, at())).unwrap();
        assert_eq!(offline["payload"]["online"], false);
        assert_eq!(offline["payload"]["last_seen"], "2024-05-01T12:30:00Z");
    }

    #[test]
    fn typing_and_delete_shapes() {
        let typing = serde_json::to_value(Event::typing(false, 3, 9)).unwrap();
        assert_eq!(
            typing,
            json!({ "type": "typing.stop", "payload": { "chat_id": 3, "user_id": 9 } })
        );

        let delete = serde_json::to_value(Event::message_delete(3, 12)).unwrap();
        assert_eq!(
            delete,
            json!({ "type": "message.delete", "payload": { "id": 12, "chat_id": 3 } })
        );
    }

    #[test]
    fn read_and_error_shapes() {
        let read = serde_json::to_value(Event::message_read(7, 2, 55, at())).unwrap();
        assert_eq!(
            read["payload"],
            json!({ "chat_id": 7, "user_id": 2, "message_id": 55, "read_at": "2024-05-01T12:30:00Z" })
        );

        let err = serde_json::to_value(Event::error("forbidden", "nope")).unwrap();
        assert_eq!(
            err,
            json!({ "type": "error", "payload": { "code": "forbidden", "message": "nope" } })
        );
    }

    #[test]
    fn event_type_display_matches_wire_tag() {
        for kind in [
            EventType::MessageNew,
            EventType::MessageRead,
            EventType::TypingStart,
            EventType::PresenceOffline,
            EventType::Error,
        ] {
            let tag = serde_json::to_value(kind).unwrap();
            assert_eq!(tag, json!(kind.to_string()));
        }
    }

    #[test]
    fn client_message_parses_typing() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"typing.start","payload":{"chat_id":7}}"#).unwrap();
        assert_eq!(msg.kind, ClientEventKind::TypingStart);
        assert_eq!(msg.payload.chat_id, Some(7));
    }

    #[test]
    fn client_message_unknown_type_and_missing_payload() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"message.new"}"#).unwrap();
        assert_eq!(msg.kind, ClientEventKind::Unknown);
        assert_eq!(msg.payload.chat_id, None);
    }
}
