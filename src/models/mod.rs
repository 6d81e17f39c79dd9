//! Data models for wire events and presence queries.

pub mod event;
pub mod presence;

pub use event::*;
pub use presence::*;

/// Numeric ids as issued by the users/chats/messages repositories.
pub type UserId = i64;
pub type ChatId = i64;
pub type MessageId = i64;
