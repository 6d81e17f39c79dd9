//! Chat membership: which chats a user participates in, read once per connection.

use async_trait::async_trait;

use crate::db::{self, DbPool};
use crate::error::AppResult;
use crate::models::{ChatId, UserId};

#[async_trait]
pub trait ChatMembership: Send + Sync {
    async fn user_chat_ids(&self, user_id: UserId) -> AppResult<Vec<ChatId>>;
}

/// Membership backed by the `chat_participants` table.
#[derive(Clone)]
pub struct PgChatMembership {
    pool: DbPool,
}

impl PgChatMembership {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ChatMembership for PgChatMembership {
    async fn user_chat_ids(&self, user_id: UserId) -> AppResult<Vec<ChatId>> {
        db::chat_ids_by_user(&self.pool, user_id).await
    }
}
