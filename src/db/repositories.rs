//! Repositories: chat participants.

use crate::error::AppResult;
use crate::models::{ChatId, UserId};

use super::DbPool;

/// Chat IDs the user participates in, ascending.
pub async fn chat_ids_by_user(pool: &DbPool, user_id: UserId) -> AppResult<Vec<ChatId>> {
    let ids = sqlx::query_scalar::<_, i64>(
        "SELECT chat_id::BIGINT FROM chat_participants WHERE user_id = $1 ORDER BY chat_id",
    )
    .bind(user_id)
    .fetch_all(pool)
    .await?;
    Ok(ids)
}
