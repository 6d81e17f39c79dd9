//! Online-status query: who among these users is connected right now.

use serde::{Deserialize, Serialize};
use validator::Validate;

use super::UserId;

/// Body of `POST /chat/users/online-status`.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct OnlineStatusRequest {
    #[validate(length(min = 1, max = 100))]
    pub user_ids: Vec<UserId>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserOnlineStatus {
    pub user_id: UserId,
    pub is_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OnlineStatusResponse {
    pub statuses: Vec<UserOnlineStatus>,
}

impl OnlineStatusResponse {
    /// One status per requested id, in request order.
    pub fn from_online(requested: &[UserId], online: &[UserId]) -> Self {
        let statuses = requested
            .iter()
            .map(|&user_id| UserOnlineStatus {
                user_id,
                is_online: online.contains(&user_id),
            })
            .collect();
        Self { statuses }
    }
}
