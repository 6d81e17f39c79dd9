//! Identity check used by the WebSocket upgrade and REST endpoints.

use async_trait::async_trait;

use crate::error::{AppError, AppResult};
use crate::models::UserId;

use super::jwt::{JwtSecret, TokenType};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthenticatedUser {
    pub id: UserId,
    pub role: String,
}

#[async_trait]
pub trait TokenValidator: Send + Sync {
    async fn validate_token(&self, token: &str) -> AppResult<AuthenticatedUser>;
}

/// Accepts unexpired access tokens signed with this secret.
#[async_trait]
impl TokenValidator for JwtSecret {
    async fn validate_token(&self, token: &str) -> AppResult<AuthenticatedUser> {
        let claims = self.validate(token)?;
        if claims.token_type != TokenType::Access {
            return Err(AppError::Auth("access token required".to_string()));
        }
        Ok(AuthenticatedUser {
            id: claims.user_id,
            role: claims.role,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn access_token_yields_user() {
        let jwt = JwtSecret::new("secret".to_string());
        let token = jwt
            .issue(9, "user", TokenType::Access, Duration::minutes(1))
            .unwrap();
        let user = tokio_test::assert_ok!(jwt.validate_token(&token).await);
        assert_eq!(
            user,
            AuthenticatedUser {
                id: 9,
                role: "user".to_string()
            }
        );
    }

    #[tokio::test]
    async fn refresh_token_is_rejected() {
        let jwt = JwtSecret::new("secret".to_string());
        let token = jwt
            .issue(9, "user", TokenType::Refresh, Duration::days(1))
            .unwrap();
        assert!(matches!(
            jwt.validate_token(&token).await,
            Err(AppError::Auth(_))
        ));
    }

    #[tokio::test]
    async fn garbage_is_rejected() {
        let validator: &dyn TokenValidator = &JwtSecret::new("secret".to_string());
        tokio_test::assert_err!(validator.validate_token("not-a-jwt").await);
    }
}
