//! JWT issue and validation.

use crate::error::{AppError, AppResult};
use crate::models::UserId;
use chrono::{Duration, Utc};
use jsonwebtoken::{decode, encode, Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TokenType {
    Access,
    Refresh,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub user_id: UserId,
    pub role: String,
    #[serde(rename = "type")]
    pub token_type: TokenType,
    pub exp: i64,
    pub iat: i64,
}

#[derive(Clone)]
pub struct JwtSecret {
    secret: String,
}

impl JwtSecret {
    pub fn new(secret: String) -> Self {
        Self { secret }
    }

    pub fn issue(
        &self,
        user_id: UserId,
        role: &str,
        token_type: TokenType,
        ttl: Duration,
    ) -> AppResult<String> {
        let now = Utc::now();
        let claims = Claims {
            user_id,
            role: role.to_string(),
            token_type,
            exp: (now + ttl).timestamp(),
            iat: now.timestamp(),
        };
        let token = encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.secret.as_bytes()),
        )
        .map_err(|e| AppError::Jwt(e.to_string()))?;
        Ok(token)
    }

    /// Verify signature and expiry; returns the claims of any token type.
    pub fn validate(&self, token: &str) -> AppResult<Claims> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.validate_exp = true;
        validation.leeway = 0;
        validation.required_spec_claims.clear();
        validation.required_spec_claims.insert("exp".to_string());
        let data = decode::<Claims>(
            token,
            &DecodingKey::from_secret(self.secret.as_bytes()),
            &validation,
        )
        .map_err(|e| AppError::Jwt(e.to_string()))?;
        Ok(data.claims)
    }
}
