//! Authentication: JWT access-token validation.

mod jwt;
mod portal;

pub use jwt::{Claims, JwtSecret, TokenType};
pub use portal::{AuthenticatedUser, TokenValidator};
