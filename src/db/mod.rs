//! Database layer: pool and chat-participant queries for PostgreSQL.

mod pool;
mod repositories;

pub use pool::{create_pool, DbPool};
pub use repositories::*;
