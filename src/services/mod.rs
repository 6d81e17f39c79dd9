//! Real-time delivery: connections, the hub, broadcasting, presence and membership.

pub mod broadcaster;
pub mod connection;
pub mod hub;
pub mod membership;
pub mod presence;
pub mod registry;

pub use broadcaster::{Broadcaster, HubBroadcaster, NopBroadcaster};
pub use connection::{Connection, ConnectionId, ConnectionState, OutboundQueue};
pub use hub::{Hub, HubRunner};
pub use membership::{ChatMembership, PgChatMembership};
pub use presence::OnlineChecker;
pub use registry::{Delivery, HubStats, Registry};
