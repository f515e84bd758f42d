//! Domain layer: connection state, subscription index, backbone messages
//! and heartbeat policy.
//!
//! Everything here is synchronous and owned by the broker event loop; none
//! of these types take locks.

pub mod auth;
pub mod backbone_message;
pub mod connection;
pub mod connection_id;
pub mod connection_registry;
pub mod heartbeat;
pub mod subscription_index;

pub use auth::{AuthOutcome, AuthRequest, TokenPayload};
pub use backbone_message::BackboneMessage;
pub use connection::{AuthState, Connection, ConnectionSink, OutboundFrame};
pub use connection_id::ConnectionId;
pub use connection_registry::ConnectionRegistry;
pub use heartbeat::{HeartbeatMonitor, HeartbeatState, HeartbeatVerdict, MonitorStatus};
pub use subscription_index::SubscriptionIndex;
