//! # notify-broker
//!
//! Real-time WebSocket notification broker fed by a Redis pub/sub
//! backbone.
//!
//! Clients connect over WebSocket and authenticate once with a short-lived
//! token looked up in Redis and bound to their network address. The broker
//! indexes authenticated connections by user and team and relays
//! notifications from the backbone channel to the matching connections.
//! It watches the backbone heartbeat and stops for a supervisor restart
//! when the subscription goes silent.
//!
//! ## Architecture
//!
//! ```text
//! Clients (WebSocket)          Redis pub/sub backbone
//!     │                               │
//!     ├── WS transport (ws/)          ├── backbone listener (external/)
//!     │                               │
//!     └──────────► BrokerHandle ◄─────┘
//!                      │
//!                 EventLoop (service/) ── TokenStore (external/, Redis GET)
//!                      │
//!                 Broker: ConnectionRegistry, SubscriptionIndex,
//!                         HeartbeatState (domain/)
//! ```

pub mod api;
pub mod app_state;
pub mod config;
pub mod domain;
pub mod error;
pub mod external;
pub mod server;
pub mod service;
pub mod ws;
