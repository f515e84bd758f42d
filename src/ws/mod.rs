//! WebSocket layer: upgrade handling and per-connection I/O.
//!
//! The endpoint at `/ws` accepts clients; everything they send is handed
//! to the broker loop, and everything the broker queues is written back.

pub mod connection;
pub mod handler;
