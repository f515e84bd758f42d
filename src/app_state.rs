//! Shared application state injected into all Axum handlers.

use crate::service::BrokerHandle;

/// Shared application state available to all handlers via Axum's
/// `State` extractor.
#[derive(Debug, Clone)]
pub struct AppState {
    /// Entry point into the broker event loop.
    pub broker: BrokerHandle,
    /// Capacity of each connection's outbound queue.
    pub connection_buffer: usize,
}
