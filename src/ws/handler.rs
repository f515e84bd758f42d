//! Axum WebSocket upgrade handler.

use std::net::SocketAddr;

use axum::extract::ws::WebSocketUpgrade;
use axum::extract::{ConnectInfo, State};
use axum::response::IntoResponse;

use super::connection::run_connection;
use crate::app_state::AppState;

/// `GET /ws` — Upgrade HTTP connection to WebSocket.
///
/// The peer IP is captured here; token payloads are bound to it.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    State(state): State<AppState>,
) -> impl IntoResponse {
    let remote_address = remote.ip().to_canonical().to_string();
    let broker = state.broker.clone();
    let buffer = state.connection_buffer;

    ws.on_upgrade(move |socket| run_connection(socket, remote_address, broker, buffer))
}
