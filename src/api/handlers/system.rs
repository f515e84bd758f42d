//! System endpoints: health check.

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::get;
use axum::{Json, Router};
use chrono::Utc;
use serde::Serialize;
use utoipa::ToSchema;

use crate::app_state::AppState;
use crate::error::BrokerError;

/// Health check response.
#[derive(Debug, Serialize, ToSchema)]
struct HealthResponse {
    status: String,
    timestamp: String,
    version: String,
    started_at: String,
    uptime_secs: u64,
    connections: usize,
    authenticated: usize,
    users: usize,
    teams: usize,
    secs_since_heartbeat: u64,
}

/// `GET /health` — Broker health and counters.
///
/// # Errors
///
/// Returns [`BrokerError::BrokerUnavailable`] (503) if the broker loop has
/// stopped.
#[utoipa::path(
    get,
    path = "/health",
    tag = "System",
    summary = "Health check",
    description = "Returns broker status, version, connection counters and backbone heartbeat age.",
    responses(
        (status = 200, description = "Broker is running", body = HealthResponse),
        (status = 503, description = "Broker event loop stopped"),
    )
)]
pub async fn health_handler(State(state): State<AppState>) -> Result<impl IntoResponse, BrokerError> {
    let stats = state.broker.stats().await?;
    Ok((
        StatusCode::OK,
        Json(HealthResponse {
            status: "healthy".to_string(),
            timestamp: Utc::now().to_rfc3339(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at: stats.started_at.to_rfc3339(),
            uptime_secs: stats.uptime_secs,
            connections: stats.connections,
            authenticated: stats.authenticated,
            users: stats.users,
            teams: stats.teams,
            secs_since_heartbeat: stats.secs_since_heartbeat,
        }),
    ))
}

/// System routes mounted at the root level.
pub fn routes() -> Router<AppState> {
    Router::new().route("/health", get(health_handler))
}
