//! Composition root.
//!
//! Wires the transport, the token store, the backbone subscription and the
//! broker loop together. Broker state is created once here and lives until
//! the process exits; it is reachable only through the [`BrokerHandle`]
//! passed to the transport and the backbone listener.

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use axum_server::tls_rustls::RustlsConfig;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::api;
use crate::app_state::AppState;
use crate::config::{BrokerConfig, TlsConfig};
use crate::domain::HeartbeatMonitor;
use crate::error::BrokerError;
use crate::external::{RedisTokenStore, TokenStore, backbone};
use crate::service::{Broker, BrokerHandle, EventLoop, ShutdownReason};
use crate::ws::handler::ws_handler;

/// Builds the HTTP router: `/ws` plus the system endpoints.
pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(api::build_router())
        .route("/ws", get(ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Creates the broker and spawns its event loop.
pub fn start_broker(
    config: &BrokerConfig,
    token_store: Arc<dyn TokenStore>,
) -> (BrokerHandle, JoinHandle<ShutdownReason>) {
    let (handle, rx) = BrokerHandle::channel(config.event_queue_capacity);
    let monitor = HeartbeatMonitor::new(
        config.heartbeat_interval,
        config.heartbeat_grace,
        config.development_mode,
    );
    if config.development_mode {
        tracing::warn!("development mode: missed heartbeats will not restart the broker");
    }
    let event_loop = EventLoop::new(
        Broker::new(config.backbone_channel.clone(), Instant::now()),
        monitor,
        config.heartbeat_check_period,
        token_store,
        &handle,
        rx,
    );
    (handle, tokio::spawn(event_loop.run()))
}

/// Runs the broker until a fatal condition.
///
/// Returns the [`ShutdownReason`] reported by the event loop; the caller
/// alerts and exits.
///
/// # Errors
///
/// Returns a [`BrokerError`] if Redis is unreachable at startup, the
/// listener cannot be bound, the TLS material cannot be loaded, or the
/// server stops.
pub async fn run(config: BrokerConfig) -> Result<ShutdownReason, BrokerError> {
    let client = redis::Client::open(config.redis_url.as_str())
        .map_err(|e| BrokerError::Config(format!("REDIS_URL: {e}")))?;
    let token_store = RedisTokenStore::connect(&client).await?;
    let messages = backbone::subscribe(&client, &config.backbone_channel).await?;

    let transport = match &config.tls {
        Some(tls) => Transport::Tls(load_tls(tls).await?),
        None => Transport::Plain(tokio::net::TcpListener::bind(config.listen_addr).await?),
    };

    let (handle, broker_task) = start_broker(&config, Arc::new(token_store));

    let listener_handle = handle.clone();
    tokio::spawn(async move {
        if let Err(err) = backbone::forward(messages, &listener_handle).await {
            tracing::error!(error = %err, "backbone listener stopped");
        }
    });

    let app = build_app(AppState {
        broker: handle,
        connection_buffer: config.connection_buffer,
    });
    let service = app.into_make_service_with_connect_info::<SocketAddr>();
    let addr = config.listen_addr;

    let server = async move {
        match transport {
            Transport::Plain(listener) => {
                tracing::info!(%addr, "server listening");
                axum::serve(listener, service).await?;
            }
            Transport::Tls(tls) => {
                tracing::info!(%addr, "server listening (tls)");
                axum_server::bind_rustls(addr, tls).serve(service).await?;
            }
        }
        Ok::<(), BrokerError>(())
    };

    tokio::select! {
        result = server => {
            result?;
            Err(BrokerError::Internal("server stopped".to_string()))
        }
        reason = broker_task => {
            reason.map_err(|e| BrokerError::Internal(format!("broker loop aborted: {e}")))
        }
    }
}

/// Bound plain listener, or TLS material for `wss://`.
enum Transport {
    Plain(tokio::net::TcpListener),
    Tls(RustlsConfig),
}

async fn load_tls(tls: &TlsConfig) -> Result<RustlsConfig, BrokerError> {
    RustlsConfig::from_pem_file(&tls.cert_path, &tls.key_path)
        .await
        .map_err(|e| {
            BrokerError::Config(format!(
                "tls material {} / {}: {e}",
                tls.cert_path.display(),
                tls.key_path.display()
            ))
        })
}
