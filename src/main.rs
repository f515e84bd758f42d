//! notify-broker server entry point.
//!
//! Loads configuration, runs the broker and turns a fatal shutdown into an
//! alert and a non-zero exit so the process supervisor restarts it.

use std::process::ExitCode;
use std::time::Duration;

use tracing_subscriber::EnvFilter;

use notify_broker::config::{BrokerConfig, LogFormat};
use notify_broker::external::Alerter;
use notify_broker::server;
use notify_broker::service::ShutdownReason;

/// Time given to connection writers to flush the restart notice.
const RESTART_FLUSH: Duration = Duration::from_secs(1);

#[tokio::main]
async fn main() -> ExitCode {
    let config = BrokerConfig::from_env();
    init_tracing(
        config
            .as_ref()
            .map(|c| c.log_format)
            .unwrap_or(LogFormat::Text),
    );

    let config = match config {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "failed to load configuration");
            return ExitCode::FAILURE;
        }
    };
    tracing::info!(
        addr = %config.listen_addr,
        channel = %config.backbone_channel,
        "starting notify-broker"
    );

    let alerter = Alerter::new(config.pushbullet_token.clone(), config.alert_timeout);
    if !alerter.is_enabled() {
        tracing::warn!("PUSHBULLET_TOKEN not set; critical alerts are only logged");
    }

    match server::run(config).await {
        Ok(ShutdownReason::HeartbeatTimeout { silent_for }) => {
            let message = format!(
                "WebSocket server missed backbone heartbeats for {}s, restarting",
                silent_for.as_secs()
            );
            tokio::join!(
                alerter.critical(&message),
                tokio::time::sleep(RESTART_FLUSH)
            );
        }
        Ok(ShutdownReason::EventsClosed) => {
            tracing::error!("broker event loop stopped");
        }
        Err(err) => {
            alerter
                .critical(&format!("WebSocket server failure: {err}"))
                .await;
        }
    }
    ExitCode::FAILURE
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    match format {
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(filter).init(),
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .init(),
    }
}
