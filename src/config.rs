//! Broker configuration loaded from environment variables.
//!
//! Follows 12-factor style: all settings come from environment variables
//! (or a `.env` file via `dotenvy`) and are read once at startup.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::error::BrokerError;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// Human-readable lines.
    Text,
    /// One JSON object per line.
    Json,
}

/// Certificate and key for serving `wss://`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsConfig {
    /// PEM certificate chain.
    pub cert_path: PathBuf,
    /// PEM private key.
    pub key_path: PathBuf,
}

/// Top-level broker configuration.
///
/// Loaded once at startup via [`BrokerConfig::from_env`].
#[derive(Debug, Clone)]
pub struct BrokerConfig {
    /// Socket address to bind the WebSocket server to.
    pub listen_addr: SocketAddr,

    /// Redis URL used for both token lookups and the backbone.
    pub redis_url: String,

    /// Pub/sub channel carrying notifications and heartbeats.
    pub backbone_channel: String,

    /// Nominal interval of the external heartbeat producer.
    pub heartbeat_interval: Duration,

    /// Extra silence tolerated on top of two missed heartbeats.
    pub heartbeat_grace: Duration,

    /// How often the heartbeat monitor runs.
    pub heartbeat_check_period: Duration,

    /// Disables restart-on-missed-heartbeat.
    pub development_mode: bool,

    /// Optional TLS material.
    pub tls: Option<TlsConfig>,

    /// Pushbullet access token for critical alerts.
    pub pushbullet_token: Option<String>,

    /// Upper bound on delivering a critical alert.
    pub alert_timeout: Duration,

    /// Capacity of the broker event queue.
    pub event_queue_capacity: usize,

    /// Capacity of each connection's outbound queue.
    pub connection_buffer: usize,

    /// Log output format.
    pub log_format: LogFormat,
}

impl BrokerConfig {
    /// Loads configuration from environment variables.
    ///
    /// Falls back to defaults when a variable is not set. Calls
    /// `dotenvy::dotenv().ok()` to optionally load a `.env` file.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Config`] if `LISTEN_ADDR` cannot be parsed or
    /// only one of `TLS_CERT_PATH` / `TLS_KEY_PATH` is set.
    pub fn from_env() -> Result<Self, BrokerError> {
        dotenvy::dotenv().ok();
        Self::from_source(|key| std::env::var(key).ok())
    }

    /// Builds the configuration from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Same as [`BrokerConfig::from_env`].
    pub fn from_source(get: impl Fn(&str) -> Option<String>) -> Result<Self, BrokerError> {
        let raw_addr = get("LISTEN_ADDR").unwrap_or_else(|| "0.0.0.0:5080".to_string());
        let listen_addr: SocketAddr = raw_addr
            .parse()
            .map_err(|e| BrokerError::Config(format!("LISTEN_ADDR {raw_addr}: {e}")))?;

        let redis_url = get("REDIS_URL").unwrap_or_else(|| "redis://127.0.0.1:6379".to_string());
        let backbone_channel =
            get("BACKBONE_CHANNEL").unwrap_or_else(|| "notification_backbone".to_string());

        let heartbeat_interval = secs(&get, "BACKBONE_HEARTBEAT_INTERVAL_SECS", 120);
        let heartbeat_grace = secs(&get, "HEARTBEAT_GRACE_SECS", 5);
        let heartbeat_check_period = secs(&get, "HEARTBEAT_CHECK_PERIOD_SECS", 15);
        let development_mode = parse_bool(get("DEVELOPMENT_MODE").as_deref(), false);

        let tls = match (get("TLS_CERT_PATH"), get("TLS_KEY_PATH")) {
            (Some(cert), Some(key)) => Some(TlsConfig {
                cert_path: cert.into(),
                key_path: key.into(),
            }),
            (None, None) => None,
            _ => {
                return Err(BrokerError::Config(
                    "TLS_CERT_PATH and TLS_KEY_PATH must be set together".to_string(),
                ));
            }
        };

        let pushbullet_token = get("PUSHBULLET_TOKEN").filter(|t| !t.is_empty());
        let alert_timeout = secs(&get, "ALERT_TIMEOUT_SECS", 5);
        let event_queue_capacity = parse(&get, "EVENT_QUEUE_CAPACITY", 10_000);
        let connection_buffer = parse(&get, "CONNECTION_BUFFER", 256);

        let log_format = match get("LOG_FORMAT").as_deref() {
            Some("json") | Some("JSON") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        Ok(Self {
            listen_addr,
            redis_url,
            backbone_channel,
            heartbeat_interval,
            heartbeat_grace,
            heartbeat_check_period,
            development_mode,
            tls,
            pushbullet_token,
            alert_timeout,
            event_queue_capacity,
            connection_buffer,
            log_format,
        })
    }
}

/// Parses a variable as `T`, returning `default` on missing or invalid
/// values.
fn parse<T: std::str::FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str, default: T) -> T {
    get(key).and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn secs(get: &impl Fn(&str) -> Option<String>, key: &str, default: u64) -> Duration {
    Duration::from_secs(parse(get, key, default))
}

/// Accepts `"true"`, `"1"`, `"false"`, `"0"` (either case). Returns
/// `default` otherwise.
fn parse_bool(value: Option<&str>, default: bool) -> bool {
    match value {
        Some("true") | Some("TRUE") | Some("1") => true,
        Some("false") | Some("FALSE") | Some("0") => false,
        _ => default,
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn load(pairs: &[(&str, &str)]) -> Result<BrokerConfig, BrokerError> {
        let vars: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        BrokerConfig::from_source(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults() {
        let Ok(config) = load(&[]) else {
            panic!("defaults should load");
        };
        assert_eq!(config.listen_addr.port(), 5080);
        assert_eq!(config.heartbeat_interval, Duration::from_secs(120));
        assert_eq!(config.heartbeat_grace, Duration::from_secs(5));
        assert_eq!(config.heartbeat_check_period, Duration::from_secs(15));
        assert!(!config.development_mode);
        assert!(config.tls.is_none());
        assert!(config.pushbullet_token.is_none());
        assert_eq!(config.log_format, LogFormat::Text);
    }

    #[test]
    fn overrides() {
        let Ok(config) = load(&[
            ("LISTEN_ADDR", "127.0.0.1:9000"),
            ("BACKBONE_CHANNEL", "grepo"),
            ("BACKBONE_HEARTBEAT_INTERVAL_SECS", "30"),
            ("DEVELOPMENT_MODE", "1"),
            ("TLS_CERT_PATH", "/etc/cert.pem"),
            ("TLS_KEY_PATH", "/etc/key.pem"),
            ("LOG_FORMAT", "json"),
        ]) else {
            panic!("overrides should load");
        };
        assert_eq!(config.listen_addr.port(), 9000);
        assert_eq!(config.backbone_channel, "grepo");
        assert_eq!(config.heartbeat_interval, Duration::from_secs(30));
        assert!(config.development_mode);
        assert_eq!(
            config.tls,
            Some(TlsConfig {
                cert_path: "/etc/cert.pem".into(),
                key_path: "/etc/key.pem".into(),
            })
        );
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn invalid_numbers_fall_back() {
        let Ok(config) = load(&[("HEARTBEAT_GRACE_SECS", "soon")]) else {
            panic!("config should load");
        };
        assert_eq!(config.heartbeat_grace, Duration::from_secs(5));
    }

    #[test]
    fn half_tls_is_rejected() {
        let result = load(&[("TLS_CERT_PATH", "/etc/cert.pem")]);
        assert!(matches!(result, Err(BrokerError::Config(_))));
    }

    #[test]
    fn bad_listen_addr_is_rejected() {
        assert!(load(&[("LISTEN_ADDR", "nowhere")]).is_err());
    }

    #[test]
    fn bool_parsing() {
        assert!(parse_bool(Some("TRUE"), false));
        assert!(!parse_bool(Some("0"), true));
        assert!(parse_bool(Some("maybe"), true));
    }
}
