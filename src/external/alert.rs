//! Paging alerts via Pushbullet.
//!
//! Alerts are a side channel for fatal conditions only. They never block
//! shutdown: [`Alerter::critical`] is bounded by a timeout and swallows
//! delivery failures after logging them.

use std::time::Duration;

use serde::Serialize;

use crate::error::BrokerError;

/// Pushbullet push endpoint.
pub const PUSHBULLET_ENDPOINT: &str = "https://api.pushbullet.com/v2/pushes";

const ALERT_TITLE: &str = "notify-broker alert";

/// Request body of a Pushbullet note.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct PushNote<'a> {
    /// Always `"note"`.
    #[serde(rename = "type")]
    pub kind: &'static str,
    /// Notification title.
    pub title: &'a str,
    /// Notification body.
    pub body: &'a str,
}

impl<'a> PushNote<'a> {
    /// Builds a note with the broker's alert title.
    #[must_use]
    pub const fn new(body: &'a str) -> Self {
        Self {
            kind: "note",
            title: ALERT_TITLE,
            body,
        }
    }
}

/// Sends alerts to the developer's Pushbullet account.
///
/// Without an access token alerts are only logged.
#[derive(Debug, Clone)]
pub struct Alerter {
    http: reqwest::Client,
    token: Option<String>,
    endpoint: String,
    timeout: Duration,
}

impl Alerter {
    /// Creates an alerter. `token` is the Pushbullet access token.
    #[must_use]
    pub fn new(token: Option<String>, timeout: Duration) -> Self {
        Self {
            http: reqwest::Client::new(),
            token: token.filter(|t| !t.is_empty()),
            endpoint: PUSHBULLET_ENDPOINT.to_string(),
            timeout,
        }
    }

    /// Returns `true` if alerts leave the process.
    #[must_use]
    pub const fn is_enabled(&self) -> bool {
        self.token.is_some()
    }

    /// Delivers one alert.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::Alert`] if the request fails or Pushbullet
    /// answers with an error status.
    pub async fn send(&self, message: &str) -> Result<(), BrokerError> {
        let Some(token) = &self.token else {
            tracing::warn!(message, "pushbullet token not configured; alert not sent");
            return Ok(());
        };
        if message.is_empty() {
            return Ok(());
        }

        self.http
            .post(&self.endpoint)
            .basic_auth(token, None::<&str>)
            .json(&PushNote::new(message))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| BrokerError::Alert(e.to_string()))?;
        Ok(())
    }

    /// Best-effort critical alert: bounded by the configured timeout,
    /// failures are logged and otherwise ignored.
    pub async fn critical(&self, message: &str) {
        let body = format!("CRITICAL: {message}");
        tracing::error!(alert = %body, "sending critical alert");
        match tokio::time::timeout(self.timeout, self.send(&body)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::error!(error = %err, "critical alert failed"),
            Err(_) => tracing::error!(
                timeout_secs = self.timeout.as_secs(),
                "critical alert timed out"
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn note_serializes_to_pushbullet_shape() {
        let json = serde_json::to_value(PushNote::new("backbone down")).unwrap_or_default();
        assert_eq!(
            json,
            serde_json::json!({
                "type": "note",
                "title": "notify-broker alert",
                "body": "backbone down",
            })
        );
    }

    #[test]
    fn empty_token_disables_alerts() {
        assert!(!Alerter::new(Some(String::new()), Duration::from_secs(1)).is_enabled());
        assert!(!Alerter::new(None, Duration::from_secs(1)).is_enabled());
        assert!(Alerter::new(Some("o.abc".to_string()), Duration::from_secs(1)).is_enabled());
    }

    #[tokio::test]
    async fn disabled_alerter_succeeds_without_network() {
        let alerter = Alerter::new(None, Duration::from_secs(1));
        assert!(alerter.send("heartbeat missed").await.is_ok());
        alerter.critical("heartbeat missed").await;
    }
}
