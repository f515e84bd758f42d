//! Backbone subscription.
//!
//! The REST layer and the heartbeat producer publish JSON messages on a
//! single Redis pub/sub channel. This module subscribes to it and forwards
//! every `(channel, payload)` pair to the broker loop, one at a time, in
//! arrival order.

use futures_util::{Stream, StreamExt};

use crate::error::BrokerError;
use crate::service::BrokerHandle;

/// Subscribes to `channel` and returns the message stream.
///
/// # Errors
///
/// Returns [`BrokerError::Backbone`] if the connection or the `SUBSCRIBE`
/// fails.
pub async fn subscribe(
    client: &redis::Client,
    channel: &str,
) -> Result<impl Stream<Item = (String, String)> + Unpin + use<>, BrokerError> {
    let mut pubsub = client
        .get_async_pubsub()
        .await
        .map_err(|e| BrokerError::Backbone(e.to_string()))?;
    pubsub
        .subscribe(channel)
        .await
        .map_err(|e| BrokerError::Backbone(e.to_string()))?;
    tracing::info!(channel, "subscribed to backbone");

    let messages = pubsub.into_on_message().filter_map(|msg| async move {
        match msg.get_payload::<String>() {
            Ok(payload) => Some((msg.get_channel_name().to_string(), payload)),
            Err(err) => {
                tracing::warn!(error = %err, "non-text backbone payload dropped");
                None
            }
        }
    });
    Ok(Box::pin(messages))
}

/// Forwards backbone messages to the broker until the stream ends.
///
/// A subscription that ends is not retried here: the heartbeat monitor
/// notices the silence and restarts the process.
///
/// # Errors
///
/// Returns [`BrokerError::Backbone`] when the stream ends and
/// [`BrokerError::BrokerUnavailable`] if the broker loop has stopped.
pub async fn forward<S>(mut messages: S, broker: &BrokerHandle) -> Result<(), BrokerError>
where
    S: Stream<Item = (String, String)> + Unpin,
{
    while let Some((channel, payload)) = messages.next().await {
        tracing::debug!(%channel, %payload, "message received on backbone");
        broker.backbone(channel, payload).await?;
    }
    Err(BrokerError::Backbone("subscription stream ended".to_string()))
}
