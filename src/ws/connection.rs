//! Transport side of a single WebSocket connection.
//!
//! Bridges the socket and the broker loop: inbound text frames are
//! forwarded as broker events, and frames the broker queues for this
//! connection are written back to the socket. The broker never touches the
//! socket itself.

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::domain::{ConnectionId, OutboundFrame};
use crate::service::BrokerHandle;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Registers the connection with the broker.
/// - Forwards client text frames; other frame types are ignored.
/// - Writes queued [`OutboundFrame`]s and closes on request.
/// - Reports the close to the broker on every exit path.
pub async fn run_connection(
    socket: WebSocket,
    remote_address: String,
    broker: BrokerHandle,
    buffer: usize,
) {
    let conn_id = ConnectionId::new();
    let (sink, mut outbound) = mpsc::channel(buffer.max(1));
    if broker.open(conn_id, remote_address, sink).await.is_err() {
        tracing::warn!(%conn_id, "broker unavailable; dropping connection");
        return;
    }

    let (mut ws_tx, mut ws_rx) = socket.split();

    loop {
        tokio::select! {
            // Incoming message from client
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        if broker.message(conn_id, text.to_string()).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Err(err)) => {
                        tracing::debug!(%conn_id, error = %err, "ws read error");
                        break;
                    }
                    _ => {}
                }
            }
            // Frame queued by the broker
            frame = outbound.recv() => {
                match frame {
                    Some(OutboundFrame::Text(text)) => {
                        if ws_tx.send(Message::text(text.to_string())).await.is_err() {
                            break;
                        }
                    }
                    Some(OutboundFrame::Close) | None => {
                        let _ = ws_tx.send(Message::Close(None)).await;
                        break;
                    }
                }
            }
        }
    }

    let _ = broker.close(conn_id).await;
    tracing::debug!(%conn_id, "ws connection closed");
}
