//! The broker event loop.
//!
//! One task owns the [`Broker`] and the [`HeartbeatMonitor`] for the whole
//! process lifetime. Transport tasks, the backbone listener and token
//! lookups reach it only through [`BrokerHandle`], so every mutation of
//! broker state is serialized by this loop and no locks are needed.
//!
//! The loop ends only on a fatal condition, reported to the caller as a
//! [`ShutdownReason`].

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior};

use super::broker::{Broker, BrokerStats, LookupRequest, MessageOutcome};
use crate::domain::{AuthOutcome, ConnectionId, ConnectionSink, HeartbeatMonitor, HeartbeatVerdict};
use crate::error::BrokerError;
use crate::external::TokenStore;

/// Events processed by the broker loop.
#[derive(Debug)]
pub enum BrokerEvent {
    /// Transport accepted a connection.
    Opened {
        /// New connection id.
        conn_id: ConnectionId,
        /// Peer address.
        remote_address: String,
        /// Outbound queue of the connection's writer.
        sink: ConnectionSink,
    },
    /// Text frame from a client.
    Message {
        /// Sender.
        conn_id: ConnectionId,
        /// Frame contents.
        text: String,
    },
    /// Transport closed a connection.
    Closed {
        /// Closed connection.
        conn_id: ConnectionId,
    },
    /// Message from the backbone subscription.
    Backbone {
        /// Channel it arrived on.
        channel: String,
        /// Raw payload.
        payload: String,
    },
    /// A token lookup finished.
    LookupCompleted {
        /// Connection that presented the token.
        conn_id: ConnectionId,
        /// Stored value, if any.
        result: Result<Option<String>, BrokerError>,
    },
    /// Request for diagnostics counters.
    Stats(oneshot::Sender<BrokerStats>),
}

/// Why the event loop stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownReason {
    /// No backbone heartbeat within the deadline; the process must restart.
    HeartbeatTimeout {
        /// Observed silence.
        silent_for: Duration,
    },
    /// Every handle was dropped.
    EventsClosed,
}

/// Cloneable entry point into the broker loop.
#[derive(Debug, Clone)]
pub struct BrokerHandle {
    tx: mpsc::Sender<BrokerEvent>,
}

impl BrokerHandle {
    /// Creates a handle and the receiving end for [`EventLoop::new`].
    #[must_use]
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<BrokerEvent>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    async fn send(&self, event: BrokerEvent) -> Result<(), BrokerError> {
        self.tx
            .send(event)
            .await
            .map_err(|_| BrokerError::BrokerUnavailable)
    }

    /// Reports a newly opened connection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::BrokerUnavailable`] if the loop has stopped.
    pub async fn open(
        &self,
        conn_id: ConnectionId,
        remote_address: String,
        sink: ConnectionSink,
    ) -> Result<(), BrokerError> {
        self.send(BrokerEvent::Opened {
            conn_id,
            remote_address,
            sink,
        })
        .await
    }

    /// Forwards a client text frame.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::BrokerUnavailable`] if the loop has stopped.
    pub async fn message(&self, conn_id: ConnectionId, text: String) -> Result<(), BrokerError> {
        self.send(BrokerEvent::Message { conn_id, text }).await
    }

    /// Reports a closed connection.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::BrokerUnavailable`] if the loop has stopped.
    pub async fn close(&self, conn_id: ConnectionId) -> Result<(), BrokerError> {
        self.send(BrokerEvent::Closed { conn_id }).await
    }

    /// Forwards a backbone message.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::BrokerUnavailable`] if the loop has stopped.
    pub async fn backbone(&self, channel: String, payload: String) -> Result<(), BrokerError> {
        self.send(BrokerEvent::Backbone { channel, payload }).await
    }

    /// Fetches diagnostics counters.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::BrokerUnavailable`] if the loop has stopped.
    pub async fn stats(&self) -> Result<BrokerStats, BrokerError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.send(BrokerEvent::Stats(reply_tx)).await?;
        reply_rx.await.map_err(|_| BrokerError::BrokerUnavailable)
    }
}

/// Owner of all broker state.
#[derive(Debug)]
pub struct EventLoop {
    broker: Broker,
    monitor: HeartbeatMonitor,
    check_period: Duration,
    token_store: Arc<dyn TokenStore>,
    rx: mpsc::Receiver<BrokerEvent>,
    lookup_tx: mpsc::WeakSender<BrokerEvent>,
}

impl EventLoop {
    /// Builds the loop around `broker`. `handle` must come from the same
    /// [`BrokerHandle::channel`] call as `rx`.
    #[must_use]
    pub fn new(
        broker: Broker,
        monitor: HeartbeatMonitor,
        check_period: Duration,
        token_store: Arc<dyn TokenStore>,
        handle: &BrokerHandle,
        rx: mpsc::Receiver<BrokerEvent>,
    ) -> Self {
        Self {
            broker,
            monitor,
            check_period,
            token_store,
            rx,
            lookup_tx: handle.tx.downgrade(),
        }
    }

    /// Runs until a fatal condition occurs.
    pub async fn run(mut self) -> ShutdownReason {
        let period = self.check_period.max(Duration::from_millis(1));
        let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            deadline_secs = self.monitor.deadline().as_secs(),
            check_period_secs = period.as_secs(),
            "broker event loop started"
        );

        loop {
            tokio::select! {
                event = self.rx.recv() => match event {
                    Some(event) => self.handle_event(event),
                    None => return ShutdownReason::EventsClosed,
                },
                _ = ticker.tick() => {
                    if let Some(reason) = self.on_tick(Instant::now()) {
                        return reason;
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: BrokerEvent) {
        match event {
            BrokerEvent::Opened {
                conn_id,
                remote_address,
                sink,
            } => self.broker.on_open(conn_id, remote_address, sink),
            BrokerEvent::Message { conn_id, text } => {
                if let MessageOutcome::Lookup(request) = self.broker.on_message(conn_id, &text) {
                    self.spawn_lookup(request);
                }
            }
            BrokerEvent::Closed { conn_id } => {
                self.broker.on_close(conn_id);
            }
            BrokerEvent::Backbone { channel, payload } => {
                self.broker
                    .on_backbone_message(&channel, &payload, Instant::now());
            }
            BrokerEvent::LookupCompleted { conn_id, result } => {
                if let AuthOutcome::Rejected(err) = self.broker.on_lookup_complete(conn_id, result) {
                    tracing::debug!(%conn_id, error = %err, "authentication rejected");
                }
            }
            BrokerEvent::Stats(reply) => {
                let _ = reply.send(self.broker.stats(Instant::now()));
            }
        }
    }

    /// Issues the lookup off-loop; the result re-enters as
    /// [`BrokerEvent::LookupCompleted`].
    fn spawn_lookup(&self, request: LookupRequest) {
        let store = Arc::clone(&self.token_store);
        let lookup_tx = self.lookup_tx.clone();
        tokio::spawn(async move {
            let result = store.lookup(&request.token).await;
            let Some(tx) = lookup_tx.upgrade() else {
                return;
            };
            let _ = tx
                .send(BrokerEvent::LookupCompleted {
                    conn_id: request.conn_id,
                    result,
                })
                .await;
        });
    }

    /// One heartbeat monitor tick.
    fn on_tick(&mut self, now: Instant) -> Option<ShutdownReason> {
        let heartbeat = self.broker.heartbeat();
        tracing::info!(
            uptime_secs = heartbeat.uptime(now).as_secs(),
            connections = self.broker.registry().len(),
            "heartbeat check"
        );

        match self.monitor.check(heartbeat, now) {
            HeartbeatVerdict::Healthy { .. } => None,
            HeartbeatVerdict::OverdueSuppressed { silent_for } => {
                tracing::warn!(
                    silent_secs = silent_for.as_secs(),
                    "backbone heartbeat overdue; restart disabled in development mode"
                );
                None
            }
            HeartbeatVerdict::Restart { silent_for } => {
                tracing::error!(
                    silent_secs = silent_for.as_secs(),
                    "backbone heartbeat missed; restarting"
                );
                let notified = self.broker.broadcast_restart_notice();
                tracing::info!(notified, "graceful restart notice sent");
                Some(ShutdownReason::HeartbeatTimeout { silent_for })
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use crate::domain::OutboundFrame;
    use crate::external::MemoryTokenStore;
    use crate::service::broker::GRACEFUL_RESTART_NOTICE;

    const CHANNEL: &str = "backbone";
    const INTERVAL: Duration = Duration::from_secs(120);
    const GRACE: Duration = Duration::from_secs(5);
    const CHECK: Duration = Duration::from_secs(15);

    fn spawn_loop(
        store: MemoryTokenStore,
        development_mode: bool,
    ) -> (BrokerHandle, tokio::task::JoinHandle<ShutdownReason>) {
        let (handle, rx) = BrokerHandle::channel(64);
        let event_loop = EventLoop::new(
            Broker::new(CHANNEL, Instant::now()),
            HeartbeatMonitor::new(INTERVAL, GRACE, development_mode),
            CHECK,
            Arc::new(store),
            &handle,
            rx,
        );
        (handle, tokio::spawn(event_loop.run()))
    }

    async fn next_frame(rx: &mut mpsc::Receiver<OutboundFrame>) -> OutboundFrame {
        let Ok(Some(frame)) = tokio::time::timeout(Duration::from_secs(5), rx.recv()).await else {
            panic!("expected an outbound frame");
        };
        frame
    }

    async fn wait_authenticated(handle: &BrokerHandle, expected: usize) {
        for _ in 0..100 {
            let Ok(stats) = handle.stats().await else {
                panic!("broker loop stopped");
            };
            if stats.authenticated == expected {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("connection never authenticated");
    }

    #[tokio::test]
    async fn authenticates_and_relays_through_the_loop() {
        let store = MemoryTokenStore::new();
        store.insert(
            "tok1",
            r#"{"client":"10.0.0.5","user_id":"u1","teams":["alpha"]}"#,
        );
        let (handle, _join) = spawn_loop(store, false);

        let (sink, mut rx) = mpsc::channel(8);
        let conn_id = ConnectionId::new();
        assert!(handle.open(conn_id, "10.0.0.5".to_string(), sink).await.is_ok());
        assert!(
            handle
                .message(conn_id, r#"{"websocket_token":"tok1"}"#.to_string())
                .await
                .is_ok()
        );
        wait_authenticated(&handle, 1).await;

        let payload = r#"{"type":"notify_team","team":"alpha","msg":"hello"}"#;
        assert!(
            handle
                .backbone(CHANNEL.to_string(), payload.to_string())
                .await
                .is_ok()
        );
        assert_eq!(next_frame(&mut rx).await, OutboundFrame::Text(Arc::from("hello")));
    }

    #[tokio::test]
    async fn unknown_token_closes_connection() {
        let (handle, _join) = spawn_loop(MemoryTokenStore::new(), false);
        let (sink, mut rx) = mpsc::channel(8);
        let conn_id = ConnectionId::new();
        let _ = handle.open(conn_id, "10.0.0.5".to_string(), sink).await;
        let _ = handle
            .message(conn_id, r#"{"websocket_token":"missing"}"#.to_string())
            .await;

        assert_eq!(next_frame(&mut rx).await, OutboundFrame::Close);
    }

    #[tokio::test(start_paused = true)]
    async fn missed_heartbeats_stop_the_loop() {
        let (handle, join) = spawn_loop(MemoryTokenStore::new(), false);
        let (sink, mut rx) = mpsc::channel(8);
        let _ = handle.open(ConnectionId::new(), "10.0.0.5".to_string(), sink).await;

        let Ok(reason) = join.await else {
            panic!("event loop panicked");
        };
        let ShutdownReason::HeartbeatTimeout { silent_for } = reason else {
            panic!("expected heartbeat timeout");
        };
        assert!(silent_for > Duration::from_secs(245));
        assert!(silent_for <= Duration::from_secs(260));
        assert_eq!(
            next_frame(&mut rx).await,
            OutboundFrame::Text(Arc::from(GRACEFUL_RESTART_NOTICE))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn heartbeats_keep_the_loop_alive() {
        let (handle, join) = spawn_loop(MemoryTokenStore::new(), false);
        for _ in 0..5 {
            tokio::time::sleep(INTERVAL).await;
            let _ = handle
                .backbone(CHANNEL.to_string(), r#"{"type":"redis_heartbeat"}"#.to_string())
                .await;
        }
        assert!(!join.is_finished());
        assert!(handle.stats().await.is_ok());
    }

    #[tokio::test(start_paused = true)]
    async fn development_mode_never_restarts() {
        let (handle, join) = spawn_loop(MemoryTokenStore::new(), true);
        tokio::time::sleep(Duration::from_secs(1000)).await;
        assert!(!join.is_finished());
        let Ok(stats) = handle.stats().await else {
            panic!("broker loop stopped");
        };
        assert!(stats.secs_since_heartbeat >= 1000);
    }

    #[tokio::test]
    async fn dropping_every_handle_ends_the_loop() {
        let (handle, join) = spawn_loop(MemoryTokenStore::new(), false);
        drop(handle);
        let Ok(reason) = join.await else {
            panic!("event loop panicked");
        };
        assert_eq!(reason, ShutdownReason::EventsClosed);
    }
}
