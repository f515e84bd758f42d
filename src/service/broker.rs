//! Broker core: connection lifecycle, token authentication, subscription
//! bookkeeping and backbone fan-out.
//!
//! [`Broker`] is plain synchronous state. It is owned by exactly one task
//! (see [`super::event_loop`]) so no method takes a lock. Anything that must
//! suspend, such as the token lookup, is returned to the caller as a request
//! and its result fed back through [`Broker::on_lookup_complete`], which
//! re-validates the connection before touching state.

use std::sync::Arc;

use serde::Serialize;
use tokio::time::Instant;

use crate::domain::{
    AuthOutcome, AuthRequest, BackboneMessage, Connection, ConnectionId, ConnectionRegistry,
    ConnectionSink, HeartbeatState, SubscriptionIndex, TokenPayload,
};
use crate::error::{AuthError, BrokerError};

/// Notice sent to every client before a supervised restart.
pub const GRACEFUL_RESTART_NOTICE: &str = r#"{"action":"graceful_restart"}"#;

/// A token lookup the caller must perform asynchronously.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LookupRequest {
    /// Connection that presented the token.
    pub conn_id: ConnectionId,
    /// Token to resolve.
    pub token: String,
}

/// Result of handling one client message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MessageOutcome {
    /// A lookup must be issued.
    Lookup(LookupRequest),
    /// The connection is already authenticated; nothing happens.
    AlreadyAuthenticated,
    /// A lookup is already outstanding; the message is ignored.
    LookupPending,
    /// Not an auth request; the connection was closed.
    ProtocolViolation,
    /// The connection is not registered (already closed).
    UnknownConnection,
}

/// Result of handling one backbone message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayOutcome {
    /// Heartbeat timestamp advanced.
    HeartbeatRecorded,
    /// Notification fanned out.
    FannedOut {
        /// Snapshot size of the target bucket.
        recipients: usize,
        /// Sends that were queued successfully.
        delivered: usize,
    },
    /// Message dropped (wrong channel, malformed or unknown type).
    Dropped,
}

/// Point-in-time counters for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct BrokerStats {
    /// Live connections.
    pub connections: usize,
    /// Authenticated connections.
    pub authenticated: usize,
    /// Users with at least one subscribed connection.
    pub users: usize,
    /// Teams with at least one subscribed connection.
    pub teams: usize,
    /// Seconds since startup.
    pub uptime_secs: u64,
    /// Seconds since the last backbone heartbeat (or startup).
    pub secs_since_heartbeat: u64,
    /// Wall-clock startup time.
    pub started_at: chrono::DateTime<chrono::Utc>,
}

/// All mutable broker state.
#[derive(Debug)]
pub struct Broker {
    registry: ConnectionRegistry,
    index: SubscriptionIndex,
    heartbeat: HeartbeatState,
    backbone_channel: String,
}

impl Broker {
    /// Creates an empty broker listening to `backbone_channel`.
    #[must_use]
    pub fn new(backbone_channel: impl Into<String>, now: Instant) -> Self {
        Self {
            registry: ConnectionRegistry::new(),
            index: SubscriptionIndex::new(),
            heartbeat: HeartbeatState::new(now),
            backbone_channel: backbone_channel.into(),
        }
    }

    /// Connection registry (read-only).
    #[must_use]
    pub const fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Subscription index (read-only).
    #[must_use]
    pub const fn index(&self) -> &SubscriptionIndex {
        &self.index
    }

    /// Heartbeat bookkeeping (read-only).
    #[must_use]
    pub const fn heartbeat(&self) -> &HeartbeatState {
        &self.heartbeat
    }

    /// Registers a newly opened connection as unauthenticated.
    pub fn on_open(&mut self, conn_id: ConnectionId, remote_address: String, sink: ConnectionSink) {
        tracing::info!(%conn_id, remote = %remote_address, "new connection");
        self.registry
            .insert(Connection::new(conn_id, remote_address, sink));
    }

    /// Forgets a closed connection and detaches it from the index.
    ///
    /// Returns `false` if the connection was already gone (for example the
    /// broker closed it first).
    pub fn on_close(&mut self, conn_id: ConnectionId) -> bool {
        let Some(conn) = self.registry.remove(conn_id) else {
            return false;
        };
        self.index.detach(&conn);
        tracing::info!(
            %conn_id,
            session_secs = (chrono::Utc::now() - conn.connected_at()).num_seconds(),
            connections = self.registry.len(),
            "connection has disconnected"
        );
        true
    }

    /// Handles a text frame from a client.
    pub fn on_message(&mut self, conn_id: ConnectionId, raw: &str) -> MessageOutcome {
        let Some(conn) = self.registry.get_mut(conn_id) else {
            return MessageOutcome::UnknownConnection;
        };
        if conn.is_authenticated() {
            tracing::debug!(%conn_id, "already authenticated; message ignored");
            return MessageOutcome::AlreadyAuthenticated;
        }
        if conn.lookup_pending() {
            tracing::debug!(%conn_id, "token lookup outstanding; message ignored");
            return MessageOutcome::LookupPending;
        }
        let Some(request) = AuthRequest::parse(raw) else {
            let err = BrokerError::ProtocolViolation("expected websocket_token".to_string());
            tracing::info!(%conn_id, error = %err, "closing connection");
            self.close_connection(conn_id);
            return MessageOutcome::ProtocolViolation;
        };

        conn.set_lookup_pending(true);
        tracing::info!(%conn_id, "attempting client authentication");
        MessageOutcome::Lookup(LookupRequest {
            conn_id,
            token: request.websocket_token,
        })
    }

    /// Applies a completed token lookup.
    ///
    /// The connection may have closed or authenticated while the lookup was
    /// outstanding; in that case nothing is mutated.
    pub fn on_lookup_complete(
        &mut self,
        conn_id: ConnectionId,
        lookup: Result<Option<String>, BrokerError>,
    ) -> AuthOutcome {
        let Some(conn) = self.registry.get_mut(conn_id) else {
            tracing::debug!(%conn_id, "token lookup resolved after close; discarded");
            return AuthOutcome::ConnectionGone;
        };
        if conn.is_authenticated() {
            return AuthOutcome::AlreadyAuthenticated;
        }
        conn.set_lookup_pending(false);

        let verified = lookup
            .map_err(|e| AuthError::LookupFailed(e.to_string()))
            .and_then(|raw| TokenPayload::verify(raw.as_deref(), conn.remote_address()));

        match verified {
            Ok(payload) => {
                conn.authenticate(payload.user_id, payload.teams);
                self.index.attach(conn);
                tracing::info!(
                    %conn_id,
                    user_id = conn.user_id().unwrap_or_default(),
                    teams = conn.team_ids().len(),
                    "successful authentication"
                );
                AuthOutcome::Authenticated
            }
            Err(err) => {
                tracing::info!(%conn_id, error = %err, "auth error; closing connection");
                self.close_connection(conn_id);
                AuthOutcome::Rejected(err)
            }
        }
    }

    /// Handles one message from the backbone subscription.
    pub fn on_backbone_message(&mut self, channel: &str, payload: &str, now: Instant) -> RelayOutcome {
        if channel != self.backbone_channel {
            let err = BrokerError::IllegalBackboneChannel(channel.to_string());
            tracing::warn!(error = %err, "backbone message dropped");
            return RelayOutcome::Dropped;
        }

        let message = match BackboneMessage::parse(payload) {
            Ok(message) => message,
            Err(err) => {
                tracing::warn!(error = %err, "backbone message dropped");
                return RelayOutcome::Dropped;
            }
        };

        let kind = message.type_str();
        match message {
            BackboneMessage::HeartbeatTick => {
                self.heartbeat.record_heartbeat(now);
                tracing::debug!("backbone heartbeat");
                RelayOutcome::HeartbeatRecorded
            }
            BackboneMessage::NotifyUser {
                user_id,
                raw_payload,
            } => {
                let members = self.index.members_of_user(&user_id);
                let outcome = self.fan_out(&members, &raw_payload);
                tracing::info!(kind, user_id = %user_id, ?outcome, "notification relayed");
                outcome
            }
            BackboneMessage::NotifyTeam {
                team_id,
                raw_payload,
            } => {
                let members = self.index.members_of_team(&team_id);
                let outcome = self.fan_out(&members, &raw_payload);
                tracing::info!(kind, team = %team_id, ?outcome, "notification relayed");
                outcome
            }
            BackboneMessage::Unknown { raw_type } => {
                tracing::warn!(
                    kind,
                    raw_type = raw_type.as_deref().unwrap_or("<missing>"),
                    "unknown backbone message type dropped"
                );
                RelayOutcome::Dropped
            }
        }
    }

    /// Sends the restart notice to every open connection. Best-effort.
    pub fn broadcast_restart_notice(&self) -> usize {
        let notice: Arc<str> = Arc::from(GRACEFUL_RESTART_NOTICE);
        self.registry
            .iter()
            .filter(|conn| conn.send_text(&notice).is_ok())
            .count()
    }

    /// Current counters.
    #[must_use]
    pub fn stats(&self, now: Instant) -> BrokerStats {
        BrokerStats {
            connections: self.registry.len(),
            authenticated: self.registry.authenticated_count(),
            users: self.index.user_count(),
            teams: self.index.team_count(),
            uptime_secs: self.heartbeat.uptime(now).as_secs(),
            secs_since_heartbeat: self.heartbeat.time_since_heartbeat(now).as_secs(),
            started_at: self.heartbeat.started_at(),
        }
    }

    /// Delivers `payload` to every member of a snapshot still registered.
    fn fan_out(&self, members: &[ConnectionId], payload: &Arc<str>) -> RelayOutcome {
        let mut delivered = 0;
        for id in members {
            let Some(conn) = self.registry.get(*id) else {
                continue;
            };
            match conn.send_text(payload) {
                Ok(()) => delivered += 1,
                Err(err) => tracing::warn!(conn_id = %id, error = %err, "recipient send failed"),
            }
        }
        RelayOutcome::FannedOut {
            recipients: members.len(),
            delivered,
        }
    }

    /// Closes a connection from the broker side. It stops being a fan-out
    /// target immediately; the transport's later close event is a no-op.
    fn close_connection(&mut self, conn_id: ConnectionId) {
        if let Some(conn) = self.registry.remove(conn_id) {
            self.index.detach(&conn);
            conn.request_close();
            tracing::info!(
                %conn_id,
                connections = self.registry.len(),
                "connection closed by broker"
            );
        }
    }
}
