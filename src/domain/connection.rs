//! Per-connection broker state.
//!
//! A [`Connection`] is a fixed-shape record: identity, peer address, an
//! explicit [`AuthState`] and the identity fields that authentication fills
//! in exactly once. Outbound traffic goes through a bounded queue drained by
//! the connection's transport writer task.

use std::collections::BTreeSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;

use super::ConnectionId;
use crate::error::BrokerError;

/// A frame queued for the transport writer of one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutboundFrame {
    /// Text frame, sent verbatim.
    Text(Arc<str>),
    /// Ask the transport to close the WebSocket.
    Close,
}

/// Sending half of a connection's outbound queue.
pub type ConnectionSink = mpsc::Sender<OutboundFrame>;

/// Authentication state of a connection.
///
/// Monotonic: only `Unauthenticated → Authenticated`, never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// No token has been accepted yet.
    Unauthenticated,
    /// A token was accepted; identity fields are set.
    Authenticated,
}

/// One live transport session as seen by the broker.
#[derive(Debug)]
pub struct Connection {
    id: ConnectionId,
    remote_address: String,
    auth_state: AuthState,
    user_id: Option<String>,
    team_ids: BTreeSet<String>,
    lookup_pending: bool,
    connected_at: DateTime<Utc>,
    sink: ConnectionSink,
}

impl Connection {
    /// Creates an unauthenticated connection.
    #[must_use]
    pub fn new(id: ConnectionId, remote_address: impl Into<String>, sink: ConnectionSink) -> Self {
        Self {
            id,
            remote_address: remote_address.into(),
            auth_state: AuthState::Unauthenticated,
            user_id: None,
            team_ids: BTreeSet::new(),
            lookup_pending: false,
            connected_at: Utc::now(),
            sink,
        }
    }

    /// Connection identifier.
    #[must_use]
    pub const fn id(&self) -> ConnectionId {
        self.id
    }

    /// Peer address captured at open time.
    #[must_use]
    pub fn remote_address(&self) -> &str {
        &self.remote_address
    }

    /// Current authentication state.
    #[must_use]
    pub const fn auth_state(&self) -> AuthState {
        self.auth_state
    }

    /// Returns `true` once a token has been accepted.
    #[must_use]
    pub fn is_authenticated(&self) -> bool {
        self.auth_state == AuthState::Authenticated
    }

    /// Authenticated user id, if any.
    #[must_use]
    pub fn user_id(&self) -> Option<&str> {
        self.user_id.as_deref()
    }

    /// Teams the authenticated user belongs to.
    #[must_use]
    pub const fn team_ids(&self) -> &BTreeSet<String> {
        &self.team_ids
    }

    /// Whether a token lookup is outstanding for this connection.
    #[must_use]
    pub const fn lookup_pending(&self) -> bool {
        self.lookup_pending
    }

    /// Marks a token lookup as issued or resolved.
    pub fn set_lookup_pending(&mut self, pending: bool) {
        self.lookup_pending = pending;
    }

    /// Wall-clock time the connection was registered.
    #[must_use]
    pub const fn connected_at(&self) -> DateTime<Utc> {
        self.connected_at
    }

    /// Promotes the connection to [`AuthState::Authenticated`].
    ///
    /// Identity is set exactly once: returns `false` and leaves the record
    /// untouched if the connection is already authenticated.
    pub fn authenticate(
        &mut self,
        user_id: impl Into<String>,
        teams: impl IntoIterator<Item = String>,
    ) -> bool {
        if self.is_authenticated() {
            return false;
        }
        self.user_id = Some(user_id.into());
        self.team_ids = teams.into_iter().collect();
        self.auth_state = AuthState::Authenticated;
        self.lookup_pending = false;
        true
    }

    /// Queues a text frame without waiting.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::RecipientSendFailure`] if the writer has gone
    /// away or its queue is full.
    pub fn send_text(&self, text: &Arc<str>) -> Result<(), BrokerError> {
        self.sink
            .try_send(OutboundFrame::Text(Arc::clone(text)))
            .map_err(|e| BrokerError::RecipientSendFailure {
                conn_id: self.id,
                reason: match e {
                    TrySendError::Full(_) => "outbound queue full",
                    TrySendError::Closed(_) => "connection writer closed",
                },
            })
    }

    /// Asks the transport to close the socket. Best-effort.
    pub fn request_close(&self) {
        if self.sink.try_send(OutboundFrame::Close).is_err() {
            tracing::debug!(conn_id = %self.id, "close request dropped; writer already gone");
        }
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;

    fn make_conn(capacity: usize) -> (Connection, mpsc::Receiver<OutboundFrame>) {
        let (tx, rx) = mpsc::channel(capacity);
        (Connection::new(ConnectionId::new(), "10.0.0.5", tx), rx)
    }

    #[test]
    fn starts_unauthenticated() {
        let (conn, _rx) = make_conn(4);
        assert_eq!(conn.auth_state(), AuthState::Unauthenticated);
        assert!(conn.user_id().is_none());
        assert!(conn.team_ids().is_empty());
        assert_eq!(conn.remote_address(), "10.0.0.5");
    }

    #[test]
    fn connected_at_is_stamped_on_creation() {
        let before = Utc::now();
        let (conn, _rx) = make_conn(4);
        assert!(conn.connected_at() >= before);
        assert!(conn.connected_at() <= Utc::now());
    }

    #[test]
    fn authenticate_sets_identity_once() {
        let (mut conn, _rx) = make_conn(4);
        assert!(conn.authenticate("u1", vec!["alpha".to_string(), "beta".to_string()]));
        assert!(conn.is_authenticated());
        assert_eq!(conn.user_id(), Some("u1"));

        assert!(!conn.authenticate("u2", vec!["gamma".to_string()]));
        assert_eq!(conn.user_id(), Some("u1"));
        assert!(conn.team_ids().contains("alpha"));
        assert!(!conn.team_ids().contains("gamma"));
    }

    #[test]
    fn duplicate_teams_collapse() {
        let (mut conn, _rx) = make_conn(4);
        conn.authenticate("u1", vec!["alpha".to_string(), "alpha".to_string()]);
        assert_eq!(conn.team_ids().len(), 1);
    }

    #[test]
    fn send_text_queues_frame() {
        let (conn, mut rx) = make_conn(4);
        let text: Arc<str> = Arc::from("hello");
        assert!(conn.send_text(&text).is_ok());
        assert_eq!(rx.try_recv().ok(), Some(OutboundFrame::Text(text)));
    }

    #[test]
    fn send_text_fails_when_queue_full() {
        let (conn, _rx) = make_conn(1);
        let text: Arc<str> = Arc::from("x");
        assert!(conn.send_text(&text).is_ok());
        let Err(err) = conn.send_text(&text) else {
            panic!("expected full queue");
        };
        assert!(matches!(err, BrokerError::RecipientSendFailure { .. }));
    }

    #[test]
    fn send_text_fails_when_writer_gone() {
        let (conn, rx) = make_conn(4);
        drop(rx);
        assert!(conn.send_text(&Arc::from("x")).is_err());
    }

    #[test]
    fn request_close_queues_close_frame() {
        let (conn, mut rx) = make_conn(4);
        conn.request_close();
        assert_eq!(rx.try_recv().ok(), Some(OutboundFrame::Close));
    }
}
