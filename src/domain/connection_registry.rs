//! Storage for every live connection.
//!
//! [`ConnectionRegistry`] is a plain `HashMap` keyed by [`ConnectionId`].
//! It is owned by the broker event loop and only touched from that task, so
//! it carries no locks.

use std::collections::HashMap;

use super::{Connection, ConnectionId};

/// Central store for all live connections and their auth state.
#[derive(Debug, Default)]
pub struct ConnectionRegistry {
    connections: HashMap<ConnectionId, Connection>,
}

impl ConnectionRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a freshly opened connection.
    ///
    /// Each open event carries a distinct id; a colliding id replaces the
    /// previous record.
    pub fn insert(&mut self, conn: Connection) {
        let id = conn.id();
        if self.connections.insert(id, conn).is_some() {
            tracing::warn!(conn_id = %id, "connection id registered twice");
        }
    }

    /// Removes a connection, returning its record if it was registered.
    pub fn remove(&mut self, id: ConnectionId) -> Option<Connection> {
        self.connections.remove(&id)
    }

    /// Looks up a live connection.
    #[must_use]
    pub fn get(&self, id: ConnectionId) -> Option<&Connection> {
        self.connections.get(&id)
    }

    /// Looks up a live connection for mutation.
    pub fn get_mut(&mut self, id: ConnectionId) -> Option<&mut Connection> {
        self.connections.get_mut(&id)
    }

    /// Returns `true` if the connection is still open.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.connections.contains_key(&id)
    }

    /// Iterates over every live connection.
    pub fn iter(&self) -> impl Iterator<Item = &Connection> {
        self.connections.values()
    }

    /// Number of live connections.
    #[must_use]
    pub fn len(&self) -> usize {
        self.connections.len()
    }

    /// Returns `true` if no connection is open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.connections.is_empty()
    }

    /// Number of authenticated connections.
    #[must_use]
    pub fn authenticated_count(&self) -> usize {
        self.connections
            .values()
            .filter(|c| c.is_authenticated())
            .count()
    }
}

#[cfg(test)]
#[allow(clippy::panic)]
mod tests {
    use super::*;
    use tokio::sync::mpsc;

    fn make_conn() -> Connection {
        let (tx, _rx) = mpsc::channel(1);
        Connection::new(ConnectionId::new(), "127.0.0.1", tx)
    }

    #[test]
    fn insert_and_get() {
        let mut registry = ConnectionRegistry::new();
        let conn = make_conn();
        let id = conn.id();
        registry.insert(conn);

        assert!(registry.contains(id));
        assert_eq!(registry.get(id).map(Connection::id), Some(id));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn remove_returns_record_once() {
        let mut registry = ConnectionRegistry::new();
        let conn = make_conn();
        let id = conn.id();
        registry.insert(conn);

        assert!(registry.remove(id).is_some());
        assert!(registry.remove(id).is_none());
        assert!(registry.is_empty());
    }

    #[test]
    fn authenticated_count_tracks_state() {
        let mut registry = ConnectionRegistry::new();
        let conn = make_conn();
        let id = conn.id();
        registry.insert(conn);
        registry.insert(make_conn());
        assert_eq!(registry.authenticated_count(), 0);

        let Some(conn) = registry.get_mut(id) else {
            panic!("connection should be registered");
        };
        conn.authenticate("u1", Vec::new());
        assert_eq!(registry.authenticated_count(), 1);
        assert_eq!(registry.iter().count(), 2);
    }
}
