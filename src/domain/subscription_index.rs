//! User and team subscription index.
//!
//! Maps a user id and a team id to the set of connections currently
//! eligible to receive notifications for it. Buckets hold
//! [`ConnectionId`]s, never the connections themselves; fan-out resolves
//! each id against the [`super::ConnectionRegistry`] at send time.

use std::collections::{HashMap, HashSet};

use super::{Connection, ConnectionId};

/// Index of authenticated connections by user and by team.
///
/// A connection is present iff it is authenticated and its close event has
/// not been processed. Empty buckets are pruned on detach.
#[derive(Debug, Default)]
pub struct SubscriptionIndex {
    by_user: HashMap<String, HashSet<ConnectionId>>,
    by_team: HashMap<String, HashSet<ConnectionId>>,
}

impl SubscriptionIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an authenticated connection under its user and every team.
    ///
    /// Idempotent. Unauthenticated connections are ignored.
    pub fn attach(&mut self, conn: &Connection) {
        let Some(user_id) = conn.user_id() else {
            tracing::warn!(conn_id = %conn.id(), "attach skipped for unauthenticated connection");
            return;
        };
        let id = conn.id();
        self.by_user.entry(user_id.to_string()).or_default().insert(id);
        for team in conn.team_ids() {
            self.by_team.entry(team.clone()).or_default().insert(id);
        }
    }

    /// Removes a connection from its user bucket and every team bucket.
    ///
    /// Safe to call for a connection that was never attached.
    pub fn detach(&mut self, conn: &Connection) {
        let id = conn.id();
        if let Some(user_id) = conn.user_id() {
            remove_member(&mut self.by_user, user_id, id);
        }
        for team in conn.team_ids() {
            remove_member(&mut self.by_team, team, id);
        }
    }

    /// Snapshot of the connections subscribed for `user_id`.
    #[must_use]
    pub fn members_of_user(&self, user_id: &str) -> Vec<ConnectionId> {
        snapshot(&self.by_user, user_id)
    }

    /// Snapshot of the connections subscribed for `team_id`.
    #[must_use]
    pub fn members_of_team(&self, team_id: &str) -> Vec<ConnectionId> {
        snapshot(&self.by_team, team_id)
    }

    /// Number of users with at least one subscribed connection.
    #[must_use]
    pub fn user_count(&self) -> usize {
        self.by_user.len()
    }

    /// Number of teams with at least one subscribed connection.
    #[must_use]
    pub fn team_count(&self) -> usize {
        self.by_team.len()
    }

    /// Returns `true` if `id` is present in any bucket.
    #[must_use]
    pub fn contains(&self, id: ConnectionId) -> bool {
        self.by_user.values().any(|set| set.contains(&id))
            || self.by_team.values().any(|set| set.contains(&id))
    }
}

fn remove_member(map: &mut HashMap<String, HashSet<ConnectionId>>, key: &str, id: ConnectionId) {
    if let Some(set) = map.get_mut(key) {
        set.remove(&id);
        if set.is_empty() {
            map.remove(key);
        }
    }
}

fn snapshot(map: &HashMap<String, HashSet<ConnectionId>>, key: &str) -> Vec<ConnectionId> {
    map.get(key)
        .map(|set| set.iter().copied().collect())
        .unwrap_or_default()
}
