//! Token lookup backends.
//!
//! Tokens are minted by the REST layer and stored in Redis with a short
//! TTL. The broker only ever reads them: one `GET` per authentication
//! attempt, no retries.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use redis::AsyncCommands;
use redis::aio::ConnectionManager;

use crate::error::BrokerError;

/// Asynchronous `token → payload` lookup.
#[async_trait]
pub trait TokenStore: Send + Sync + fmt::Debug {
    /// Returns the value stored under `token`, or `None` if absent.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TokenStore`] if the store cannot be reached.
    async fn lookup(&self, token: &str) -> Result<Option<String>, BrokerError>;
}

/// Redis-backed token store. Reconnects transparently.
#[derive(Clone)]
pub struct RedisTokenStore {
    conn: ConnectionManager,
}

impl RedisTokenStore {
    /// Connects to Redis.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::TokenStore`] if the initial connection fails.
    pub async fn connect(client: &redis::Client) -> Result<Self, BrokerError> {
        let conn = ConnectionManager::new(client.clone()).await?;
        Ok(Self { conn })
    }
}

impl fmt::Debug for RedisTokenStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RedisTokenStore").finish_non_exhaustive()
    }
}

#[async_trait]
impl TokenStore for RedisTokenStore {
    async fn lookup(&self, token: &str) -> Result<Option<String>, BrokerError> {
        let mut conn = self.conn.clone();
        let value: Option<String> = conn.get(token).await?;
        Ok(value)
    }
}

/// In-process token store, for tests and local runs without Redis.
#[derive(Debug, Clone, Default)]
pub struct MemoryTokenStore {
    tokens: Arc<RwLock<HashMap<String, String>>>,
}

impl MemoryTokenStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores `payload` under `token`.
    pub fn insert(&self, token: impl Into<String>, payload: impl Into<String>) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(token.into(), payload.into());
    }

    /// Removes a token.
    pub fn remove(&self, token: &str) {
        self.tokens
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(token);
    }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
    async fn lookup(&self, token: &str) -> Result<Option<String>, BrokerError> {
        Ok(self
            .tokens
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(token)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn memory_store_lookup() {
        let store = MemoryTokenStore::new();
        store.insert("tok1", "payload");

        assert_eq!(store.lookup("tok1").await.ok(), Some(Some("payload".to_string())));
        assert_eq!(store.lookup("tok2").await.ok(), Some(None));

        store.remove("tok1");
        assert_eq!(store.lookup("tok1").await.ok(), Some(None));
    }

    #[tokio::test]
    async fn clones_share_tokens() {
        let store = MemoryTokenStore::new();
        let shared = store.clone();
        store.insert("tok1", "payload");
        assert_eq!(shared.lookup("tok1").await.ok(), Some(Some("payload".to_string())));
    }
}
