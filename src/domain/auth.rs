//! Authentication wire types and outcomes.
//!
//! A client authenticates once per connection by sending
//! `{"websocket_token": "..."}`. The token is looked up in the external
//! token store, which returns a [`TokenPayload`] binding it to the client's
//! network address and identity.

use serde::Deserialize;

use crate::error::AuthError;

/// The only message a client may send.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthRequest {
    /// Short-lived token minted out-of-band.
    pub websocket_token: String,
}

impl AuthRequest {
    /// Parses a raw client text frame. `None` means protocol violation.
    #[must_use]
    pub fn parse(raw: &str) -> Option<Self> {
        serde_json::from_str(raw).ok()
    }
}

/// Value stored under a token in the token store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TokenPayload {
    /// Address the token was issued to.
    pub client: String,
    /// Identity of the token holder.
    pub user_id: String,
    /// Teams the holder belongs to. Required; may be empty.
    pub teams: Vec<String>,
}

impl TokenPayload {
    /// Validates a lookup result against the connection's peer address.
    ///
    /// # Errors
    ///
    /// - [`AuthError::TokenNotFound`] if the lookup returned nothing.
    /// - [`AuthError::MalformedPayload`] if the value is not a token payload.
    /// - [`AuthError::AddressMismatch`] if the token was issued to another
    ///   address.
    pub fn verify(raw: Option<&str>, remote_address: &str) -> Result<Self, AuthError> {
        let raw = raw.filter(|s| !s.trim().is_empty()).ok_or(AuthError::TokenNotFound)?;
        let payload: Self =
            serde_json::from_str(raw).map_err(|e| AuthError::MalformedPayload(e.to_string()))?;
        if payload.client != remote_address {
            return Err(AuthError::AddressMismatch {
                expected: payload.client,
                actual: remote_address.to_string(),
            });
        }
        Ok(payload)
    }
}

/// What happened to a completed token lookup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthOutcome {
    /// Connection promoted and attached to the subscription index.
    Authenticated,
    /// Connection was already authenticated; result ignored.
    AlreadyAuthenticated,
    /// Connection closed while the lookup was outstanding; result discarded.
    ConnectionGone,
    /// Authentication failed; the connection was closed.
    Rejected(AuthError),
}
