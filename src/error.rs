//! Broker error types.
//!
//! [`BrokerError`] is the central error type. Apart from the fatal
//! heartbeat timeout (which is a [`crate::service::ShutdownReason`], not an
//! error) every variant is recovered locally: one connection is closed or
//! one message is dropped. The HTTP surface maps variants to status codes
//! and a structured JSON body.
//!
//! [`AuthError`] is the explicit result of a failed token validation.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

use crate::domain::ConnectionId;

/// Structured JSON error response body.
///
/// ```json
/// { "error": { "code": 3001, "message": "broker event loop is not running" } }
/// ```
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Structured error payload.
    pub error: ErrorBody,
}

/// Inner error body with numeric code and human-readable message.
#[derive(Debug, Serialize)]
pub struct ErrorBody {
    /// Numeric error code.
    pub code: u32,
    /// Human-readable error message.
    pub message: String,
}

/// Why a token was not accepted. Always closes the connection; never
/// alerts.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    /// The token store has no value for the token.
    #[error("auth token not found")]
    TokenNotFound,

    /// The token was issued to a different network address.
    #[error("illegal client {actual} != {expected}")]
    AddressMismatch {
        /// Address stored with the token.
        expected: String,
        /// Address of the connecting peer.
        actual: String,
    },

    /// The stored value is not a valid token payload.
    #[error("malformed token payload: {0}")]
    MalformedPayload(String),

    /// The token store could not be reached.
    #[error("token lookup failed: {0}")]
    LookupFailed(String),
}

/// Broker error enum.
///
/// # Error Code Ranges
///
/// | Range     | Category            |
/// |-----------|---------------------|
/// | 1000–1999 | Inbound data        |
/// | 2000–2999 | Delivery            |
/// | 3000–3999 | Infrastructure      |
#[derive(Debug, thiserror::Error)]
pub enum BrokerError {
    /// A client sent something other than an auth request.
    #[error("protocol violation: {0}")]
    ProtocolViolation(String),

    /// A backbone payload could not be classified.
    #[error("malformed backbone message: {0}")]
    MalformedBackboneMessage(String),

    /// A backbone message arrived on an unexpected channel.
    #[error("illegal backbone channel: {0}")]
    IllegalBackboneChannel(String),

    /// Sending to a single recipient failed.
    #[error("send to connection {conn_id} failed: {reason}")]
    RecipientSendFailure {
        /// Recipient connection.
        conn_id: ConnectionId,
        /// Failure cause.
        reason: &'static str,
    },

    /// The broker event loop has stopped.
    #[error("broker event loop is not running")]
    BrokerUnavailable,

    /// Token store failure.
    #[error("token store error: {0}")]
    TokenStore(String),

    /// Backbone subscription failure.
    #[error("backbone error: {0}")]
    Backbone(String),

    /// Paging alert could not be delivered.
    #[error("alert delivery failed: {0}")]
    Alert(String),

    /// Invalid configuration.
    #[error("invalid configuration: {0}")]
    Config(String),

    /// I/O failure (listener bind, TLS material).
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected internal failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl BrokerError {
    /// Returns the numeric error code for this variant.
    #[must_use]
    pub const fn error_code(&self) -> u32 {
        match self {
            Self::ProtocolViolation(_) => 1001,
            Self::MalformedBackboneMessage(_) => 1002,
            Self::IllegalBackboneChannel(_) => 1003,
            Self::RecipientSendFailure { .. } => 2001,
            Self::BrokerUnavailable => 3001,
            Self::TokenStore(_) => 3002,
            Self::Backbone(_) => 3003,
            Self::Alert(_) => 3004,
            Self::Config(_) => 3005,
            Self::Io(_) | Self::Internal(_) => 3000,
        }
    }

    /// Returns the HTTP status code for this variant.
    #[must_use]
    pub const fn status_code(&self) -> StatusCode {
        match self {
            Self::ProtocolViolation(_)
            | Self::MalformedBackboneMessage(_)
            | Self::IllegalBackboneChannel(_) => StatusCode::BAD_REQUEST,
            Self::BrokerUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            Self::RecipientSendFailure { .. }
            | Self::TokenStore(_)
            | Self::Backbone(_)
            | Self::Alert(_)
            | Self::Config(_)
            | Self::Io(_)
            | Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<redis::RedisError> for BrokerError {
    fn from(err: redis::RedisError) -> Self {
        Self::TokenStore(err.to_string())
    }
}

impl IntoResponse for BrokerError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = ErrorResponse {
            error: ErrorBody {
                code: self.error_code(),
                message: self.to_string(),
            },
        };
        let mut response = axum::Json(body).into_response();
        *response.status_mut() = status;
        response
    }
}
