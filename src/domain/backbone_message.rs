//! Messages arriving on the pub/sub backbone.
//!
//! Every payload published on the backbone channel is a JSON object with a
//! `type` discriminator. [`BackboneMessage::parse`] classifies it; the
//! notification body (`msg`) is kept as raw text and never re-serialized.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::value::RawValue;

use crate::error::BrokerError;

/// `type` value of the periodic liveness message.
pub const HEARTBEAT_TYPE: &str = "redis_heartbeat";
/// `type` value of a per-user notification.
pub const NOTIFY_USER_TYPE: &str = "notify_user";
/// `type` value of a per-team notification.
pub const NOTIFY_TEAM_TYPE: &str = "notify_team";

/// Classified backbone message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackboneMessage {
    /// Liveness proof from the external heartbeat producer.
    HeartbeatTick,
    /// Deliver `raw_payload` to every connection of `user_id`.
    NotifyUser {
        /// Target user.
        user_id: String,
        /// Body forwarded verbatim to recipients.
        raw_payload: Arc<str>,
    },
    /// Deliver `raw_payload` to every connection subscribed to `team_id`.
    NotifyTeam {
        /// Target team.
        team_id: String,
        /// Body forwarded verbatim to recipients.
        raw_payload: Arc<str>,
    },
    /// Missing or unrecognized `type`; logged and dropped.
    Unknown {
        /// The `type` field as received, if present.
        raw_type: Option<String>,
    },
}

#[derive(Debug, Deserialize)]
struct Envelope<'a> {
    #[serde(rename = "type", default)]
    kind: Option<String>,
    #[serde(default)]
    user_id: Option<String>,
    #[serde(default)]
    team: Option<String>,
    #[serde(borrow, default)]
    msg: Option<&'a RawValue>,
}

impl BackboneMessage {
    /// Classifies a raw backbone payload.
    ///
    /// # Errors
    ///
    /// Returns [`BrokerError::MalformedBackboneMessage`] if the payload is
    /// not a JSON object, or a notification lacks its target or `msg`.
    pub fn parse(payload: &str) -> Result<Self, BrokerError> {
        let envelope: Envelope<'_> = serde_json::from_str(payload)
            .map_err(|e| BrokerError::MalformedBackboneMessage(e.to_string()))?;

        match envelope.kind.as_deref() {
            Some(HEARTBEAT_TYPE) => Ok(Self::HeartbeatTick),
            Some(NOTIFY_USER_TYPE) => Ok(Self::NotifyUser {
                user_id: require(envelope.user_id, "user_id")?,
                raw_payload: raw_payload(envelope.msg)?,
            }),
            Some(NOTIFY_TEAM_TYPE) => Ok(Self::NotifyTeam {
                team_id: require(envelope.team, "team")?,
                raw_payload: raw_payload(envelope.msg)?,
            }),
            _ => Ok(Self::Unknown {
                raw_type: envelope.kind,
            }),
        }
    }

    /// Returns the message type as a static string slice.
    #[must_use]
    pub const fn type_str(&self) -> &'static str {
        match self {
            Self::HeartbeatTick => HEARTBEAT_TYPE,
            Self::NotifyUser { .. } => NOTIFY_USER_TYPE,
            Self::NotifyTeam { .. } => NOTIFY_TEAM_TYPE,
            Self::Unknown { .. } => "unknown",
        }
    }
}

fn require(field: Option<String>, name: &str) -> Result<String, BrokerError> {
    field.ok_or_else(|| BrokerError::MalformedBackboneMessage(format!("missing field `{name}`")))
}

/// A JSON string `msg` is forwarded as its string contents; any other JSON
/// value is forwarded as the exact text it was published with.
fn raw_payload(msg: Option<&RawValue>) -> Result<Arc<str>, BrokerError> {
    let Some(raw) = msg else {
        return Err(BrokerError::MalformedBackboneMessage(
            "missing field `msg`".to_string(),
        ));
    };
    let text = raw.get();
    if text.starts_with('"') {
        let decoded: String = serde_json::from_str(text)
            .map_err(|e| BrokerError::MalformedBackboneMessage(e.to_string()))?;
        Ok(Arc::from(decoded))
    } else {
        Ok(Arc::from(text))
    }
}
