use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::RelayError;
use crate::ids::MessageId;

/// One entry of a session's log: a human chat line, an AI response, or both.
///
/// Immutable once appended. `author` is `None` when the entry carries only an
/// AI-generated response.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    pub id: MessageId,
    #[serde(rename = "username")]
    pub author: Option<String>,
    #[serde(rename = "message")]
    pub body: Option<String>,
    pub ai_response: Option<serde_json::Value>,
    pub timestamp: DateTime<Utc>,
}

impl Message {
    /// Build a log entry sent by `sender`.
    ///
    /// Blank bodies and JSON `null` responses count as absent; at least one of
    /// the two must remain.
    pub fn compose(
        sender: &str,
        body: Option<String>,
        ai_response: Option<serde_json::Value>,
    ) -> Result<Self, RelayError> {
        let body = body.filter(|b| !b.trim().is_empty());
        let ai_response = ai_response.filter(|v| !v.is_null());

        if body.is_none() && ai_response.is_none() {
            return Err(RelayError::invalid_input(
                "message must carry a body or an AI response",
            ));
        }

        let author = body.as_ref().map(|_| sender.to_string());

        Ok(Self {
            id: MessageId::new(),
            author,
            body,
            ai_response,
            timestamp: Utc::now(),
        })
    }
}

/// Derived roster notification broadcast on every join and leave.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipEvent {
    /// Who joined or left.
    pub display_name: String,
    /// Every display name still in the session, in join order.
    pub members: Vec<String>,
}

impl MembershipEvent {
    pub fn new(display_name: impl Into<String>, members: Vec<String>) -> Self {
        Self {
            display_name: display_name.into(),
            members,
        }
    }
}
