//! Wire protocol between browser connections and the relay.
//!
//! Every frame is a JSON object tagged by `type`.

use serde::{Deserialize, Deserializer, Serialize};

use crate::errors::RelayError;
use crate::messages::{MembershipEvent, Message};

/// Events a connection sends to the relay.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientEvent {
    #[serde(rename = "join_session")]
    JoinSession {
        #[serde(rename = "sessionId", default, deserialize_with = "null_as_empty")]
        session_id: String,
        #[serde(
            rename = "displayName",
            alias = "username",
            default,
            deserialize_with = "null_as_empty"
        )]
        display_name: String,
    },

    #[serde(rename = "send_message")]
    SendMessage {
        /// Optional: the bound session is authoritative.
        #[serde(rename = "sessionId", default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(rename = "message", alias = "body", default)]
        body: Option<String>,
        #[serde(rename = "aiResponse", default)]
        ai_response: Option<serde_json::Value>,
    },

    #[serde(rename = "leave_session")]
    LeaveSession,
}

impl ClientEvent {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::JoinSession { .. } => "join_session",
            Self::SendMessage { .. } => "send_message",
            Self::LeaveSession => "leave_session",
        }
    }
}

/// A JSON `null` reads as a missing string, so validation sees it as empty.
fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

/// Events the relay delivers to connections.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    #[serde(rename = "user_joined")]
    UserJoined(MembershipEvent),

    #[serde(rename = "user_left")]
    UserLeft(MembershipEvent),

    /// Full log, sent only to a connection that just joined.
    #[serde(rename = "session_history")]
    SessionHistory { messages: Vec<Message> },

    #[serde(rename = "new_message")]
    NewMessage(Message),

    #[serde(rename = "error")]
    Error { code: String, message: String },
}

impl ServerEvent {
    pub fn error(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Error {
            code: code.into(),
            message: message.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UserJoined(_) => "user_joined",
            Self::UserLeft(_) => "user_left",
            Self::SessionHistory { .. } => "session_history",
            Self::NewMessage(_) => "new_message",
            Self::Error { .. } => "error",
        }
    }
}

impl From<&RelayError> for ServerEvent {
    fn from(err: &RelayError) -> Self {
        Self::error(err.code(), err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_join_session() {
        let raw = r#"{"type":"join_session","sessionId":"lab","displayName":"alice"}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinSession {
                session_id: "lab".into(),
                display_name: "alice".into(),
            }
        );
    }

    #[test]
    fn join_accepts_username_alias() {
        let raw = r#"{"type":"join_session","sessionId":"lab","username":"bob"}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            event,
            ClientEvent::JoinSession { ref display_name, .. } if display_name == "bob"
        ));
    }

    #[test]
    fn join_missing_fields_default_to_empty() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"join_session"}"#).unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinSession {
                session_id: String::new(),
                display_name: String::new(),
            }
        );
    }

    #[test]
    fn parse_send_message_with_ai_response() {
        let raw = r#"{"type":"send_message","sessionId":"lab","message":null,"aiResponse":[{"type":"text","text":"hey"}]}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        match event {
            ClientEvent::SendMessage {
                session_id,
                body,
                ai_response,
            } => {
                assert_eq!(session_id.as_deref(), Some("lab"));
                assert!(body.is_none());
                assert_eq!(ai_response.unwrap()[0]["text"], "hey");
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn send_message_accepts_body_alias() {
        let raw = r#"{"type":"send_message","body":"hi"}"#;
        let event: ClientEvent = serde_json::from_str(raw).unwrap();
        assert!(matches!(
            event,
            ClientEvent::SendMessage { body: Some(ref b), session_id: None, .. } if b == "hi"
        ));
    }

    #[test]
    fn parse_leave_session() {
        let event: ClientEvent = serde_json::from_str(r#"{"type":"leave_session"}"#).unwrap();
        assert_eq!(event, ClientEvent::LeaveSession);
        assert_eq!(event.kind(), "leave_session");
    }

    #[test]
    fn unknown_type_is_rejected() {
        assert!(serde_json::from_str::<ClientEvent>(r#"{"type":"dance"}"#).is_err());
    }

    #[test]
    fn user_left_wire_shape() {
        let event = ServerEvent::UserLeft(MembershipEvent::new("bob", vec!["alice".into()]));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(
            value,
            json!({"type": "user_left", "displayName": "bob", "members": ["alice"]})
        );
    }

    #[test]
    fn join_with_null_fields_reads_as_empty() {
        let event: ClientEvent = serde_json::from_value(serde_json::json!({
            "type": "join_session",
            "sessionId": null,
            "displayName": null,
        }))
        .unwrap();
        assert_eq!(
            event,
            ClientEvent::JoinSession {
                session_id: String::new(),
                display_name: String::new(),
            }
        );
    }

    #[test]
    fn new_message_is_flat() {
        let msg = Message::compose("alice", Some("hi".into()), None).unwrap();
        let value = serde_json::to_value(ServerEvent::NewMessage(msg)).unwrap();
        assert_eq!(value["type"], "new_message");
        assert_eq!(value["username"], "alice");
        assert_eq!(value["message"], "hi");
        assert!(value["aiResponse"].is_null());
    }

    #[test]
    fn server_event_round_trips_through_json() {
        let msg = Message::compose("alice", Some("hi".into()), None).unwrap();
        let event = ServerEvent::SessionHistory {
            messages: vec![msg],
        };
        let json = serde_json::to_string(&event).unwrap();
        let parsed: ServerEvent = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, event);
    }

    #[test]
    fn error_event_from_relay_error() {
        let event = ServerEvent::from(&RelayError::NotJoined);
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["code"], "NOT_JOINED");
    }
}
