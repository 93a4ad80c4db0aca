use std::sync::Arc;

use parley_core::{ConnectionId, Message, RelayError, ServerEvent};
use parley_store::SessionStore;

use crate::registry::ConnectionRegistry;

/// Appends chat lines and AI responses to the sender's session and fans them
/// out to every member, the sender included.
pub struct MessageRelay {
    store: Arc<SessionStore>,
    registry: Arc<ConnectionRegistry>,
}

impl MessageRelay {
    pub fn new(store: Arc<SessionStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// `session_hint` is the session the client believes it is in; when given
    /// it must match the bound session.
    pub fn send(
        &self,
        connection_id: &ConnectionId,
        session_hint: Option<&str>,
        body: Option<String>,
        ai_response: Option<serde_json::Value>,
    ) -> Result<Message, RelayError> {
        let binding = self
            .registry
            .binding(connection_id)
            .ok_or(RelayError::NotJoined)?;

        if let Some(hint) = session_hint {
            if hint != binding.session_id {
                return Err(RelayError::invalid_input(format!(
                    "connection is joined to {:?}, not {:?}",
                    binding.session_id, hint
                )));
            }
        }

        let message = Message::compose(&binding.display_name, body, ai_response)?;

        let delivered = self
            .store
            .append_with(&binding.session_id, message.clone(), |session| {
                self.registry.broadcast(
                    session.members().iter().map(|m| &m.connection_id),
                    &ServerEvent::NewMessage(message.clone()),
                )
            })?;

        tracing::debug!(
            connection_id = %connection_id,
            session_id = %binding.session_id,
            message_id = %message.id,
            delivered,
            "Relayed message"
        );
        Ok(message)
    }
}
