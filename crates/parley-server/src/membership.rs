use std::sync::Arc;

use parley_core::{ConnectionId, MembershipEvent, RelayError, ServerEvent};
use parley_store::{LeaveOutcome, Session, SessionStore};

use crate::registry::{Binding, ConnectionRegistry};

/// Join/leave lifecycle. Roster announcements are delivered while the
/// session lock is held, so every member sees them in the order applied.
pub struct MembershipManager {
    store: Arc<SessionStore>,
    registry: Arc<ConnectionRegistry>,
}

impl MembershipManager {
    pub fn new(store: Arc<SessionStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self { store, registry }
    }

    /// Join `session_id` as `display_name`.
    ///
    /// A connection already joined elsewhere leaves that session first. Every
    /// member, the joiner included, receives `user_joined`; the joiner then
    /// receives the full log as `session_history`.
    pub fn join(
        &self,
        connection_id: &ConnectionId,
        session_id: &str,
        display_name: &str,
    ) -> Result<MembershipEvent, RelayError> {
        if session_id.trim().is_empty() {
            return Err(RelayError::invalid_input("sessionId must not be empty"));
        }
        if display_name.trim().is_empty() {
            return Err(RelayError::invalid_input("displayName must not be empty"));
        }

        if let Some(previous) = self.registry.binding(connection_id) {
            if previous.session_id != session_id {
                tracing::debug!(
                    connection_id = %connection_id,
                    from = %previous.session_id,
                    to = %session_id,
                    "Migrating connection between sessions"
                );
                self.leave(connection_id);
            }
        }

        let event = self
            .store
            .join_with(session_id, connection_id, display_name, |session| {
                self.registry.bind(
                    connection_id,
                    Binding {
                        session_id: session_id.to_string(),
                        display_name: display_name.to_string(),
                    },
                );

                let event = MembershipEvent::new(display_name, session.display_names());
                self.announce(session, ServerEvent::UserJoined(event.clone()));
                self.registry.send_to(
                    connection_id,
                    ServerEvent::SessionHistory {
                        messages: session.log().to_vec(),
                    },
                );
                event
            });

        tracing::info!(
            connection_id = %connection_id,
            session_id = %session_id,
            display_name = %display_name,
            members = event.members.len(),
            "Joined session"
        );
        Ok(event)
    }

    /// Leave whatever session the connection is joined to.
    ///
    /// Returns the event announced to the remaining members, or `None` when
    /// there was nothing to leave or nobody is left to tell.
    pub fn leave(&self, connection_id: &ConnectionId) -> Option<MembershipEvent> {
        let binding = self.registry.take_binding(connection_id)?;

        let outcome = self
            .store
            .leave_with(&binding.session_id, connection_id, |session, member| {
                let event = MembershipEvent::new(&member.display_name, session.display_names());
                self.announce(session, ServerEvent::UserLeft(event.clone()));
                event
            });

        match outcome {
            LeaveOutcome::Left { notified, .. } => {
                tracing::info!(
                    connection_id = %connection_id,
                    session_id = %binding.session_id,
                    members = notified.members.len(),
                    "Left session"
                );
                Some(notified)
            }
            LeaveOutcome::Reclaimed(_) => {
                tracing::info!(
                    connection_id = %connection_id,
                    session_id = %binding.session_id,
                    "Last member left session"
                );
                None
            }
            LeaveOutcome::NotMember | LeaveOutcome::UnknownSession => {
                tracing::debug!(
                    connection_id = %connection_id,
                    session_id = %binding.session_id,
                    "Leave found no membership"
                );
                None
            }
        }
    }

    fn announce(&self, session: &Session, event: ServerEvent) {
        self.registry.broadcast(
            session.members().iter().map(|m| &m.connection_id),
            &event,
        );
    }
}
