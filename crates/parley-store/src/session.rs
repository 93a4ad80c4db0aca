use parley_core::{ConnectionId, Message};

/// One occupant of a session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Member {
    pub connection_id: ConnectionId,
    pub display_name: String,
}

/// A named room: its roster and its append-only message log.
///
/// Only reachable through a [`crate::SessionHandle`] lock; every mutation of a
/// given session is therefore serialized.
#[derive(Debug)]
pub struct Session {
    id: String,
    /// Join order. Connection ids are unique within the roster.
    members: Vec<Member>,
    log: Vec<Message>,
    /// Set when the store dropped this session after its last member left.
    /// A reclaimed session must never be mutated again.
    reclaimed: bool,
}

impl Session {
    pub(crate) fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            members: Vec::new(),
            log: Vec::new(),
            reclaimed: false,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn members(&self) -> &[Member] {
        &self.members
    }

    pub fn member_count(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }

    /// Display names in join order.
    pub fn display_names(&self) -> Vec<String> {
        self.members.iter().map(|m| m.display_name.clone()).collect()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.members.iter().any(|m| &m.connection_id == connection_id)
    }

    pub fn log(&self) -> &[Message] {
        &self.log
    }

    pub fn is_reclaimed(&self) -> bool {
        self.reclaimed
    }

    /// Insert a member, or rename it in place if the connection is already here.
    /// Returns true when the connection was not a member before.
    pub(crate) fn upsert_member(&mut self, connection_id: &ConnectionId, display_name: &str) -> bool {
        if let Some(existing) = self
            .members
            .iter_mut()
            .find(|m| &m.connection_id == connection_id)
        {
            existing.display_name = display_name.to_string();
            return false;
        }
        self.members.push(Member {
            connection_id: connection_id.clone(),
            display_name: display_name.to_string(),
        });
        true
    }

    pub(crate) fn remove_member(&mut self, connection_id: &ConnectionId) -> Option<Member> {
        let idx = self
            .members
            .iter()
            .position(|m| &m.connection_id == connection_id)?;
        Some(self.members.remove(idx))
    }

    pub(crate) fn append(&mut self, message: Message) {
        self.log.push(message);
    }

    pub(crate) fn mark_reclaimed(&mut self) {
        self.reclaimed = true;
    }
}
