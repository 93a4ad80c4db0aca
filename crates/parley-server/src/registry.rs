use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use dashmap::DashMap;
use parley_core::{ConnectionId, ServerEvent};
use tokio::sync::mpsc;

/// The session a connection is currently joined to.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Binding {
    pub session_id: String,
    pub display_name: String,
}

/// A live transport attachment.
pub struct Connection {
    tx: mpsc::Sender<ServerEvent>,
    binding: Option<Binding>,
    last_seen: AtomicU64,
}

impl Connection {
    fn new(tx: mpsc::Sender<ServerEvent>) -> Self {
        Self {
            tx,
            binding: None,
            last_seen: AtomicU64::new(now_millis()),
        }
    }

    pub fn binding(&self) -> Option<&Binding> {
        self.binding.as_ref()
    }

    pub fn record_activity(&self) {
        self.last_seen.store(now_millis(), Ordering::Relaxed);
    }

    pub fn is_alive(&self, timeout: Duration) -> bool {
        let last = self.last_seen.load(Ordering::Relaxed);
        let timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        now_millis().saturating_sub(last) < timeout_ms
    }
}

fn now_millis() -> u64 {
    let elapsed = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default();
    u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX)
}

/// Every attached connection, its outbound queue and its session binding.
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Connection>,
    max_send_queue: usize,
}

impl ConnectionRegistry {
    /// `max_send_queue` is clamped to at least one slot.
    pub fn new(max_send_queue: usize) -> Self {
        Self {
            connections: DashMap::new(),
            max_send_queue: max_send_queue.max(1),
        }
    }

    /// Register a new connection and return its ID + outbound receiver.
    pub fn register(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let id = ConnectionId::new();
        let (tx, rx) = mpsc::channel(self.max_send_queue);
        self.connections
            .insert(id.clone(), Connection::new(tx));
        (id, rx)
    }

    /// Remove a connection. Dropping its sender ends the writer side of the
    /// transport. Returns the binding it still held, if any.
    pub fn unregister(&self, id: &ConnectionId) -> Option<Binding> {
        self.connections
            .remove(id)
            .and_then(|(_, connection)| connection.binding)
    }

    pub fn contains(&self, id: &ConnectionId) -> bool {
        self.connections.contains_key(id)
    }

    pub fn binding(&self, id: &ConnectionId) -> Option<Binding> {
        self.connections
            .get(id)
            .and_then(|c| c.binding().cloned())
    }

    /// Bind a connection to a session, replacing any previous binding.
    pub fn bind(&self, id: &ConnectionId, binding: Binding) -> bool {
        match self.connections.get_mut(id) {
            Some(mut connection) => {
                connection.binding = Some(binding);
                true
            }
            None => false,
        }
    }

    /// Clear and return the binding. A second call returns `None`.
    pub fn take_binding(&self, id: &ConnectionId) -> Option<Binding> {
        self.connections
            .get_mut(id)
            .and_then(|mut connection| connection.binding.take())
    }

    /// Queue an event for one connection without waiting. A full or closed
    /// queue drops the event.
    pub fn send_to(&self, id: &ConnectionId, event: ServerEvent) -> bool {
        let Some(connection) = self.connections.get(id) else {
            tracing::debug!(connection_id = %id, kind = event.kind(), "Dropping event for detached connection");
            return false;
        };
        match connection.tx.try_send(event) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(event)) => {
                tracing::warn!(
                    connection_id = %id,
                    kind = event.kind(),
                    "Send queue full, dropping event"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(event)) => {
                tracing::debug!(connection_id = %id, kind = event.kind(), "Send queue closed");
                false
            }
        }
    }

    /// Best-effort delivery to each recipient. Returns how many accepted it.
    pub fn broadcast<'a>(
        &self,
        recipients: impl IntoIterator<Item = &'a ConnectionId>,
        event: &ServerEvent,
    ) -> usize {
        recipients
            .into_iter()
            .filter(|id| self.send_to(id, event.clone()))
            .count()
    }

    pub fn record_activity(&self, id: &ConnectionId) {
        if let Some(connection) = self.connections.get(id) {
            connection.record_activity();
        }
    }

    /// Connections that have been silent for at least `timeout`.
    pub fn stale_connections(&self, timeout: Duration) -> Vec<ConnectionId> {
        self.connections
            .iter()
            .filter(|entry| !entry.value().is_alive(timeout))
            .map(|entry| entry.key().clone())
            .collect()
    }

    /// Number of attached connections.
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    #[cfg(test)]
    pub(crate) fn backdate_activity(&self, id: &ConnectionId, secs: u64) {
        if let Some(connection) = self.connections.get(id) {
            connection
                .last_seen
                .store(now_millis().saturating_sub(secs * 1000), Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::MembershipEvent;

    fn ping_event() -> ServerEvent {
        ServerEvent::UserJoined(MembershipEvent::new("alice", vec!["alice".into()]))
    }

    fn lab_binding(name: &str) -> Binding {
        Binding {
            session_id: "lab".into(),
            display_name: name.into(),
        }
    }

    #[test]
    fn register_and_unregister() {
        let registry = ConnectionRegistry::new(32);
        assert_eq!(registry.count(), 0);

        let (id1, _rx1) = registry.register();
        let (id2, _rx2) = registry.register();
        assert_ne!(id1, id2);
        assert_eq!(registry.count(), 2);

        registry.unregister(&id1);
        assert_eq!(registry.count(), 1);
        assert!(!registry.contains(&id1));

        registry.unregister(&id2);
        assert_eq!(registry.count(), 0);
    }

    #[test]
    fn bind_and_take_binding() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register();
        assert!(registry.binding(&id).is_none());

        assert!(registry.bind(&id, lab_binding("alice")));
        assert_eq!(registry.binding(&id), Some(lab_binding("alice")));

        assert_eq!(registry.take_binding(&id), Some(lab_binding("alice")));
        assert!(registry.take_binding(&id).is_none());
    }

    #[test]
    fn bind_unknown_connection_fails() {
        let registry = ConnectionRegistry::new(32);
        assert!(!registry.bind(&ConnectionId::new(), lab_binding("alice")));
    }

    #[test]
    fn unregister_returns_leftover_binding() {
        let registry = ConnectionRegistry::new(32);
        let (id, _rx) = registry.register();
        registry.bind(&id, lab_binding("alice"));
        assert_eq!(registry.unregister(&id), Some(lab_binding("alice")));
        assert!(registry.unregister(&id).is_none());
    }

    #[tokio::test]
    async fn send_to_specific_connection() {
        let registry = ConnectionRegistry::new(32);
        let (id, mut rx) = registry.register();

        assert!(registry.send_to(&id, ping_event()));
        assert_eq!(rx.recv().await.unwrap(), ping_event());
    }

    #[test]
    fn send_to_unknown_connection() {
        let registry = ConnectionRegistry::new(32);
        assert!(!registry.send_to(&ConnectionId::new(), ping_event()));
    }

    #[test]
    fn send_to_full_queue_drops() {
        let registry = ConnectionRegistry::new(2);
        let (id, _rx) = registry.register();

        assert!(registry.send_to(&id, ping_event()));
        assert!(registry.send_to(&id, ping_event()));
        assert!(!registry.send_to(&id, ping_event()));
    }

    #[test]
    fn broadcast_skips_closed_recipients() {
        let registry = ConnectionRegistry::new(32);
        let (id1, mut rx1) = registry.register();
        let (id2, rx2) = registry.register();
        let (id3, mut rx3) = registry.register();
        drop(rx2);

        let delivered = registry.broadcast([&id1, &id2, &id3], &ping_event());
        assert_eq!(delivered, 2);
        assert!(rx1.try_recv().is_ok());
        assert!(rx3.try_recv().is_ok());
    }

    #[test]
    fn stale_connections_detected() {
        let registry = ConnectionRegistry::new(32);
        let (fresh, _rx1) = registry.register();
        let (stale, _rx2) = registry.register();
        registry.backdate_activity(&stale, 600);

        let found = registry.stale_connections(Duration::from_secs(90));
        assert_eq!(found, vec![stale.clone()]);

        registry.record_activity(&stale);
        assert!(registry.stale_connections(Duration::from_secs(90)).is_empty());
        assert!(registry.contains(&fresh));
    }

    #[test]
    fn zero_queue_capacity_is_clamped() {
        let registry = ConnectionRegistry::new(0);
        let (id, _rx) = registry.register();

        assert!(registry.send_to(&id, ping_event()));
        assert!(!registry.send_to(&id, ping_event()));
    }

    #[test]
    fn sub_second_timeout_keeps_fresh_connections() {
        let registry = ConnectionRegistry::new(32);
        let (_id, _rx) = registry.register();
        assert!(registry
            .stale_connections(Duration::from_millis(500))
            .is_empty());
    }
}
