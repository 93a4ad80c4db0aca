//! Per-connection state machine and the dispatch loop feeding it.
//!
//! ```text
//! Attached --join--> Joined --send--> Joined
//!    ^                 |  \--join(other)--> Joined (implicit leave first)
//!    +----leave--------+
//! Attached|Joined --disconnect--> Closed
//! ```

use std::sync::Arc;

use parley_core::errors::PARSE_ERROR;
use parley_core::{ClientEvent, ConnectionId, RelayError, ServerEvent};
use parley_store::SessionStore;
use tokio::sync::mpsc;

use crate::membership::MembershipManager;
use crate::registry::ConnectionRegistry;
use crate::relay::MessageRelay;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    /// Transport open, no session.
    Attached,
    /// Bound to exactly one session.
    Joined,
    /// Terminal.
    Closed,
}

/// Unit of work for the dispatcher.
#[derive(Debug)]
pub enum Inbound {
    /// Raw text frame from the transport.
    Frame(String),
    /// Transport went away, or liveness expired.
    Disconnect,
}

pub struct Gateway {
    store: Arc<SessionStore>,
    registry: Arc<ConnectionRegistry>,
    membership: MembershipManager,
    relay: MessageRelay,
}

impl Gateway {
    pub fn new(store: Arc<SessionStore>, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            membership: MembershipManager::new(Arc::clone(&store), Arc::clone(&registry)),
            relay: MessageRelay::new(Arc::clone(&store), Arc::clone(&registry)),
            store,
            registry,
        }
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    /// Attach a new connection in the `Attached` state.
    pub fn attach(&self) -> (ConnectionId, mpsc::Receiver<ServerEvent>) {
        let (id, rx) = self.registry.register();
        tracing::info!(connection_id = %id, "Connection attached");
        (id, rx)
    }

    pub fn state(&self, connection_id: &ConnectionId) -> ConnectionState {
        if !self.registry.contains(connection_id) {
            ConnectionState::Closed
        } else if self.registry.binding(connection_id).is_some() {
            ConnectionState::Joined
        } else {
            ConnectionState::Attached
        }
    }

    pub fn handle(&self, connection_id: &ConnectionId, inbound: Inbound) {
        match inbound {
            Inbound::Frame(raw) => self.handle_frame(connection_id, &raw),
            Inbound::Disconnect => self.disconnect(connection_id),
        }
    }

    /// Decode and dispatch one text frame. Undecodable frames are answered
    /// with a `PARSE_ERROR` to the sender.
    pub fn handle_frame(&self, connection_id: &ConnectionId, raw: &str) {
        match serde_json::from_str::<ClientEvent>(raw) {
            Ok(event) => {
                // Failures were already reported to the connection.
                let _ = self.handle_event(connection_id, event);
            }
            Err(e) => {
                tracing::warn!(connection_id = %connection_id, error = %e, "Malformed frame");
                self.registry.send_to(
                    connection_id,
                    ServerEvent::error(PARSE_ERROR, format!("invalid frame: {e}")),
                );
            }
        }
    }

    /// Apply one client event. Errors are also sent to this connection only.
    pub fn handle_event(
        &self,
        connection_id: &ConnectionId,
        event: ClientEvent,
    ) -> Result<(), RelayError> {
        if self.state(connection_id) == ConnectionState::Closed {
            tracing::debug!(connection_id = %connection_id, kind = event.kind(), "Ignoring event for closed connection");
            return Ok(());
        }
        tracing::debug!(connection_id = %connection_id, kind = event.kind(), "Dispatching event");

        let result = match event {
            ClientEvent::JoinSession {
                session_id,
                display_name,
            } => self
                .membership
                .join(connection_id, &session_id, &display_name)
                .map(|_| ()),
            ClientEvent::SendMessage {
                session_id,
                body,
                ai_response,
            } => self
                .relay
                .send(connection_id, session_id.as_deref(), body, ai_response)
                .map(|_| ()),
            ClientEvent::LeaveSession => {
                self.membership.leave(connection_id);
                Ok(())
            }
        };

        if let Err(ref e) = result {
            tracing::debug!(connection_id = %connection_id, code = e.code(), error = %e, "Rejected event");
            self.registry.send_to(connection_id, ServerEvent::from(e));
        }
        result
    }

    /// Tear the connection down. Safe to call more than once.
    pub fn disconnect(&self, connection_id: &ConnectionId) {
        if !self.registry.contains(connection_id) {
            return;
        }
        self.membership.leave(connection_id);
        self.registry.unregister(connection_id);
        tracing::info!(connection_id = %connection_id, "Connection closed");
    }

    /// Single dispatcher: processes inbound work in arrival order until every
    /// sender is gone.
    pub async fn run(self: Arc<Self>, mut rx: mpsc::Receiver<(ConnectionId, Inbound)>) {
        while let Some((connection_id, inbound)) = rx.recv().await {
            self.handle(&connection_id, inbound);
        }
        tracing::info!("Gateway dispatcher stopped");
    }
}
