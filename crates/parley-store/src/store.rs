//! In-memory session registry.
//!
//! Each session sits behind its own lock, so work on unrelated sessions never
//! contends. Lock order: a session lock may be held while touching the map,
//! but a session is never locked while a map guard is alive.

use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use parley_core::{ConnectionId, Message};
use serde::Serialize;

use crate::error::StoreError;
use crate::session::{Member, Session};

pub type SessionHandle = Arc<Mutex<Session>>;

/// Directory entry for one live session.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSummary {
    pub id: String,
    pub member_count: usize,
}

/// Result of removing a connection from a session.
#[derive(Debug, PartialEq, Eq)]
pub enum LeaveOutcome<R> {
    /// Members remain; carries the callback's result.
    Left { member: Member, notified: R },
    /// The last member left and the session was dropped.
    Reclaimed(Member),
    /// The session exists but the connection was not in it.
    NotMember,
    /// No such session (already reclaimed, or never created).
    UnknownSession,
}

#[derive(Default)]
pub struct SessionStore {
    sessions: DashMap<String, SessionHandle>,
}

impl SessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the session called `id`, creating an empty one if absent.
    ///
    /// A handle obtained here can lose a race with teardown; check
    /// [`Session::is_reclaimed`] after locking, or use [`Self::join_with`].
    pub fn create_or_get_session(&self, id: &str) -> SessionHandle {
        let entry = self.sessions.entry(id.to_string()).or_insert_with(|| {
            tracing::info!(session_id = %id, "Session created");
            Arc::new(Mutex::new(Session::new(id)))
        });
        Arc::clone(entry.value())
    }

    fn handle(&self, id: &str) -> Option<SessionHandle> {
        self.sessions.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Drop the session if it has no members. No-op otherwise.
    pub fn remove_session(&self, id: &str) -> bool {
        let Some(handle) = self.handle(id) else {
            return false;
        };
        let mut session = handle.lock();
        if session.is_reclaimed() || !session.is_empty() {
            return false;
        }
        self.reclaim(&handle, &mut session);
        true
    }

    /// Caller holds `session`'s lock and has observed it empty.
    fn reclaim(&self, handle: &SessionHandle, session: &mut Session) {
        session.mark_reclaimed();
        self.sessions
            .remove_if(session.id(), |_, current| Arc::ptr_eq(current, handle));
        tracing::info!(session_id = %session.id(), "Session reclaimed");
    }

    /// Snapshot of every occupied session. Not transactional across sessions.
    pub fn list_sessions(&self) -> Vec<SessionSummary> {
        let handles: Vec<SessionHandle> = self
            .sessions
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();

        let mut summaries: Vec<SessionSummary> = handles
            .iter()
            .filter_map(|handle| {
                let session = handle.lock();
                if session.is_reclaimed() || session.is_empty() {
                    return None;
                }
                Some(SessionSummary {
                    id: session.id().to_string(),
                    member_count: session.member_count(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.id.cmp(&b.id));
        summaries
    }

    pub fn append_message(&self, id: &str, message: Message) -> Result<(), StoreError> {
        self.append_with(id, message, |_| ())
    }

    /// Append to the log, then run `then` while the session is still locked,
    /// so whatever it does (typically fan-out) observes appends in log order.
    pub fn append_with<R>(
        &self,
        id: &str,
        message: Message,
        then: impl FnOnce(&Session) -> R,
    ) -> Result<R, StoreError> {
        let handle = self
            .handle(id)
            .ok_or_else(|| StoreError::UnknownSession(id.to_string()))?;
        let mut session = handle.lock();
        if session.is_reclaimed() {
            return Err(StoreError::UnknownSession(id.to_string()));
        }
        session.append(message);
        Ok(then(&session))
    }

    /// Add (or rename) a member, creating the session on first use, then run
    /// `then` under the session lock.
    pub fn join_with<R>(
        &self,
        id: &str,
        connection_id: &ConnectionId,
        display_name: &str,
        then: impl FnOnce(&Session) -> R,
    ) -> R {
        loop {
            let handle = self.create_or_get_session(id);
            let mut session = handle.lock();
            if session.is_reclaimed() {
                // Lost to a concurrent teardown; the next lookup creates a fresh session.
                continue;
            }
            session.upsert_member(connection_id, display_name);
            return then(&session);
        }
    }

    /// Remove a member. If others remain, run `then` under the session lock;
    /// if nobody remains, reclaim the session in the same critical section.
    pub fn leave_with<R>(
        &self,
        id: &str,
        connection_id: &ConnectionId,
        then: impl FnOnce(&Session, &Member) -> R,
    ) -> LeaveOutcome<R> {
        let Some(handle) = self.handle(id) else {
            return LeaveOutcome::UnknownSession;
        };
        let mut session = handle.lock();
        if session.is_reclaimed() {
            return LeaveOutcome::UnknownSession;
        }
        let Some(member) = session.remove_member(connection_id) else {
            return LeaveOutcome::NotMember;
        };
        if session.is_empty() {
            self.reclaim(&handle, &mut session);
            return LeaveOutcome::Reclaimed(member);
        }
        let notified = then(&session, &member);
        LeaveOutcome::Left { member, notified }
    }

    /// Read a session under its lock.
    #[cfg(any(test, feature = "test-util"))]
    pub fn inspect<R>(&self, id: &str, f: impl FnOnce(&Session) -> R) -> Option<R> {
        let handle = self.handle(id)?;
        let session = handle.lock();
        if session.is_reclaimed() {
            return None;
        }
        Some(f(&session))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Number of sessions in the map.
    pub fn count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn conn(raw: &str) -> ConnectionId {
        ConnectionId::from_raw(raw)
    }

    fn say(author: &str, body: &str) -> Message {
        Message::compose(author, Some(body.into()), None).unwrap()
    }

    #[test]
    fn create_or_get_is_idempotent() {
        let store = SessionStore::new();
        let a = store.create_or_get_session("lab");
        let b = store.create_or_get_session("lab");
        assert!(Arc::ptr_eq(&a, &b));
        assert_eq!(store.count(), 1);
    }

    #[test]
    fn session_ids_are_case_sensitive() {
        let store = SessionStore::new();
        store.join_with("Lab", &conn("a"), "alice", |_| ());
        store.join_with("lab", &conn("b"), "bob", |_| ());
        assert_eq!(store.count(), 2);
    }

    #[test]
    fn remove_session_is_noop_while_occupied() {
        let store = SessionStore::new();
        store.join_with("lab", &conn("a"), "alice", |_| ());
        assert!(!store.remove_session("lab"));
        assert!(store.contains("lab"));
    }

    #[test]
    fn remove_session_drops_empty_session() {
        let store = SessionStore::new();
        store.create_or_get_session("lab");
        assert!(store.remove_session("lab"));
        assert!(!store.contains("lab"));
        assert!(!store.remove_session("lab"));
    }

    #[test]
    fn join_callback_sees_post_join_roster() {
        let store = SessionStore::new();
        store.join_with("lab", &conn("a"), "alice", |_| ());
        let names = store.join_with("lab", &conn("b"), "bob", |s| s.display_names());
        assert_eq!(names, vec!["alice", "bob"]);
    }

    #[test]
    fn last_leave_reclaims_session() {
        let store = SessionStore::new();
        store.join_with("lab", &conn("a"), "alice", |_| ());
        store.join_with("lab", &conn("b"), "bob", |_| ());

        let outcome = store.leave_with("lab", &conn("b"), |s, m| {
            (m.display_name.clone(), s.display_names())
        });
        match outcome {
            LeaveOutcome::Left { member, notified } => {
                assert_eq!(member.display_name, "bob");
                assert_eq!(notified, ("bob".to_string(), vec!["alice".to_string()]));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert!(store.contains("lab"));

        let outcome = store.leave_with("lab", &conn("a"), |_, _| ());
        assert!(matches!(outcome, LeaveOutcome::Reclaimed(ref m) if m.display_name == "alice"));
        assert!(!store.contains("lab"));
        assert!(store.list_sessions().is_empty());
    }

    #[test]
    fn leave_unknown_session_or_non_member() {
        let store = SessionStore::new();
        assert_eq!(
            store.leave_with("ghost", &conn("a"), |_, _| ()),
            LeaveOutcome::UnknownSession
        );
        store.join_with("lab", &conn("a"), "alice", |_| ());
        assert_eq!(
            store.leave_with("lab", &conn("z"), |_, _| ()),
            LeaveOutcome::NotMember
        );
    }

    #[test]
    fn append_to_missing_session_fails() {
        let store = SessionStore::new();
        let err = store.append_message("lab", say("alice", "hi")).unwrap_err();
        assert_eq!(err, StoreError::UnknownSession("lab".into()));
    }

    #[test]
    fn append_after_reclaim_fails() {
        let store = SessionStore::new();
        store.join_with("lab", &conn("a"), "alice", |_| ());
        store.leave_with("lab", &conn("a"), |_, _| ());
        assert!(store.append_message("lab", say("alice", "late")).is_err());
    }

    #[test]
    fn log_accumulates_in_append_order() {
        let store = SessionStore::new();
        store.join_with("lab", &conn("a"), "alice", |_| ());
        for i in 0..5 {
            store.append_message("lab", say("alice", &i.to_string())).unwrap();
        }
        let bodies = store
            .inspect("lab", |s| {
                s.log()
                    .iter()
                    .map(|m| m.body.clone().unwrap())
                    .collect::<Vec<_>>()
            })
            .unwrap();
        assert_eq!(bodies, vec!["0", "1", "2", "3", "4"]);
    }

    #[test]
    fn rejoin_after_reclaim_starts_fresh_log() {
        let store = SessionStore::new();
        store.join_with("lab", &conn("a"), "alice", |_| ());
        store.append_message("lab", say("alice", "old")).unwrap();
        store.leave_with("lab", &conn("a"), |_, _| ());

        let log_len = store.join_with("lab", &conn("b"), "bob", |s| s.log().len());
        assert_eq!(log_len, 0);
    }

    #[test]
    fn list_sessions_reports_member_counts() {
        let store = SessionStore::new();
        store.join_with("s2", &conn("a"), "alice", |_| ());
        store.join_with("s1", &conn("b"), "bob", |_| ());
        store.join_with("s1", &conn("c"), "carol", |_| ());
        store.create_or_get_session("empty");

        assert_eq!(
            store.list_sessions(),
            vec![
                SessionSummary { id: "s1".into(), member_count: 2 },
                SessionSummary { id: "s2".into(), member_count: 1 },
            ]
        );
    }

    #[test]
    fn summary_serializes_member_count_camel_case() {
        let summary = SessionSummary { id: "lab".into(), member_count: 3 };
        let value = serde_json::to_value(&summary).unwrap();
        assert_eq!(value, serde_json::json!({"id": "lab", "memberCount": 3}));
    }

    #[test]
    fn concurrent_join_leave_never_leaks_empty_sessions() {
        let store = Arc::new(SessionStore::new());
        let workers: Vec<_> = (0..8)
            .map(|n| {
                let store = Arc::clone(&store);
                thread::spawn(move || {
                    let id = conn(&format!("worker-{n}"));
                    for _ in 0..500 {
                        store.join_with("hot", &id, "w", |s| {
                            assert!(!s.is_empty());
                            assert!(s.contains(&id));
                        });
                        let outcome = store.leave_with("hot", &id, |s, _| {
                            assert!(!s.is_empty());
                        });
                        assert!(matches!(
                            outcome,
                            LeaveOutcome::Left { .. } | LeaveOutcome::Reclaimed(_)
                        ));
                    }
                })
            })
            .collect();

        for worker in workers {
            worker.join().unwrap();
        }

        assert!(!store.contains("hot"));
        assert_eq!(store.count(), 0);
    }
}
