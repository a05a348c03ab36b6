//! Per-client edit sessions: cursor, activity, liveness.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};

use crate::now_millis;

/// Editing context for one client on one document.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditSession {
    /// Unique session identifier.
    pub session_id: String,
    /// Acting principal.
    pub user_id: String,
    /// Device/connection the session belongs to.
    pub client_id: String,
    /// Document being edited.
    pub document_id: String,
    /// Wall clock at creation, in milliseconds.
    pub start_time: u64,
    /// Wall clock of the most recent activity, in milliseconds.
    pub last_activity: u64,
    /// Opaque cursor offset reported by the client.
    pub cursor_position: u64,
    /// False once the session was ended explicitly.
    pub is_active: bool,
}

/// Edit sessions keyed by client id.
pub struct SessionRegistry {
    sessions: DashMap<String, EditSession>,
    idle_ms: u64,
}

impl SessionRegistry {
    /// A registry whose sessions stop counting as live after `idle_ms` of
    /// inactivity. At exactly the threshold a session is already expired.
    pub fn new(idle_ms: u64) -> Self {
        Self {
            sessions: DashMap::new(),
            idle_ms,
        }
    }

    /// The configured idle window in milliseconds.
    pub fn idle_timeout_ms(&self) -> u64 {
        self.idle_ms
    }

    /// Start a session for `client_id`, replacing any prior one for that
    /// client (the old session ends implicitly).
    pub fn create_session(&self, user_id: &str, client_id: &str, document_id: &str) -> EditSession {
        let now = now_millis();
        let session = EditSession {
            session_id: format!("sess-{now}-{:06x}", rand::random::<u32>() & 0xff_ffff),
            user_id: user_id.to_owned(),
            client_id: client_id.to_owned(),
            document_id: document_id.to_owned(),
            start_time: now,
            last_activity: now,
            cursor_position: 0,
            is_active: true,
        };
        self.sessions.insert(client_id.to_owned(), session.clone());
        session
    }

    /// Move the client's cursor, refreshing its activity clock.
    pub fn update_cursor(&self, client_id: &str, position: u64) -> bool {
        match self.sessions.get_mut(client_id) {
            Some(mut session) => {
                session.cursor_position = position;
                session.last_activity = now_millis();
                true
            }
            None => false,
        }
    }

    /// Mark the session inactive. The record stays for audit until reaped.
    pub fn end_session(&self, client_id: &str) -> bool {
        match self.sessions.get_mut(client_id) {
            Some(mut session) => {
                session.is_active = false;
                true
            }
            None => false,
        }
    }

    /// The session for a client, live or not.
    pub fn get_session(&self, client_id: &str) -> Option<EditSession> {
        self.sessions
            .get(client_id)
            .map(|session| session.value().clone())
    }

    /// Sessions on `document_id` that are still live.
    pub fn active_sessions(&self, document_id: &str) -> Vec<EditSession> {
        let now = now_millis();
        self.sessions
            .iter()
            .filter(|session| session.document_id == document_id && self.live(session, now))
            .map(|session| session.value().clone())
            .collect()
    }

    /// Drop sessions idle longer than `timeout_ms`; returns how many went.
    pub fn cleanup(&self, timeout_ms: u64) -> usize {
        let now = now_millis();
        let before = self.sessions.len();
        self.sessions
            .retain(|_, session| now.saturating_sub(session.last_activity) <= timeout_ms);
        before - self.sessions.len()
    }

    /// Number of tracked sessions, live or not.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// Whether no sessions are tracked.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    fn live(&self, session: &EditSession, now: u64) -> bool {
        session.is_active && now.saturating_sub(session.last_activity) < self.idle_ms
    }
}
