//! In-memory, TTL-bounded multi-turn dialogue state.
//!
//! One process-wide map of `session_id → Session` behind a single mutex.
//! Critical sections are minimal: lookup, insert, append, and history
//! snapshot; callers never hold the lock across I/O. Expired sessions
//! are swept lazily on access and must not influence new requests.
//!
//! Turn pairs are appended atomically via [`SessionManager::append_exchange`]:
//! a concurrent request on the same session observes either no effect of
//! a finished exchange or both of its turns, never a half-turn.
//!
//! Sessions are deliberately not durable; a process restart loses them.

use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::Mutex;
use uuid::Uuid;

use crate::models::{Role, Turn};

struct Session {
    turns: Vec<Turn>,
    created_at: DateTime<Utc>,
    last_seen_at: DateTime<Utc>,
}

impl Session {
    fn new(now: DateTime<Utc>) -> Self {
        Self {
            turns: Vec::new(),
            created_at: now,
            last_seen_at: now,
        }
    }

    fn is_expired(&self, now: DateTime<Utc>, ttl: Duration) -> bool {
        now - self.last_seen_at > ttl
    }
}

pub struct SessionManager {
    sessions: Mutex<HashMap<String, Session>>,
    ttl: Duration,
}

impl SessionManager {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            sessions: Mutex::new(HashMap::new()),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }

    /// Resolves a session id: a missing, unknown, or expired id allocates
    /// a fresh UUID. Returns `(session_id, is_new)` and refreshes the
    /// session's `last_seen_at`.
    pub fn get_or_create(&self, requested: Option<&str>) -> (String, bool) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        Self::sweep_locked(&mut sessions, now, self.ttl);

        if let Some(id) = requested {
            if let Some(session) = sessions.get_mut(id) {
                session.last_seen_at = now;
                return (id.to_string(), false);
            }
        }

        let id = Uuid::new_v4().to_string();
        sessions.insert(id.clone(), Session::new(now));
        (id, true)
    }

    /// Appends a user/assistant turn pair in one critical section and
    /// refreshes `last_seen_at`. Unknown ids are ignored (the session
    /// expired between resolution and commit; the reply was already sent).
    pub fn append_exchange(&self, session_id: &str, user: &str, assistant: &str) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(session_id) {
            session.turns.push(Turn {
                role: Role::User,
                content: user.to_string(),
                ts: now,
            });
            session.turns.push(Turn {
                role: Role::Assistant,
                content: assistant.to_string(),
                ts: now,
            });
            session.last_seen_at = now;
        }
    }

    /// Snapshot of the last `2 × max_turns` messages in chronological
    /// order. The lock is released before the caller assembles a prompt.
    pub fn history(&self, session_id: &str, max_turns: usize) -> Vec<Turn> {
        let sessions = self.sessions.lock().unwrap();
        match sessions.get(session_id) {
            Some(session) => {
                let cap = max_turns * 2;
                let skip = session.turns.len().saturating_sub(cap);
                session.turns[skip..].to_vec()
            }
            None => Vec::new(),
        }
    }

    /// Removes sessions idle longer than the TTL.
    pub fn sweep(&self) {
        let now = Utc::now();
        let mut sessions = self.sessions.lock().unwrap();
        Self::sweep_locked(&mut sessions, now, self.ttl);
    }

    fn sweep_locked(sessions: &mut HashMap<String, Session>, now: DateTime<Utc>, ttl: Duration) {
        sessions.retain(|_, session| !session.is_expired(now, ttl));
    }

    pub fn active_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    /// Number of turns stored for a session (0 for unknown ids).
    pub fn turn_count(&self, session_id: &str) -> usize {
        let sessions = self.sessions.lock().unwrap();
        sessions.get(session_id).map_or(0, |s| s.turns.len())
    }

    /// Age invariant check used by tests: `last_seen_at >= created_at`.
    #[cfg(test)]
    fn timestamps(&self, session_id: &str) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let sessions = self.sessions.lock().unwrap();
        sessions
            .get(session_id)
            .map(|s| (s.created_at, s.last_seen_at))
    }
}
