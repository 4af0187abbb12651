use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use crate::types::{ChatMessage, ConversationSession};

const DEFAULT_TTL: Duration = Duration::from_secs(30 * 60);
const MAX_HISTORY: usize = 20;

struct Entry {
    session: ConversationSession,
    expires_at: Instant,
}

/// TTL-backed cache of conversation sessions keyed by session id. Every
/// read refreshes the expiry, and mutation of an entry is atomic because
/// the whole table sits behind one lock.
pub struct SessionStore {
    entries: Arc<Mutex<HashMap<String, Entry>>>,
    ttl: Duration,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(DEFAULT_TTL)
    }
}

impl SessionStore {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Arc::new(Mutex::new(HashMap::new())),
            ttl,
        }
    }

    pub async fn create(&self, session_id: &str, workflow_id: i64, user: &str) -> ConversationSession {
        let session = ConversationSession {
            session_id: session_id.to_string(),
            workflow_id,
            user: user.to_string(),
            history: Vec::new(),
            context: Value::Null,
            last_activity: Utc::now(),
        };
        let mut entries = self.entries.lock().await;
        entries.insert(
            session_id.to_string(),
            Entry {
                session: session.clone(),
                expires_at: Instant::now() + self.ttl,
            },
        );
        session
    }

    /// Returns the session and refreshes its expiry, or `None` if it is
    /// missing or has expired. The read and the refresh happen under one
    /// lock so a concurrent reader cannot observe a stale deadline.
    pub async fn get(&self, session_id: &str) -> Option<ConversationSession> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        match entries.get_mut(session_id) {
            Some(entry) if entry.expires_at > now => {
                entry.expires_at = now + self.ttl;
                entry.session.last_activity = Utc::now();
                Some(entry.session.clone())
            }
            Some(_) => {
                entries.remove(session_id);
                None
            }
            None => None,
        }
    }

    /// Writes the full session record back and refreshes the expiry.
    /// Returns `None` if the session is missing or already expired.
    pub async fn update(&self, mut session: ConversationSession) -> Option<ConversationSession> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let entry = match entries.get_mut(&session.session_id) {
            Some(e) if e.expires_at > now => e,
            Some(_) => {
                entries.remove(&session.session_id);
                return None;
            }
            None => return None,
        };
        if session.history.len() > MAX_HISTORY {
            let overflow = session.history.len() - MAX_HISTORY;
            session.history.drain(0..overflow);
        }
        session.last_activity = Utc::now();
        entry.session = session.clone();
        entry.expires_at = now + self.ttl;
        Some(session)
    }

    /// Appends a message, trimming history to the last `MAX_HISTORY`
    /// entries, and refreshes the expiry.
    pub async fn append_message(&self, session_id: &str, role: &str, content: &str) -> Option<ConversationSession> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let entry = match entries.get_mut(session_id) {
            Some(e) if e.expires_at > now => e,
            Some(_) => {
                entries.remove(session_id);
                return None;
            }
            None => return None,
        };
        entry.session.history.push(ChatMessage {
            role: role.to_string(),
            content: content.to_string(),
            at: Utc::now(),
        });
        if entry.session.history.len() > MAX_HISTORY {
            let overflow = entry.session.history.len() - MAX_HISTORY;
            entry.session.history.drain(0..overflow);
        }
        entry.session.last_activity = Utc::now();
        entry.expires_at = now + self.ttl;
        Some(entry.session.clone())
    }

    pub async fn update_context(&self, session_id: &str, context: Value) -> Option<ConversationSession> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let entry = entries.get_mut(session_id)?;
        if entry.expires_at <= now {
            entries.remove(session_id);
            return None;
        }
        entry.session.context = context;
        entry.session.last_activity = Utc::now();
        entry.expires_at = now + self.ttl;
        Some(entry.session.clone())
    }

    pub async fn delete(&self, session_id: &str) {
        let mut entries = self.entries.lock().await;
        entries.remove(session_id);
    }

    /// Keys for sessions belonging to `user` that have not yet expired.
    pub async fn keys_for_user(&self, user: &str) -> Vec<String> {
        let entries = self.entries.lock().await;
        let now = Instant::now();
        entries
            .iter()
            .filter(|(_, e)| e.expires_at > now && e.session.user == user)
            .map(|(k, _)| k.clone())
            .collect()
    }

    /// Sweeps expired entries. Call periodically; cheap no-op when nothing
    /// has expired.
    pub async fn sweep_expired(&self) -> usize {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        let before = entries.len();
        entries.retain(|_, e| e.expires_at > now);
        let removed = before - entries.len();
        if removed > 0 {
            debug!(removed, "swept expired conversation sessions");
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn untouched_session_expires_after_ttl() {
        let store = SessionStore::new(Duration::from_secs(30 * 60));
        store.create("s1", 1, "alice").await;

        tokio::time::advance(Duration::from_secs(30 * 60 + 1)).await;
        assert!(store.get("s1").await.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn read_refreshes_the_ttl() {
        let store = SessionStore::new(Duration::from_secs(30 * 60));
        store.create("s1", 1, "alice").await;

        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert!(store.get("s1").await.is_some());

        // Another 29 minutes is within the refreshed window.
        tokio::time::advance(Duration::from_secs(29 * 60)).await;
        assert!(store.get("s1").await.is_some());
    }

    #[tokio::test]
    async fn history_is_bounded_and_drops_oldest() {
        let store = SessionStore::default();
        store.create("s1", 1, "alice").await;
        for i in 0..25 {
            store.append_message("s1", "user", &format!("message {i}")).await;
        }
        let session = store.get("s1").await.unwrap();
        assert_eq!(session.history.len(), 20);
        assert_eq!(session.history[0].content, "message 5");
        assert_eq!(session.history[19].content, "message 24");
    }

    #[tokio::test]
    async fn keys_are_scoped_to_user() {
        let store = SessionStore::default();
        store.create("s1", 1, "alice").await;
        store.create("s2", 2, "alice").await;
        store.create("s3", 3, "bob").await;

        let mut keys = store.keys_for_user("alice").await;
        keys.sort();
        assert_eq!(keys, vec!["s1", "s2"]);
    }

    #[tokio::test]
    async fn delete_removes_the_session() {
        let store = SessionStore::default();
        store.create("s1", 1, "alice").await;
        store.delete("s1").await;
        assert!(store.get("s1").await.is_none());
    }

    #[tokio::test]
    async fn update_writes_back_full_record() {
        let store = SessionStore::default();
        let mut session = store.create("s1", 1, "alice").await;
        session.context = serde_json::json!({ "pr": 42 });

        let updated = store.update(session).await.unwrap();
        assert_eq!(updated.context["pr"], 42);
        assert_eq!(store.get("s1").await.unwrap().context["pr"], 42);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let store = SessionStore::new(Duration::from_secs(60));
        store.create("old", 1, "alice").await;
        tokio::time::advance(Duration::from_secs(45)).await;
        store.create("fresh", 2, "alice").await;
        tokio::time::advance(Duration::from_secs(30)).await;

        assert_eq!(store.sweep_expired().await, 1);
        assert!(store.get("old").await.is_none());
        assert!(store.get("fresh").await.is_some());
    }
}
