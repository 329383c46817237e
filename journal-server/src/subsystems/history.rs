//! History store - per-user, append-only, in-memory chat log
//!
//! Created once at process start and handed to every handler through
//! `HttpState`. Nothing is persisted; a restart clears all history.

use std::collections::HashMap;
use std::sync::Arc;

use journal_core::Message;
use tokio::sync::RwLock;

#[derive(Clone, Default)]
pub struct HistoryStore {
    entries: Arc<RwLock<HashMap<String, Vec<Message>>>>,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to a user's history, creating it on first write. Returns the
    /// entry's position in that history.
    pub async fn append(&self, user_id: &str, message: Message) -> usize {
        let mut entries = self.entries.write().await;
        let log = entries.entry(user_id.to_string()).or_default();
        log.push(message);
        log.len() - 1
    }

    /// Full history for a user; empty for unknown identifiers.
    pub async fn read(&self, user_id: &str) -> Vec<Message> {
        self.entries
            .read()
            .await
            .get(user_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Number of users with at least one entry.
    pub async fn user_count(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_read_unknown_user_is_empty() {
        let store = HistoryStore::new();
        assert!(store.read("nobody").await.is_empty());
        assert_eq!(store.user_count().await, 0);
    }

    #[tokio::test]
    async fn test_append_preserves_insertion_order_per_user() {
        let store = HistoryStore::new();
        let id = Uuid::new_v4();
        assert_eq!(store.append("u1", Message::user(id, "first")).await, 0);
        assert_eq!(store.append("u2", Message::user(Uuid::new_v4(), "other")).await, 0);
        assert_eq!(store.append("u1", Message::assistant(id, "second")).await, 1);

        let history = store.read("u1").await;
        let contents: Vec<&str> = history.iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["first", "second"]);
        assert_eq!(store.read("u2").await.len(), 1);
        assert_eq!(store.user_count().await, 2);
    }

    #[tokio::test]
    async fn test_clones_share_the_same_log() {
        let store = HistoryStore::new();
        let handle = store.clone();
        handle.append("u1", Message::user(Uuid::new_v4(), "shared")).await;
        assert_eq!(store.read("u1").await.len(), 1);
    }
}
