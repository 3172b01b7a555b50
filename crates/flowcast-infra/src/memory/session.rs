//! In-memory session store.

use std::time::Duration;

use chrono::Utc;
use dashmap::DashMap;
use flowcast_core::session::store::SessionStore;
use flowcast_types::error::RepositoryError;
use flowcast_types::workflow::{PauseMarker, ValueKind};
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct Entry {
    marker: PauseMarker,
    deadline: Instant,
}

/// `SessionStore` backed by a concurrent map. Markers do not survive a
/// restart and are not shared between instances.
#[derive(Debug, Default)]
pub struct InMemorySessionStore {
    markers: DashMap<(String, i64), Entry>,
}

impl InMemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored markers, expired ones included until the next read
    /// or write.
    pub fn len(&self) -> usize {
        self.markers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.markers.is_empty()
    }
}

impl SessionStore for InMemorySessionStore {
    async fn put(
        &self,
        uid: &str,
        chat_id: i64,
        event_id: &str,
        value_kind: ValueKind,
        ttl: Duration,
    ) -> Result<(), RepositoryError> {
        let expires_at = Utc::now()
            + chrono::Duration::from_std(ttl)
                .map_err(|e| RepositoryError::Query(format!("invalid ttl: {e}")))?;
        let entry = Entry {
            marker: PauseMarker {
                uid: uid.to_string(),
                chat_id,
                event_id: event_id.to_string(),
                value_kind,
                expires_at,
            },
            deadline: Instant::now() + ttl,
        };
        let now = Instant::now();
        self.markers.retain(|_, entry| entry.deadline > now);
        self.markers.insert((uid.to_string(), chat_id), entry);
        Ok(())
    }

    async fn get(&self, uid: &str, chat_id: i64) -> Result<Option<PauseMarker>, RepositoryError> {
        let key = (uid.to_string(), chat_id);
        match self.markers.get(&key) {
            None => return Ok(None),
            Some(entry) if entry.deadline > Instant::now() => {
                return Ok(Some(entry.marker.clone()));
            }
            Some(_) => {}
        }
        self.markers
            .remove_if(&key, |_, entry| entry.deadline <= Instant::now());
        Ok(None)
    }

    async fn clear(&self, uid: &str, chat_id: i64) -> Result<(), RepositoryError> {
        self.markers.remove(&(uid.to_string(), chat_id));
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_put_get_clear() {
        let store = InMemorySessionStore::new();
        store
            .put("u1", 7, "evt-1", ValueKind::Option, Duration::from_secs(60))
            .await
            .unwrap();

        let marker = store.get("u1", 7).await.unwrap().unwrap();
        assert_eq!(marker.event_id, "evt-1");
        assert_eq!(marker.value_kind, ValueKind::Option);
        assert!(store.get("u2", 7).await.unwrap().is_none());

        store.clear("u1", 7).await.unwrap();
        assert!(store.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_marker_expires_after_ttl() {
        let store = InMemorySessionStore::new();
        store
            .put("u1", 7, "evt-1", ValueKind::Direct, Duration::from_secs(600))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(599)).await;
        assert!(store.get("u1", 7).await.unwrap().is_some());

        tokio::time::advance(Duration::from_secs(2)).await;
        assert!(store.get("u1", 7).await.unwrap().is_none());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_put_replaces_marker() {
        let store = InMemorySessionStore::new();
        store
            .put("u1", 7, "evt-1", ValueKind::Option, Duration::from_secs(60))
            .await
            .unwrap();
        store
            .put("u1", 7, "evt-2", ValueKind::Direct, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert_eq!(store.get("u1", 7).await.unwrap().unwrap().event_id, "evt-2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_put_drops_expired_markers_of_other_chats() {
        let store = InMemorySessionStore::new();
        store
            .put("u1", 7, "evt-1", ValueKind::Direct, Duration::from_secs(1))
            .await
            .unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;
        store
            .put("u2", 9, "evt-2", ValueKind::Option, Duration::from_secs(60))
            .await
            .unwrap();

        assert_eq!(store.len(), 1);
        assert!(store.get("u2", 9).await.unwrap().is_some());
    }
}
