//! SQLite session store for pause markers.
//!
//! Expiry is stored as epoch milliseconds. Reads ignore expired rows;
//! every `put` purges all expired rows in the same transaction.

use std::time::Duration;

use chrono::{DateTime, Utc};
use flowcast_core::session::store::SessionStore;
use flowcast_types::error::RepositoryError;
use flowcast_types::workflow::{PauseMarker, ValueKind};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{now_millis, query_error};

/// SQLite-backed implementation of `SessionStore`.
pub struct SqliteSessionStore {
    pool: DatabasePool,
}

impl SqliteSessionStore {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Delete every expired marker. Returns the number removed.
    pub async fn purge_expired(&self) -> Result<u64, RepositoryError> {
        let result = sqlx::query("DELETE FROM pause_markers WHERE expires_at <= ?")
            .bind(now_millis())
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(result.rows_affected())
    }
}

fn parse_value_kind(tag: &str) -> Result<ValueKind, RepositoryError> {
    match tag {
        "OPTION" => Ok(ValueKind::Option),
        "DIRECT" => Ok(ValueKind::Direct),
        other => Err(RepositoryError::Query(format!("invalid value kind: '{other}'"))),
    }
}

impl SessionStore for SqliteSessionStore {
    async fn put(
        &self,
        uid: &str,
        chat_id: i64,
        event_id: &str,
        value_kind: ValueKind,
        ttl: Duration,
    ) -> Result<(), RepositoryError> {
        let now = now_millis();
        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;

        sqlx::query("DELETE FROM pause_markers WHERE expires_at <= ?")
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(query_error)?;

        sqlx::query(
            r#"INSERT INTO pause_markers (uid, chat_id, event_id, value_kind, expires_at)
               VALUES (?, ?, ?, ?, ?)
               ON CONFLICT (uid, chat_id) DO UPDATE SET
                   event_id = excluded.event_id,
                   value_kind = excluded.value_kind,
                   expires_at = excluded.expires_at"#,
        )
        .bind(uid)
        .bind(chat_id)
        .bind(event_id)
        .bind(value_kind.as_tag())
        .bind(now + ttl.as_millis() as i64)
        .execute(&mut *tx)
        .await
        .map_err(query_error)?;

        tx.commit().await.map_err(query_error)?;
        Ok(())
    }

    async fn get(&self, uid: &str, chat_id: i64) -> Result<Option<PauseMarker>, RepositoryError> {
        let row = sqlx::query(
            r#"SELECT event_id, value_kind, expires_at FROM pause_markers
               WHERE uid = ? AND chat_id = ? AND expires_at > ?"#,
        )
        .bind(uid)
        .bind(chat_id)
        .bind(now_millis())
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value_kind: String = row.try_get("value_kind").map_err(query_error)?;
        let expires_at: i64 = row.try_get("expires_at").map_err(query_error)?;
        let expires_at = DateTime::<Utc>::from_timestamp_millis(expires_at)
            .ok_or_else(|| RepositoryError::Query(format!("invalid expiry: {expires_at}")))?;

        Ok(Some(PauseMarker {
            uid: uid.to_string(),
            chat_id,
            event_id: row.try_get("event_id").map_err(query_error)?,
            value_kind: parse_value_kind(&value_kind)?,
            expires_at,
        }))
    }

    async fn clear(&self, uid: &str, chat_id: i64) -> Result<(), RepositoryError> {
        sqlx::query("DELETE FROM pause_markers WHERE uid = ? AND chat_id = ?")
            .bind(uid)
            .bind(chat_id)
            .execute(&self.pool.writer)
            .await
            .map_err(query_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;

    #[tokio::test]
    async fn test_put_get_clear() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteSessionStore::new(pool);

        store
            .put("u1", 7, "evt-1", ValueKind::Option, Duration::from_secs(600))
            .await
            .unwrap();
        let marker = store.get("u1", 7).await.unwrap().unwrap();
        assert_eq!(marker.event_id, "evt-1");
        assert_eq!(marker.value_kind, ValueKind::Option);
        assert!(marker.expires_at > Utc::now());
        assert!(store.get("u1", 8).await.unwrap().is_none());

        store.clear("u1", 7).await.unwrap();
        assert!(store.get("u1", 7).await.unwrap().is_none());
        // Clearing again is fine.
        store.clear("u1", 7).await.unwrap();
    }

    #[tokio::test]
    async fn test_put_overwrites_previous_marker() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteSessionStore::new(pool);

        store
            .put("u1", 7, "evt-1", ValueKind::Option, Duration::from_secs(600))
            .await
            .unwrap();
        store
            .put("u1", 7, "evt-2", ValueKind::Direct, Duration::from_secs(600))
            .await
            .unwrap();

        let marker = store.get("u1", 7).await.unwrap().unwrap();
        assert_eq!(marker.event_id, "evt-2");
        assert_eq!(marker.value_kind, ValueKind::Direct);
    }

    #[tokio::test]
    async fn test_expired_marker_reads_absent() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteSessionStore::new(pool);

        store
            .put("u1", 7, "evt-1", ValueKind::Direct, Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(store.get("u1", 7).await.unwrap().is_none());
        assert_eq!(store.purge_expired().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_put_purges_expired_markers_of_other_chats() {
        let (pool, _dir) = test_pool().await;
        let store = SqliteSessionStore::new(pool.clone());

        store
            .put("u1", 7, "evt-1", ValueKind::Direct, Duration::from_millis(1))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        store
            .put("u2", 9, "evt-2", ValueKind::Option, Duration::from_secs(600))
            .await
            .unwrap();

        let rows: Vec<(String, i64)> = sqlx::query_as("SELECT uid, chat_id FROM pause_markers")
            .fetch_all(&pool.reader)
            .await
            .unwrap();
        assert_eq!(rows, vec![("u2".to_string(), 9)]);
    }
}
