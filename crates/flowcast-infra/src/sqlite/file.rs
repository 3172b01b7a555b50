//! SQLite file binding repository implementation.

use chrono::{DateTime, Utc};
use flowcast_core::repository::file::FileBindingRepository;
use flowcast_types::chat::{ChatFile, FileSource};
use flowcast_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

/// SQLite-backed implementation of `FileBindingRepository`.
pub struct SqliteFileBindingRepository {
    pool: DatabasePool,
}

impl SqliteFileBindingRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Record a file attached to a chat. Returns the new file id.
    pub async fn add_file(
        &self,
        uid: &str,
        chat_id: i64,
        url: &str,
        source: FileSource,
        param_name: Option<&str>,
        created_at: DateTime<Utc>,
    ) -> Result<i64, RepositoryError> {
        let row = sqlx::query(
            r#"INSERT INTO chat_files (uid, chat_id, url, source, param_name, created_at)
               VALUES (?, ?, ?, ?, ?, ?)
               RETURNING id"#,
        )
        .bind(uid)
        .bind(chat_id)
        .bind(url)
        .bind(source.to_string())
        .bind(param_name)
        .bind(format_datetime(&created_at))
        .fetch_one(&self.pool.writer)
        .await
        .map_err(query_error)?;

        row.try_get("id").map_err(query_error)
    }

    /// Files consumed by a turn.
    pub async fn bound_files(&self, req_id: i64) -> Result<Vec<ChatFile>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT id, uid, chat_id, url, source, param_name, req_id, created_at
               FROM chat_files WHERE req_id = ? ORDER BY id ASC"#,
        )
        .bind(req_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|r| FileRow::from_row(r).map_err(query_error)?.into_file())
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct FileRow {
    id: i64,
    uid: String,
    chat_id: i64,
    url: String,
    source: String,
    param_name: Option<String>,
    req_id: Option<i64>,
    created_at: String,
}

impl FileRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            uid: row.try_get("uid")?,
            chat_id: row.try_get("chat_id")?,
            url: row.try_get("url")?,
            source: row.try_get("source")?,
            param_name: row.try_get("param_name")?,
            req_id: row.try_get("req_id")?,
            created_at: row.try_get("created_at")?,
        })
    }

    fn into_file(self) -> Result<ChatFile, RepositoryError> {
        Ok(ChatFile {
            id: self.id,
            uid: self.uid,
            chat_id: self.chat_id,
            url: self.url,
            source: self.source.parse().map_err(RepositoryError::Query)?,
            param_name: self.param_name,
            req_id: self.req_id,
            created_at: parse_datetime(&self.created_at)?,
        })
    }
}

impl FileBindingRepository for SqliteFileBindingRepository {
    async fn unbound_files(&self, uid: &str, chat_id: i64) -> Result<Vec<ChatFile>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT id, uid, chat_id, url, source, param_name, req_id, created_at
               FROM chat_files
               WHERE uid = ? AND chat_id = ? AND req_id IS NULL
               ORDER BY created_at ASC, id ASC"#,
        )
        .bind(uid)
        .bind(chat_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        rows.iter()
            .map(|r| FileRow::from_row(r).map_err(query_error)?.into_file())
            .collect()
    }

    async fn bind_files(&self, file_ids: &[i64], req_id: i64) -> Result<(), RepositoryError> {
        if file_ids.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.writer.begin().await.map_err(query_error)?;
        for id in file_ids {
            sqlx::query("UPDATE chat_files SET req_id = ? WHERE id = ? AND req_id IS NULL")
                .bind(req_id)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(query_error)?;
        }
        tx.commit().await.map_err(query_error)?;
        Ok(())
    }
}
