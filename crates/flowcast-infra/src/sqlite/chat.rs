//! SQLite chat record repository implementation.
//!
//! Implements `ChatRecordRepository` from `flowcast-core`. Turns are
//! append-only; each turn has at most one answer, replaced in place when
//! the stream saves it again.

use chrono::Utc;
use flowcast_core::repository::chat::ChatRecordRepository;
use flowcast_types::chat::{AnswerKind, AnswerRecord, ChatTurn, HistoryMessage, NewChatTurn};
use flowcast_types::error::RepositoryError;
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, parse_datetime, query_error};

/// SQLite-backed implementation of `ChatRecordRepository`.
pub struct SqliteChatRecordRepository {
    pool: DatabasePool,
}

impl SqliteChatRecordRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Stored answer of a turn.
    pub async fn answer(&self, req_id: i64) -> Result<Option<AnswerRecord>, RepositoryError> {
        let row = sqlx::query(
            "SELECT req_id, uid, chat_id, content, reasoning, sid, kind, complete FROM chat_answers WHERE req_id = ?",
        )
        .bind(req_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let answer_row = AnswerRow::from_row(&row).map_err(query_error)?;
                Ok(Some(answer_row.into_answer()?))
            }
            None => Ok(None),
        }
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct AnswerRow {
    req_id: i64,
    uid: String,
    chat_id: i64,
    content: String,
    reasoning: String,
    sid: Option<String>,
    kind: String,
    complete: i64,
}

impl AnswerRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            req_id: row.try_get("req_id")?,
            uid: row.try_get("uid")?,
            chat_id: row.try_get("chat_id")?,
            content: row.try_get("content")?,
            reasoning: row.try_get("reasoning")?,
            sid: row.try_get("sid")?,
            kind: row.try_get("kind")?,
            complete: row.try_get("complete")?,
        })
    }

    fn into_answer(self) -> Result<AnswerRecord, RepositoryError> {
        let kind = match self.kind.as_str() {
            "text" => AnswerKind::Text,
            "interrupt" => AnswerKind::Interrupt,
            other => return Err(RepositoryError::Query(format!("invalid answer kind: '{other}'"))),
        };
        Ok(AnswerRecord {
            req_id: self.req_id,
            uid: self.uid,
            chat_id: self.chat_id,
            content: self.content,
            reasoning: self.reasoning,
            sid: self.sid,
            kind,
            complete: self.complete != 0,
        })
    }
}

impl ChatRecordRepository for SqliteChatRecordRepository {
    async fn create_turn(&self, turn: &NewChatTurn) -> Result<ChatTurn, RepositoryError> {
        let created_at = Utc::now();
        let row = sqlx::query(
            r#"INSERT INTO chat_turns (uid, chat_id, ask_text, file_url, created_at)
               VALUES (?, ?, ?, ?, ?)
               RETURNING req_id, created_at"#,
        )
        .bind(&turn.uid)
        .bind(turn.chat_id)
        .bind(&turn.ask_text)
        .bind(&turn.file_url)
        .bind(format_datetime(&created_at))
        .fetch_one(&self.pool.writer)
        .await
        .map_err(query_error)?;

        let req_id: i64 = row.try_get("req_id").map_err(query_error)?;
        let created_at: String = row.try_get("created_at").map_err(query_error)?;

        Ok(ChatTurn {
            uid: turn.uid.clone(),
            chat_id: turn.chat_id,
            req_id,
            ask_text: turn.ask_text.clone(),
            file_url: turn.file_url.clone(),
            created_at: parse_datetime(&created_at)?,
        })
    }

    async fn history(
        &self,
        uid: &str,
        chat_id: i64,
        before_req_id: Option<i64>,
    ) -> Result<Vec<HistoryMessage>, RepositoryError> {
        let rows = sqlx::query(
            r#"SELECT t.ask_text, a.content AS answer
               FROM chat_turns t
               LEFT JOIN chat_answers a ON a.req_id = t.req_id
               WHERE t.uid = ? AND t.chat_id = ? AND (? IS NULL OR t.req_id < ?)
               ORDER BY t.req_id ASC"#,
        )
        .bind(uid)
        .bind(chat_id)
        .bind(before_req_id)
        .bind(before_req_id)
        .fetch_all(&self.pool.reader)
        .await
        .map_err(query_error)?;

        let mut messages = Vec::with_capacity(rows.len() * 2);
        for row in rows {
            let ask: String = row.try_get("ask_text").map_err(query_error)?;
            let answer: Option<String> = row.try_get("answer").map_err(query_error)?;
            messages.push(HistoryMessage::text("user", &ask));
            if let Some(answer) = answer {
                messages.push(HistoryMessage::text("assistant", &answer));
            }
        }
        Ok(messages)
    }

    async fn save_answer(&self, answer: &AnswerRecord) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO chat_answers (req_id, uid, chat_id, content, reasoning, sid, kind, complete, updated_at)
               VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
               ON CONFLICT (req_id) DO UPDATE SET
                   content = excluded.content,
                   reasoning = excluded.reasoning,
                   sid = excluded.sid,
                   kind = excluded.kind,
                   complete = excluded.complete,
                   updated_at = excluded.updated_at"#,
        )
        .bind(answer.req_id)
        .bind(&answer.uid)
        .bind(answer.chat_id)
        .bind(&answer.content)
        .bind(&answer.reasoning)
        .bind(&answer.sid)
        .bind(answer.kind.to_string())
        .bind(answer.complete as i64)
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use flowcast_types::chat::MessageContent;

    use super::*;
    use crate::sqlite::pool::test_pool;

    fn new_turn(uid: &str, chat_id: i64, ask: &str) -> NewChatTurn {
        NewChatTurn {
            uid: uid.to_string(),
            chat_id,
            ask_text: ask.to_string(),
            file_url: None,
        }
    }

    fn answer(turn: &ChatTurn, content: &str) -> AnswerRecord {
        AnswerRecord {
            req_id: turn.req_id,
            uid: turn.uid.clone(),
            chat_id: turn.chat_id,
            content: content.to_string(),
            reasoning: String::new(),
            sid: Some("sid-1".to_string()),
            kind: AnswerKind::Text,
            complete: true,
        }
    }

    fn texts(history: &[HistoryMessage]) -> Vec<(String, String)> {
        history
            .iter()
            .map(|m| (m.role.clone(), m.content.text()))
            .collect()
    }

    #[tokio::test]
    async fn test_create_turn_assigns_increasing_req_ids() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteChatRecordRepository::new(pool);

        let first = repo.create_turn(&new_turn("u1", 7, "hello")).await.unwrap();
        let second = repo.create_turn(&new_turn("u1", 7, "again")).await.unwrap();
        assert!(second.req_id > first.req_id);
        assert_eq!(first.ask_text, "hello");
        assert_eq!(first.chat_id, 7);
    }

    #[tokio::test]
    async fn test_history_pairs_turns_with_answers() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteChatRecordRepository::new(pool);

        let t1 = repo.create_turn(&new_turn("u1", 7, "q1")).await.unwrap();
        repo.save_answer(&answer(&t1, "a1")).await.unwrap();
        let t2 = repo.create_turn(&new_turn("u1", 7, "q2")).await.unwrap();
        repo.create_turn(&new_turn("u2", 7, "other user")).await.unwrap();

        let history = repo.history("u1", 7, None).await.unwrap();
        assert_eq!(
            texts(&history),
            vec![
                ("user".to_string(), "q1".to_string()),
                ("assistant".to_string(), "a1".to_string()),
                ("user".to_string(), "q2".to_string()),
            ]
        );
        assert!(matches!(history[0].content, MessageContent::Text(_)));

        let before = repo.history("u1", 7, Some(t2.req_id)).await.unwrap();
        assert_eq!(before.len(), 2);
    }

    #[tokio::test]
    async fn test_save_answer_replaces_previous() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteChatRecordRepository::new(pool);
        let turn = repo.create_turn(&new_turn("u1", 7, "q")).await.unwrap();

        let mut partial = answer(&turn, "half");
        partial.complete = false;
        repo.save_answer(&partial).await.unwrap();
        repo.save_answer(&answer(&turn, "whole")).await.unwrap();

        let stored = repo.answer(turn.req_id).await.unwrap().unwrap();
        assert_eq!(stored.content, "whole");
        assert!(stored.complete);
        assert_eq!(stored.kind, AnswerKind::Text);
    }

    #[tokio::test]
    async fn test_answer_requires_existing_turn() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteChatRecordRepository::new(pool);
        let orphan = AnswerRecord {
            req_id: 999,
            uid: "u1".to_string(),
            chat_id: 7,
            content: "x".to_string(),
            reasoning: String::new(),
            sid: None,
            kind: AnswerKind::Text,
            complete: true,
        };
        assert!(repo.save_answer(&orphan).await.is_err());
    }
}
