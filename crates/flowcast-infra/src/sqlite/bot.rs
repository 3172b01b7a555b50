//! SQLite workflow bot repository implementation.
//!
//! Implements `WorkflowBotRepository` from `flowcast-core`. Bot bindings and
//! market listings are written by the bot service; this engine only reads
//! them and maintains the per-workflow publish flag.

use chrono::Utc;
use flowcast_core::repository::bot::WorkflowBotRepository;
use flowcast_types::error::RepositoryError;
use flowcast_types::workflow::{MarketListing, ShelfStatus, WorkflowBot};
use sqlx::Row;

use super::pool::DatabasePool;
use super::{format_datetime, query_error};

/// SQLite-backed implementation of `WorkflowBotRepository`.
pub struct SqliteWorkflowBotRepository {
    pool: DatabasePool,
}

impl SqliteWorkflowBotRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }

    /// Insert or replace a bot's workflow binding.
    pub async fn upsert_bot(&self, bot: &WorkflowBot) -> Result<(), RepositoryError> {
        let now = format_datetime(&Utc::now());
        sqlx::query(
            r#"INSERT INTO workflow_bots (bot_id, flow_id, extra_inputs, extra_inputs_config, created_at, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)
               ON CONFLICT (bot_id) DO UPDATE SET
                   flow_id = excluded.flow_id,
                   extra_inputs = excluded.extra_inputs,
                   extra_inputs_config = excluded.extra_inputs_config,
                   updated_at = excluded.updated_at"#,
        )
        .bind(bot.bot_id)
        .bind(&bot.flow_id)
        .bind(&bot.extra_inputs)
        .bind(&bot.extra_inputs_config)
        .bind(&now)
        .bind(&now)
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    /// Set the market status of a bot.
    pub async fn set_listing(
        &self,
        bot_id: i64,
        status: ShelfStatus,
    ) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO market_listings (bot_id, status, updated_at) VALUES (?, ?, ?)
               ON CONFLICT (bot_id) DO UPDATE SET status = excluded.status, updated_at = excluded.updated_at"#,
        )
        .bind(bot_id)
        .bind(status.to_string())
        .bind(format_datetime(&Utc::now()))
        .execute(&self.pool.writer)
        .await
        .map_err(query_error)?;
        Ok(())
    }

    /// Current publish flag of a workflow. `None` before its first run.
    pub async fn can_publish(&self, flow_id: &str) -> Result<Option<bool>, RepositoryError> {
        let row = sqlx::query("SELECT can_publish FROM workflows WHERE flow_id = ?")
            .bind(flow_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        row.map(|r| r.try_get::<i64, _>("can_publish").map(|v| v != 0))
            .transpose()
            .map_err(query_error)
    }
}

// ---------------------------------------------------------------------------
// Private Row types for SQLite-to-domain mapping
// ---------------------------------------------------------------------------

struct BotRow {
    bot_id: i64,
    flow_id: String,
    extra_inputs: Option<String>,
    extra_inputs_config: Option<String>,
}

impl BotRow {
    fn from_row(row: &sqlx::sqlite::SqliteRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            bot_id: row.try_get("bot_id")?,
            flow_id: row.try_get("flow_id")?,
            extra_inputs: row.try_get("extra_inputs")?,
            extra_inputs_config: row.try_get("extra_inputs_config")?,
        })
    }

    fn into_bot(self) -> WorkflowBot {
        WorkflowBot {
            bot_id: self.bot_id,
            flow_id: self.flow_id,
            extra_inputs: self.extra_inputs,
            extra_inputs_config: self.extra_inputs_config,
        }
    }
}

impl WorkflowBotRepository for SqliteWorkflowBotRepository {
    async fn workflow_bot(&self, bot_id: i64) -> Result<Option<WorkflowBot>, RepositoryError> {
        let row = sqlx::query(
            "SELECT bot_id, flow_id, extra_inputs, extra_inputs_config FROM workflow_bots WHERE bot_id = ?",
        )
        .bind(bot_id)
        .fetch_optional(&self.pool.reader)
        .await
        .map_err(query_error)?;

        match row {
            Some(row) => {
                let bot_row = BotRow::from_row(&row).map_err(query_error)?;
                Ok(Some(bot_row.into_bot()))
            }
            None => Ok(None),
        }
    }

    async fn market_listing(&self, bot_id: i64) -> Result<Option<MarketListing>, RepositoryError> {
        let row = sqlx::query("SELECT bot_id, status FROM market_listings WHERE bot_id = ?")
            .bind(bot_id)
            .fetch_optional(&self.pool.reader)
            .await
            .map_err(query_error)?;

        let Some(row) = row else {
            return Ok(None);
        };
        let status: String = row.try_get("status").map_err(query_error)?;
        let status = status
            .parse::<ShelfStatus>()
            .map_err(RepositoryError::Query)?;
        Ok(Some(MarketListing {
            bot_id: row.try_get("bot_id").map_err(query_error)?,
            status,
        }))
    }

    async fn set_can_publish(&self, flow_id: &str, can_publish: bool) -> Result<(), RepositoryError> {
        sqlx::query(
            r#"INSERT INTO workflows (flow_id, can_publish, updated_at) VALUES (?, ?, ?)
               ON CONFLICT (flow_id) DO UPDATE SET can_publish = excluded.can_publish, updated_at = excluded.updated_at"#,
        )
        .bind(flow_id)
        .bind(can_publish as i64)
        .bind(format_datetime(&Utc::now()))
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

    fn bot(bot_id: i64, flow_id: &str) -> WorkflowBot {
        WorkflowBot {
            bot_id,
            flow_id: flow_id.to_string(),
            extra_inputs: Some(r#"{"file":"pdf"}"#.to_string()),
            extra_inputs_config: None,
        }
    }

    #[tokio::test]
    async fn test_workflow_bot_roundtrip() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowBotRepository::new(pool);

        repo.upsert_bot(&bot(1, "f-1")).await.unwrap();
        let loaded = repo.workflow_bot(1).await.unwrap().unwrap();
        assert_eq!(loaded, bot(1, "f-1"));

        repo.upsert_bot(&bot(1, "f-2")).await.unwrap();
        assert_eq!(repo.workflow_bot(1).await.unwrap().unwrap().flow_id, "f-2");
        assert!(repo.workflow_bot(2).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_market_listing() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowBotRepository::new(pool);
        repo.upsert_bot(&bot(1, "f-1")).await.unwrap();

        assert!(repo.market_listing(1).await.unwrap().is_none());

        repo.set_listing(1, ShelfStatus::OnShelf).await.unwrap();
        let listing = repo.market_listing(1).await.unwrap().unwrap();
        assert_eq!(listing.status, ShelfStatus::OnShelf);

        repo.set_listing(1, ShelfStatus::OffShelf).await.unwrap();
        let listing = repo.market_listing(1).await.unwrap().unwrap();
        assert_eq!(listing.status, ShelfStatus::OffShelf);
    }

    #[tokio::test]
    async fn test_set_can_publish() {
        let (pool, _dir) = test_pool().await;
        let repo = SqliteWorkflowBotRepository::new(pool);

        assert_eq!(repo.can_publish("f-1").await.unwrap(), None);
        repo.set_can_publish("f-1", true).await.unwrap();
        assert_eq!(repo.can_publish("f-1").await.unwrap(), Some(true));
        repo.set_can_publish("f-1", false).await.unwrap();
        assert_eq!(repo.can_publish("f-1").await.unwrap(), Some(false));
    }
}
