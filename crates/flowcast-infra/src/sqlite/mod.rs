//! SQLite storage layer.
//!
//! Repository, session store and lock backend implementations backed by
//! SQLite with WAL mode and split read/write connection pools.

pub mod bot;
pub mod chat;
pub mod file;
pub mod lock;
pub mod pool;
pub mod session;

use chrono::{DateTime, Utc};
use flowcast_types::error::RepositoryError;

pub(crate) fn parse_datetime(s: &str) -> Result<DateTime<Utc>, RepositoryError> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| RepositoryError::Query(format!("invalid datetime: {e}")))
}

pub(crate) fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339()
}

pub(crate) fn query_error(e: sqlx::Error) -> RepositoryError {
    RepositoryError::Query(e.to_string())
}

/// Current time as epoch milliseconds, the unit of every `expires_at` column.
pub(crate) fn now_millis() -> i64 {
    Utc::now().timestamp_millis()
}
