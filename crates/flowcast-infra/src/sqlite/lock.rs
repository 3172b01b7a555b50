//! Lease-based lock backend stored in SQLite.
//!
//! Every process sharing the database file sees the same locks. A holder
//! is a row in `distributed_locks`; `Fair` requests additionally take a
//! ticket in `lock_waiters` and are only granted while holding the lowest
//! live ticket for their key. Expired holders and waiters are purged on
//! every grant attempt, so a crashed process never blocks a key for longer
//! than its lease.

use std::time::Duration;

use flowcast_core::lock::{LockBackend, LockLease};
use flowcast_types::error::LockError;
use flowcast_types::lock::LockFlavor;
use sqlx::Row;
use tokio::time::Instant;
use tracing::debug;

use super::now_millis;
use super::pool::DatabasePool;

const POLL_INTERVAL: Duration = Duration::from_millis(25);

/// Extra lifetime of a waiter ticket beyond its wait, covering the last poll.
const TICKET_GRACE: Duration = Duration::from_secs(1);

/// SQLite-backed implementation of `LockBackend`.
pub struct SqliteLockBackend {
    pool: DatabasePool,
    poll_interval: Duration,
}

impl SqliteLockBackend {
    pub fn new(pool: DatabasePool) -> Self {
        Self {
            pool,
            poll_interval: POLL_INTERVAL,
        }
    }

    /// Number of live holders of `key`.
    pub async fn holders(&self, key: &str) -> Result<usize, LockError> {
        let row = sqlx::query(
            r#"SELECT COUNT(*) AS n FROM distributed_locks
               WHERE lock_key = ? AND (expires_at IS NULL OR expires_at > ?)"#,
        )
        .bind(key)
        .bind(now_millis())
        .fetch_one(&self.pool.reader)
        .await
        .map_err(backend_error)?;
        let n: i64 = row.try_get("n").map_err(backend_error)?;
        Ok(n as usize)
    }

    async fn take_ticket(&self, key: &str, token: &str, wait: Duration) -> Result<i64, LockError> {
        let expires_at = now_millis() + (wait + TICKET_GRACE).as_millis() as i64;
        let row = sqlx::query(
            "INSERT INTO lock_waiters (lock_key, token, expires_at) VALUES (?, ?, ?) RETURNING ticket",
        )
        .bind(key)
        .bind(token)
        .bind(expires_at)
        .fetch_one(&self.pool.writer)
        .await
        .map_err(backend_error)?;
        row.try_get("ticket").map_err(backend_error)
    }

    async fn drop_ticket(&self, ticket: i64) -> Result<(), LockError> {
        sqlx::query("DELETE FROM lock_waiters WHERE ticket = ?")
            .bind(ticket)
            .execute(&self.pool.writer)
            .await
            .map_err(backend_error)?;
        Ok(())
    }

    /// One grant attempt inside a write transaction.
    async fn try_grant(
        &self,
        key: &str,
        flavor: LockFlavor,
        token: &str,
        ticket: Option<i64>,
        lease: Duration,
    ) -> Result<bool, LockError> {
        let now = now_millis();
        let mut tx = self.pool.writer.begin().await.map_err(backend_error)?;

        sqlx::query(
            "DELETE FROM distributed_locks WHERE lock_key = ? AND expires_at IS NOT NULL AND expires_at <= ?",
        )
        .bind(key)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(backend_error)?;
        sqlx::query("DELETE FROM lock_waiters WHERE lock_key = ? AND expires_at <= ?")
            .bind(key)
            .bind(now)
            .execute(&mut *tx)
            .await
            .map_err(backend_error)?;

        if let Some(ticket) = ticket {
            let head: Option<i64> =
                sqlx::query("SELECT MIN(ticket) AS head FROM lock_waiters WHERE lock_key = ?")
                    .bind(key)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(backend_error)?
                    .try_get("head")
                    .map_err(backend_error)?;
            if head.is_some_and(|h| h != ticket) {
                tx.rollback().await.map_err(backend_error)?;
                return Ok(false);
            }
        }

        let rows = sqlx::query("SELECT flavor FROM distributed_locks WHERE lock_key = ?")
            .bind(key)
            .fetch_all(&mut *tx)
            .await
            .map_err(backend_error)?;
        let mut compatible = true;
        for row in &rows {
            let held: String = row.try_get("flavor").map_err(backend_error)?;
            let held: LockFlavor = held.parse().map_err(LockError::Backend)?;
            if !(flavor.is_shared() && held.is_shared()) {
                compatible = false;
                break;
            }
        }
        if !compatible {
            tx.rollback().await.map_err(backend_error)?;
            return Ok(false);
        }

        let expires_at = (!lease.is_zero()).then(|| now + lease.as_millis() as i64);
        sqlx::query(
            r#"INSERT INTO distributed_locks (lock_key, token, flavor, acquired_at, expires_at)
               VALUES (?, ?, ?, ?, ?)"#,
        )
        .bind(key)
        .bind(token)
        .bind(flavor.as_str())
        .bind(now)
        .bind(expires_at)
        .execute(&mut *tx)
        .await
        .map_err(backend_error)?;

        tx.commit().await.map_err(backend_error)?;
        Ok(true)
    }
}

fn backend_error(e: sqlx::Error) -> LockError {
    LockError::Backend(e.to_string())
}

impl LockBackend for SqliteLockBackend {
    async fn acquire(
        &self,
        key: &str,
        flavor: LockFlavor,
        token: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        let deadline = Instant::now() + wait;
        let ticket = match flavor {
            LockFlavor::Fair => Some(self.take_ticket(key, token, wait).await?),
            _ => None,
        };

        let granted = loop {
            match self.try_grant(key, flavor, token, ticket, lease).await {
                Ok(true) => break true,
                Ok(false) => {}
                Err(e) => {
                    if let Some(ticket) = ticket {
                        let _ = self.drop_ticket(ticket).await;
                    }
                    return Err(e);
                }
            }
            let now = Instant::now();
            if now >= deadline {
                break false;
            }
            tokio::time::sleep(self.poll_interval.min(deadline - now)).await;
        };

        if let Some(ticket) = ticket {
            self.drop_ticket(ticket).await?;
        }
        if !granted {
            debug!(lock.key = %key, lock.flavor = %flavor, "Lock wait elapsed");
            return Ok(None);
        }
        Ok(Some(LockLease {
            key: key.to_string(),
            flavor,
            token: token.to_string(),
        }))
    }

    async fn release(&self, lease: &LockLease) -> Result<(), LockError> {
        let result = sqlx::query(
            r#"DELETE FROM distributed_locks
               WHERE lock_key = ? AND token = ? AND (expires_at IS NULL OR expires_at > ?)"#,
        )
        .bind(&lease.key)
        .bind(&lease.token)
        .bind(now_millis())
        .execute(&self.pool.writer)
        .await
        .map_err(backend_error)?;

        if result.rows_affected() == 0 {
            // Expired rows of this token are removed all the same.
            sqlx::query("DELETE FROM distributed_locks WHERE lock_key = ? AND token = ?")
                .bind(&lease.key)
                .bind(&lease.token)
                .execute(&self.pool.writer)
                .await
                .map_err(backend_error)?;
            return Err(LockError::ReleaseFailed {
                key: lease.key.clone(),
                reason: "lease no longer held".to_string(),
            });
        }
        Ok(())
    }
}
