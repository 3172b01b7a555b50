//! Runtime selection between the in-memory and SQLite adapters.
//!
//! The controller is generic over its session store and lock backend; the
//! binary pins it to these enums so `flowcast.toml` can pick the
//! implementation without changing types.

use std::time::Duration;

use flowcast_core::lock::{LockBackend, LockLease};
use flowcast_core::session::store::SessionStore;
use flowcast_types::config::{LockBackendKind, SessionStoreKind};
use flowcast_types::error::{LockError, RepositoryError};
use flowcast_types::lock::LockFlavor;
use flowcast_types::workflow::{PauseMarker, ValueKind};

use crate::memory::lock::LocalLockBackend;
use crate::memory::session::InMemorySessionStore;
use crate::sqlite::lock::SqliteLockBackend;
use crate::sqlite::pool::DatabasePool;
use crate::sqlite::session::SqliteSessionStore;

pub enum ConfiguredSessionStore {
    Memory(InMemorySessionStore),
    Sqlite(SqliteSessionStore),
}

impl ConfiguredSessionStore {
    pub fn new(kind: SessionStoreKind, pool: &DatabasePool) -> Self {
        match kind {
            SessionStoreKind::Memory => Self::Memory(InMemorySessionStore::new()),
            SessionStoreKind::Sqlite => Self::Sqlite(SqliteSessionStore::new(pool.clone())),
        }
    }
}

impl SessionStore for ConfiguredSessionStore {
    async fn put(
        &self,
        uid: &str,
        chat_id: i64,
        event_id: &str,
        value_kind: ValueKind,
        ttl: Duration,
    ) -> Result<(), RepositoryError> {
        match self {
            Self::Memory(s) => s.put(uid, chat_id, event_id, value_kind, ttl).await,
            Self::Sqlite(s) => s.put(uid, chat_id, event_id, value_kind, ttl).await,
        }
    }

    async fn get(&self, uid: &str, chat_id: i64) -> Result<Option<PauseMarker>, RepositoryError> {
        match self {
            Self::Memory(s) => s.get(uid, chat_id).await,
            Self::Sqlite(s) => s.get(uid, chat_id).await,
        }
    }

    async fn clear(&self, uid: &str, chat_id: i64) -> Result<(), RepositoryError> {
        match self {
            Self::Memory(s) => s.clear(uid, chat_id).await,
            Self::Sqlite(s) => s.clear(uid, chat_id).await,
        }
    }
}

pub enum ConfiguredLockBackend {
    Local(LocalLockBackend),
    Sqlite(SqliteLockBackend),
}

impl ConfiguredLockBackend {
    pub fn new(kind: LockBackendKind, pool: &DatabasePool) -> Self {
        match kind {
            LockBackendKind::Local => Self::Local(LocalLockBackend::new()),
            LockBackendKind::Sqlite => Self::Sqlite(SqliteLockBackend::new(pool.clone())),
        }
    }
}

impl LockBackend for ConfiguredLockBackend {
    async fn acquire(
        &self,
        key: &str,
        flavor: LockFlavor,
        token: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        match self {
            Self::Local(b) => b.acquire(key, flavor, token, wait, lease).await,
            Self::Sqlite(b) => b.acquire(key, flavor, token, wait, lease).await,
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<(), LockError> {
        match self {
            Self::Local(b) => b.release(lease).await,
            Self::Sqlite(b) => b.release(lease).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sqlite::pool::test_pool;

    #[tokio::test]
    async fn test_session_store_kinds_behave_alike() {
        let (pool, _dir) = test_pool().await;
        for kind in [SessionStoreKind::Memory, SessionStoreKind::Sqlite] {
            let store = ConfiguredSessionStore::new(kind, &pool);
            store
                .put("u1", 7, "evt-1", ValueKind::Option, Duration::from_secs(60))
                .await
                .unwrap();
            assert_eq!(store.get("u1", 7).await.unwrap().unwrap().event_id, "evt-1");
            store.clear("u1", 7).await.unwrap();
            assert!(store.get("u1", 7).await.unwrap().is_none());
        }
    }

    #[tokio::test]
    async fn test_lock_backend_kinds_exclude() {
        let (pool, _dir) = test_pool().await;
        for kind in [LockBackendKind::Local, LockBackendKind::Sqlite] {
            let backend = ConfiguredLockBackend::new(kind, &pool);
            let lease = backend
                .acquire("k", LockFlavor::Write, "a", Duration::ZERO, Duration::ZERO)
                .await
                .unwrap()
                .unwrap();
            let blocked = backend
                .acquire("k", LockFlavor::Read, "b", Duration::ZERO, Duration::ZERO)
                .await
                .unwrap();
            assert!(blocked.is_none(), "{kind:?}");
            backend.release(&lease).await.unwrap();
        }
    }
}
