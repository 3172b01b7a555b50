//! Process-local lock backend.
//!
//! Locks live in a map guarded by a std mutex. Waiters sleep on a
//! [`Notify`] that is signalled whenever a holder or fair ticket leaves,
//! and re-check at least every [`EXPIRY_POLL`] so that lapsed leases are
//! noticed without a release.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use flowcast_core::lock::{LockBackend, LockLease};
use flowcast_types::error::LockError;
use flowcast_types::lock::LockFlavor;
use tokio::sync::Notify;
use tokio::time::Instant;

const EXPIRY_POLL: Duration = Duration::from_millis(50);

#[derive(Debug)]
struct Holder {
    token: String,
    flavor: LockFlavor,
    deadline: Option<Instant>,
}

#[derive(Debug, Default)]
struct KeyState {
    holders: Vec<Holder>,
    /// Fair tickets in arrival order.
    waiters: VecDeque<u64>,
}

impl KeyState {
    fn purge_expired(&mut self, now: Instant) {
        self.holders
            .retain(|h| h.deadline.is_none_or(|deadline| deadline > now));
    }

    fn admits(&self, flavor: LockFlavor) -> bool {
        self.holders
            .iter()
            .all(|h| flavor.is_shared() && h.flavor.is_shared())
    }

    fn is_idle(&self) -> bool {
        self.holders.is_empty() && self.waiters.is_empty()
    }
}

/// `LockBackend` for a single process.
#[derive(Debug, Default)]
pub struct LocalLockBackend {
    keys: Mutex<HashMap<String, KeyState>>,
    changed: Notify,
    next_ticket: AtomicU64,
}

impl LocalLockBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live holders of `key`.
    pub fn holders(&self, key: &str) -> usize {
        let now = Instant::now();
        let keys = self.keys.lock().expect("lock table poisoned");
        keys.get(key)
            .map(|s| s.holders.iter().filter(|h| h.deadline.is_none_or(|d| d > now)).count())
            .unwrap_or(0)
    }

    fn take_ticket(&self, key: &str) -> u64 {
        let ticket = self.next_ticket.fetch_add(1, Ordering::Relaxed);
        let mut keys = self.keys.lock().expect("lock table poisoned");
        keys.entry(key.to_string()).or_default().waiters.push_back(ticket);
        ticket
    }

    fn drop_ticket(&self, key: &str, ticket: u64) {
        let mut keys = self.keys.lock().expect("lock table poisoned");
        if let Some(state) = keys.get_mut(key) {
            state.waiters.retain(|t| *t != ticket);
            if state.is_idle() {
                keys.remove(key);
            }
        }
        drop(keys);
        self.changed.notify_waiters();
    }

    fn try_grant(
        &self,
        key: &str,
        flavor: LockFlavor,
        token: &str,
        ticket: Option<u64>,
        lease: Duration,
    ) -> bool {
        let now = Instant::now();
        let mut keys = self.keys.lock().expect("lock table poisoned");
        let state = keys.entry(key.to_string()).or_default();
        state.purge_expired(now);

        let at_head = ticket.is_none() || state.waiters.front().copied() == ticket;
        if !at_head || !state.admits(flavor) {
            if state.is_idle() {
                keys.remove(key);
            }
            return false;
        }

        if ticket.is_some() {
            state.waiters.pop_front();
        }
        state.holders.push(Holder {
            token: token.to_string(),
            flavor,
            deadline: (!lease.is_zero()).then(|| now + lease),
        });
        true
    }
}

/// Withdraws a fair ticket when its `acquire` returns without a grant or
/// is dropped while waiting.
struct TicketGuard<'a> {
    backend: &'a LocalLockBackend,
    key: &'a str,
    ticket: Option<u64>,
}

impl Drop for TicketGuard<'_> {
    fn drop(&mut self) {
        if let Some(ticket) = self.ticket.take() {
            self.backend.drop_ticket(self.key, ticket);
        }
    }
}

impl LockBackend for LocalLockBackend {
    async fn acquire(
        &self,
        key: &str,
        flavor: LockFlavor,
        token: &str,
        wait: Duration,
        lease: Duration,
    ) -> Result<Option<LockLease>, LockError> {
        let deadline = Instant::now() + wait;
        let mut ticket = TicketGuard {
            backend: self,
            key,
            ticket: (flavor == LockFlavor::Fair).then(|| self.take_ticket(key)),
        };

        loop {
            let notified = self.changed.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            if self.try_grant(key, flavor, token, ticket.ticket, lease) {
                // try_grant already popped the ticket.
                ticket.ticket = None;
                return Ok(Some(LockLease {
                    key: key.to_string(),
                    flavor,
                    token: token.to_string(),
                }));
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }
            let _ = tokio::time::timeout((deadline - now).min(EXPIRY_POLL), notified).await;
        }
    }

    async fn release(&self, lease: &LockLease) -> Result<(), LockError> {
        let now = Instant::now();
        let mut keys = self.keys.lock().expect("lock table poisoned");
        let held = match keys.get_mut(&lease.key) {
            Some(state) => {
                let position = state.holders.iter().position(|h| h.token == lease.token);
                let live = position
                    .map(|i| state.holders.remove(i))
                    .is_some_and(|h| h.deadline.is_none_or(|d| d > now));
                if state.is_idle() {
                    keys.remove(&lease.key);
                }
                live
            }
            None => false,
        };
        drop(keys);
        self.changed.notify_waiters();

        if held {
            Ok(())
        } else {
            Err(LockError::ReleaseFailed {
                key: lease.key.clone(),
                reason: "lease no longer held".to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    async fn try_once(b: &LocalLockBackend, key: &str, flavor: LockFlavor, token: &str) -> Option<LockLease> {
        b.acquire(key, flavor, token, Duration::ZERO, Duration::ZERO)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_mutex_excludes() {
        let b = LocalLockBackend::new();
        let lease = try_once(&b, "k", LockFlavor::Mutex, "t1").await.unwrap();
        assert!(try_once(&b, "k", LockFlavor::Mutex, "t2").await.is_none());
        assert!(try_once(&b, "k", LockFlavor::Write, "t3").await.is_none());

        b.release(&lease).await.unwrap();
        assert_eq!(b.holders("k"), 0);
        assert!(try_once(&b, "k", LockFlavor::Mutex, "t2").await.is_some());
    }

    #[tokio::test]
    async fn test_read_shared_write_exclusive() {
        let b = LocalLockBackend::new();
        let r1 = try_once(&b, "k", LockFlavor::Read, "r1").await.unwrap();
        let r2 = try_once(&b, "k", LockFlavor::Read, "r2").await.unwrap();
        assert_eq!(b.holders("k"), 2);
        assert!(try_once(&b, "k", LockFlavor::Write, "w").await.is_none());

        b.release(&r1).await.unwrap();
        b.release(&r2).await.unwrap();
        let w = try_once(&b, "k", LockFlavor::Write, "w").await.unwrap();
        assert!(try_once(&b, "k", LockFlavor::Read, "r3").await.is_none());
        b.release(&w).await.unwrap();
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_release() {
        let b = Arc::new(LocalLockBackend::new());
        let lease = try_once(&b, "k", LockFlavor::Mutex, "t1").await.unwrap();

        let waiter = {
            let b = Arc::clone(&b);
            tokio::spawn(async move {
                b.acquire("k", LockFlavor::Mutex, "t2", Duration::from_secs(5), Duration::ZERO)
                    .await
                    .unwrap()
            })
        };
        tokio::task::yield_now().await;
        b.release(&lease).await.unwrap();

        assert_eq!(waiter.await.unwrap().unwrap().token, "t2");
    }

    #[tokio::test(start_paused = true)]
    async fn test_wait_elapses_without_release() {
        let b = LocalLockBackend::new();
        try_once(&b, "k", LockFlavor::Mutex, "t1").await.unwrap();

        let started = Instant::now();
        let lease = b
            .acquire("k", LockFlavor::Mutex, "t2", Duration::from_secs(2), Duration::ZERO)
            .await
            .unwrap();
        assert!(lease.is_none());
        assert!(started.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_lease_expiry_frees_key() {
        let b = LocalLockBackend::new();
        let stale = b
            .acquire("k", LockFlavor::Mutex, "t1", Duration::ZERO, Duration::from_secs(30))
            .await
            .unwrap()
            .unwrap();

        // A waiter with a longer wait picks the key up once the lease lapses.
        let fresh = b
            .acquire("k", LockFlavor::Mutex, "t2", Duration::from_secs(60), Duration::ZERO)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(fresh.token, "t2");

        let err = b.release(&stale).await.unwrap_err();
        assert_eq!(err.code(), "LOCK_RELEASE_FAILED");
        b.release(&fresh).await.unwrap();
    }

    #[tokio::test]
    async fn test_release_unknown_lease_fails() {
        let b = LocalLockBackend::new();
        let lease = LockLease {
            key: "k".to_string(),
            flavor: LockFlavor::Mutex,
            token: "nobody".to_string(),
        };
        assert!(b.release(&lease).await.is_err());
    }

    #[tokio::test]
    async fn test_fair_grants_in_arrival_order() {
        let b = Arc::new(LocalLockBackend::new());
        let first = try_once(&b, "k", LockFlavor::Fair, "holder").await.unwrap();

        let order = Arc::new(tokio::sync::Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for name in ["a", "b", "c"] {
            let b = Arc::clone(&b);
            let order = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                let lease = b
                    .acquire("k", LockFlavor::Fair, name, Duration::from_secs(5), Duration::ZERO)
                    .await
                    .unwrap()
                    .unwrap();
                order.lock().await.push(name.to_string());
                b.release(&lease).await.unwrap();
            }));
            tokio::time::sleep(Duration::from_millis(10)).await;
        }

        b.release(&first).await.unwrap();
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock().await, vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_cancelled_fair_waiter_leaves_queue() {
        let b = LocalLockBackend::new();
        let lease = try_once(&b, "k", LockFlavor::Fair, "holder").await.unwrap();

        let waiting = b.acquire("k", LockFlavor::Fair, "gone", Duration::from_secs(5), Duration::ZERO);
        assert!(tokio::time::timeout(Duration::from_millis(20), waiting).await.is_err());

        b.release(&lease).await.unwrap();
        assert_eq!(b.holders("k"), 0);
        let next = b
            .acquire("k", LockFlavor::Fair, "next", Duration::from_millis(200), Duration::ZERO)
            .await
            .unwrap();
        assert_eq!(next.map(|l| l.token).as_deref(), Some("next"));
        assert!(b.keys.lock().unwrap().get("k").is_some_and(|s| s.waiters.is_empty()));
    }
}
