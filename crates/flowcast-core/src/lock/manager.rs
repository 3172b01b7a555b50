//! LockManager: acquire, execute, always release.

use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};

use flowcast_types::error::LockError;
use flowcast_types::lock::{FailurePolicy, LockFlavor};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::backend::{LockBackend, LockLease};
use super::key::{LockArgs, LockKey};

/// Per call site lock settings.
#[derive(Debug, Clone)]
pub struct LockOptions {
    pub key: LockKey,
    pub flavor: LockFlavor,
    /// Longest time to wait for the lock. Zero makes a single attempt.
    pub wait: Duration,
    /// Auto-release deadline for a crashed holder. Zero disables it.
    pub lease: Duration,
    pub policy: FailurePolicy,
    pub description: Option<String>,
    pub log_enabled: bool,
}

impl LockOptions {
    /// Mutex flavor, single attempt, no lease, failing with an error.
    pub fn new(key: LockKey) -> Self {
        Self {
            key,
            flavor: LockFlavor::Mutex,
            wait: Duration::ZERO,
            lease: Duration::ZERO,
            policy: FailurePolicy::Error,
            description: None,
            log_enabled: true,
        }
    }

    pub fn flavor(mut self, flavor: LockFlavor) -> Self {
        self.flavor = flavor;
        self
    }

    pub fn wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    pub fn lease(mut self, lease: Duration) -> Self {
        self.lease = lease;
        self
    }

    pub fn policy(mut self, policy: FailurePolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn quiet(mut self) -> Self {
        self.log_enabled = false;
        self
    }
}

/// Wraps operations with a named lock held in a [`LockBackend`].
///
/// Locks are not reentrant: running a locked operation that takes the
/// same exclusive key again waits on itself until its own wait elapses.
pub struct LockManager<B: LockBackend> {
    backend: Arc<B>,
}

impl<B: LockBackend> Clone for LockManager<B> {
    fn clone(&self) -> Self {
        Self {
            backend: Arc::clone(&self.backend),
        }
    }
}

impl<B: LockBackend + 'static> LockManager<B> {
    pub fn new(backend: B) -> Self {
        Self {
            backend: Arc::new(backend),
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Run `op` while holding the lock described by `opts`.
    ///
    /// Returns `Ok(Some(_))` with the operation's output when it ran, with
    /// or without the lock, and `Ok(None)` when the lock was not acquired
    /// and the policy is [`FailurePolicy::ReturnNone`]. Key resolution and
    /// backend errors are returned before `op` runs.
    ///
    /// The lock is released after `op` completes, or in the background if
    /// the returned future is dropped mid-operation. A failed release is
    /// logged and never replaces the operation's output.
    pub async fn run<A, T, F, Fut>(
        &self,
        opts: &LockOptions,
        args: &A,
        op: F,
    ) -> Result<Option<T>, LockError>
    where
        A: LockArgs + Sync + ?Sized,
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let key = opts.key.resolve(args)?;
        let token = Uuid::now_v7().to_string();
        let description = opts.description.as_deref().unwrap_or("");

        if opts.log_enabled {
            debug!(
                lock.key = %key,
                lock.flavor = %opts.flavor,
                lock.wait_ms = opts.wait.as_millis() as u64,
                lock.lease_ms = opts.lease.as_millis() as u64,
                lock.policy = %opts.policy,
                description,
                "Acquiring lock"
            );
        }

        let started = Instant::now();
        let lease = self
            .backend
            .acquire(&key, opts.flavor, &token, opts.wait, opts.lease)
            .await?;
        let waited = started.elapsed();

        let Some(lease) = lease else {
            return match opts.policy {
                FailurePolicy::Error => {
                    warn!(lock.key = %key, waited_ms = waited.as_millis() as u64, description, "Lock not acquired");
                    Err(LockError::AcquireTimeout { key, waited })
                }
                FailurePolicy::ReturnNone => {
                    if opts.log_enabled {
                        info!(lock.key = %key, description, "Lock not acquired, skipping operation");
                    }
                    Ok(None)
                }
                FailurePolicy::Proceed => {
                    warn!(lock.key = %key, description, "Lock not acquired, proceeding without it");
                    Ok(Some(op().await))
                }
            };
        };

        if opts.log_enabled {
            info!(
                lock.key = %key,
                lock.flavor = %opts.flavor,
                waited_ms = waited.as_millis() as u64,
                description,
                "Lock acquired"
            );
        }

        let mut guard = ReleaseGuard {
            backend: Arc::clone(&self.backend),
            lease: Some(lease),
        };
        let held_since = Instant::now();
        let output = op().await;

        if let Some(lease) = guard.lease.take() {
            match self.backend.release(&lease).await {
                Ok(()) => {
                    if opts.log_enabled {
                        debug!(
                            lock.key = %lease.key,
                            held_ms = held_since.elapsed().as_millis() as u64,
                            "Lock released"
                        );
                    }
                }
                Err(e) => log_release_failure(&lease, &e),
            }
        }

        Ok(Some(output))
    }
}

fn log_release_failure(lease: &LockLease, e: &LockError) {
    error!(
        error.kind = "lock.release.failed",
        lock.key = %lease.key,
        lock.flavor = %lease.flavor,
        error = %e,
        "Failed to release lock"
    );
}

/// Releases the lease if the protected operation never reached its own
/// release, e.g. because the caller's future was dropped.
struct ReleaseGuard<B: LockBackend + 'static> {
    backend: Arc<B>,
    lease: Option<LockLease>,
}

impl<B: LockBackend + 'static> Drop for ReleaseGuard<B> {
    fn drop(&mut self) {
        let Some(lease) = self.lease.take() else {
            return;
        };
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let backend = Arc::clone(&self.backend);
                handle.spawn(async move {
                    if let Err(e) = backend.release(&lease).await {
                        log_release_failure(&lease, &e);
                    }
                });
            }
            Err(_) => {
                log_release_failure(
                    &lease,
                    &LockError::ReleaseFailed {
                        key: lease.key.clone(),
                        reason: "no runtime available, waiting for lease expiry".to_string(),
                    },
                );
            }
        }
    }
}
