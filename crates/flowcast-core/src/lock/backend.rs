//! LockBackend trait definition.

use std::time::Duration;

use flowcast_types::error::LockError;
use flowcast_types::lock::LockFlavor;

/// A held lock.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockLease {
    pub key: String,
    pub flavor: LockFlavor,
    /// Identifies this holder; release only succeeds with the same token.
    pub token: String,
}

/// Storage of lock state.
///
/// Implementations must honour flavor compatibility (any number of `Read`
/// holders, or exactly one `Mutex`/`Fair`/`Write` holder per key), grant
/// `Fair` requests in arrival order, and drop holders whose lease elapsed.
pub trait LockBackend: Send + Sync {
    /// Try to take `key` for up to `wait`. A zero `wait` makes a single
    /// attempt. A zero `lease` holds the lock until it is released.
    ///
    /// Returns `Ok(None)` when the wait elapsed without acquiring.
    fn acquire(
        &self,
        key: &str,
        flavor: LockFlavor,
        token: &str,
        wait: Duration,
        lease: Duration,
    ) -> impl std::future::Future<Output = Result<Option<LockLease>, LockError>> + Send;

    /// Release a held lock. Fails with `LockError::ReleaseFailed` when the
    /// lease is no longer held (expired or taken over).
    fn release(
        &self,
        lease: &LockLease,
    ) -> impl std::future::Future<Output = Result<(), LockError>> + Send;
}
