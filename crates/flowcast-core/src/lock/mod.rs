//! Named locks guarding state shared across sessions and instances.
//!
//! [`LockManager::run`] wraps an operation with acquire, execute and a
//! guaranteed release. Keys are literal or templated, flavors and
//! failure handling are chosen per call site, and the storage of lock
//! state is delegated to a [`LockBackend`].

pub mod backend;
pub mod key;
pub mod manager;

pub use backend::{LockBackend, LockLease};
pub use key::{LockArgs, LockKey};
pub use manager::{LockManager, LockOptions};
