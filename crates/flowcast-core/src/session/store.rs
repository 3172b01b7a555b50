//! SessionStore trait definition.

use std::time::Duration;

use flowcast_types::error::RepositoryError;
use flowcast_types::workflow::{PauseMarker, ValueKind};

/// Short-lived key-value store holding at most one [`PauseMarker`] per
/// (uid, chat_id).
///
/// Markers expire after their TTL; an expired marker must read as absent.
pub trait SessionStore: Send + Sync {
    /// Write the marker for (uid, chat_id), replacing any previous one.
    fn put(
        &self,
        uid: &str,
        chat_id: i64,
        event_id: &str,
        value_kind: ValueKind,
        ttl: Duration,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;

    fn get(
        &self,
        uid: &str,
        chat_id: i64,
    ) -> impl std::future::Future<Output = Result<Option<PauseMarker>, RepositoryError>> + Send;

    /// Remove the marker. Clearing a missing marker is not an error.
    fn clear(
        &self,
        uid: &str,
        chat_id: i64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
