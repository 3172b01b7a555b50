//! Live stream registry for the stop control plane.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use dashmap::DashMap;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use uuid::Uuid;

/// A session's entry in the registry. `seq` tells apart sessions that
/// were registered under the same stream id.
#[derive(Debug, Clone)]
pub struct Registration {
    pub seq: u64,
    pub token: CancellationToken,
}

/// Maps stream ids to the cancellation token of their session.
///
/// Cheap to clone; clones share the same map.
#[derive(Debug, Clone, Default)]
pub struct StreamRegistry {
    streams: Arc<DashMap<String, Registration>>,
    next_seq: Arc<AtomicU64>,
}

impl StreamRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stream id for a new session: `{chat_id}_{uid}_{epoch_millis}_{suffix}`,
    /// where the suffix is the random tail of a v7 UUID.
    pub fn stream_id(chat_id: i64, uid: &str) -> String {
        let uuid = Uuid::now_v7().simple().to_string();
        format!(
            "{chat_id}_{uid}_{}_{}",
            chrono::Utc::now().timestamp_millis(),
            &uuid[uuid.len() - 12..]
        )
    }

    /// Register a session. A session already registered under the same id
    /// is cancelled and replaced.
    pub fn register(&self, stream_id: &str) -> Registration {
        let registration = Registration {
            seq: self.next_seq.fetch_add(1, Ordering::Relaxed),
            token: CancellationToken::new(),
        };
        if let Some(previous) = self.streams.insert(stream_id.to_string(), registration.clone()) {
            previous.token.cancel();
        }
        registration
    }

    /// Cancel a live stream. Returns whether one was found.
    pub fn stop(&self, stream_id: &str) -> bool {
        match self.streams.remove(stream_id) {
            Some((_, registration)) => {
                registration.token.cancel();
                debug!(stream_id, "Stream stop requested");
                true
            }
            None => false,
        }
    }

    /// Drop the entry for a finished session, unless another session has
    /// since taken over the id.
    pub fn remove(&self, stream_id: &str, seq: u64) {
        self.streams.remove_if(stream_id, |_, r| r.seq == seq);
    }

    pub fn is_live(&self, stream_id: &str) -> bool {
        self.streams.contains_key(stream_id)
    }

    pub fn len(&self) -> usize {
        self.streams.len()
    }

    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_cancels_token() {
        let registry = StreamRegistry::new();
        let token = registry.register("1_u1_100").token;
        assert!(registry.is_live("1_u1_100"));

        assert!(registry.stop("1_u1_100"));
        assert!(token.is_cancelled());
        assert!(!registry.is_live("1_u1_100"));
    }

    #[test]
    fn test_stop_is_idempotent() {
        let registry = StreamRegistry::new();
        registry.register("s");
        assert!(registry.stop("s"));
        assert!(!registry.stop("s"));
        assert!(!registry.stop("never-existed"));
    }

    #[test]
    fn test_stream_id_format() {
        let id = StreamRegistry::stream_id(42, "u-7");
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 4);
        assert_eq!(parts[0], "42");
        assert_eq!(parts[1], "u-7");
        assert!(parts[2].parse::<i64>().is_ok());
        assert_eq!(parts[3].len(), 12);
    }

    #[test]
    fn test_stream_ids_are_unique_within_a_millisecond() {
        let ids: std::collections::HashSet<String> =
            (0..100).map(|_| StreamRegistry::stream_id(10, "u1")).collect();
        assert_eq!(ids.len(), 100);
    }

    #[test]
    fn test_replaced_session_does_not_remove_successor() {
        let registry = StreamRegistry::new();
        let first = registry.register("s");
        let second = registry.register("s");
        assert!(first.token.is_cancelled());

        // The replaced session exits and cleans up after itself.
        registry.remove("s", first.seq);
        assert!(registry.is_live("s"));

        assert!(registry.stop("s"));
        assert!(second.token.is_cancelled());
        registry.remove("s", second.seq);
        assert!(registry.is_empty());
    }

    #[test]
    fn test_clones_share_entries() {
        let registry = StreamRegistry::new();
        let clone = registry.clone();
        let token = registry.register("s").token;
        assert!(clone.stop("s"));
        assert!(token.is_cancelled());
        assert!(registry.is_empty());
    }
}
