use std::time::Duration;

use thiserror::Error;

/// Errors from repository operations (used by trait definitions in flowcast-core).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database connection error")]
    Connection,

    #[error("query error: {0}")]
    Query(String),

    #[error("entity not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),
}

/// Errors raised while talking to the upstream workflow engine.
#[derive(Debug, Clone, Error)]
pub enum UpstreamError {
    /// Connection refused, reset, DNS failure and other transport faults.
    #[error("upstream unavailable: {0}")]
    Unavailable(String),

    /// No connection or no event within the configured bound.
    #[error("upstream timed out after {0:?}")]
    Timeout(Duration),

    /// Upstream answered with a non-success HTTP status.
    #[error("upstream rejected request with HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// An event arrived that could not be decoded.
    #[error("failed to decode upstream event: {0}")]
    Decode(String),
}

impl UpstreamError {
    /// Message shown to the end user when this error terminates a stream.
    pub fn user_message(&self) -> &'static str {
        match self {
            UpstreamError::Timeout(_) => "Request timeout, please try again later",
            _ => "Connection failed, please try again later",
        }
    }
}

/// Errors from the distributed lock layer.
#[derive(Debug, Clone, Error)]
pub enum LockError {
    #[error("failed to acquire lock '{key}' within {waited:?}")]
    AcquireTimeout { key: String, waited: Duration },

    #[error("failed to release lock '{key}': {reason}")]
    ReleaseFailed { key: String, reason: String },

    #[error("cannot resolve lock key '{template}': {reason}")]
    KeyResolution { template: String, reason: String },

    #[error("lock backend error: {0}")]
    Backend(String),
}

impl LockError {
    pub fn code(&self) -> &'static str {
        match self {
            LockError::AcquireTimeout { .. } => "LOCK_ACQUIRE_TIMEOUT",
            LockError::ReleaseFailed { .. } => "LOCK_RELEASE_FAILED",
            LockError::KeyResolution { .. } => "LOCK_KEY_INVALID",
            LockError::Backend(_) => "LOCK_BACKEND_ERROR",
        }
    }
}

/// Errors surfaced by the workflow chat streaming engine.
///
/// Errors returned before a stream opens become HTTP errors; anything
/// after that is delivered as a terminal `error` frame instead.
#[derive(Debug, Error)]
pub enum ChatStreamError {
    #[error("input binding failed: {0}")]
    InputBinding(String),

    #[error("upstream unavailable: {0}")]
    UpstreamUnavailable(String),

    #[error("upstream timed out after {0:?}")]
    UpstreamTimeout(Duration),

    #[error("no pending interaction for uid '{uid}' in chat {chat_id}")]
    NoPendingInteraction { uid: String, chat_id: i64 },

    #[error("workflow bot {0} not found")]
    BotNotFound(i64),

    #[error(transparent)]
    Lock(#[from] LockError),

    #[error("storage error: {0}")]
    Repository(#[from] RepositoryError),
}

impl ChatStreamError {
    /// Stable machine-readable code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            ChatStreamError::InputBinding(_) => "INPUT_BINDING_ERROR",
            ChatStreamError::UpstreamUnavailable(_) => "UPSTREAM_UNAVAILABLE",
            ChatStreamError::UpstreamTimeout(_) => "UPSTREAM_TIMEOUT",
            ChatStreamError::NoPendingInteraction { .. } => "NO_PENDING_INTERACTION",
            ChatStreamError::BotNotFound(_) => "BOT_NOT_FOUND",
            ChatStreamError::Lock(e) => e.code(),
            ChatStreamError::Repository(_) => "STORAGE_ERROR",
        }
    }
}

impl From<UpstreamError> for ChatStreamError {
    fn from(e: UpstreamError) -> Self {
        match e {
            UpstreamError::Timeout(d) => ChatStreamError::UpstreamTimeout(d),
            other => ChatStreamError::UpstreamUnavailable(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_repository_error_display() {
        let err = RepositoryError::Query("syntax error".to_string());
        assert_eq!(err.to_string(), "query error: syntax error");
    }

    #[test]
    fn test_chat_stream_error_codes() {
        let err = ChatStreamError::NoPendingInteraction {
            uid: "u1".to_string(),
            chat_id: 7,
        };
        assert_eq!(err.code(), "NO_PENDING_INTERACTION");
        assert!(err.to_string().contains("chat 7"));

        let lock = ChatStreamError::from(LockError::ReleaseFailed {
            key: "k".to_string(),
            reason: "gone".to_string(),
        });
        assert_eq!(lock.code(), "LOCK_RELEASE_FAILED");
    }

    #[test]
    fn test_upstream_timeout_maps_to_timeout_code() {
        let err: ChatStreamError = UpstreamError::Timeout(Duration::from_secs(3)).into();
        assert_eq!(err.code(), "UPSTREAM_TIMEOUT");

        let err: ChatStreamError = UpstreamError::Rejected {
            status: 502,
            body: "bad gateway".to_string(),
        }
        .into();
        assert_eq!(err.code(), "UPSTREAM_UNAVAILABLE");
    }

    #[test]
    fn test_upstream_user_messages() {
        assert_eq!(
            UpstreamError::Timeout(Duration::from_secs(1)).user_message(),
            "Request timeout, please try again later"
        );
        assert_eq!(
            UpstreamError::Unavailable("reset".to_string()).user_message(),
            "Connection failed, please try again later"
        );
    }
}
