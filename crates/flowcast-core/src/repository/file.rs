//! File binding repository trait definition.

use flowcast_types::chat::ChatFile;
use flowcast_types::error::RepositoryError;

/// Files attached to a chat and their binding to turns.
pub trait FileBindingRepository: Send + Sync {
    /// Files of (uid, chat_id) not yet consumed by any turn, oldest first.
    fn unbound_files(
        &self,
        uid: &str,
        chat_id: i64,
    ) -> impl std::future::Future<Output = Result<Vec<ChatFile>, RepositoryError>> + Send;

    /// Mark files as consumed by `req_id`. Already bound files are left alone.
    fn bind_files(
        &self,
        file_ids: &[i64],
        req_id: i64,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
