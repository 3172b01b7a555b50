//! Chat record repository trait definition.

use flowcast_types::chat::{AnswerRecord, ChatTurn, HistoryMessage, NewChatTurn};
use flowcast_types::error::RepositoryError;

/// Repository trait for chat turns and their answers.
pub trait ChatRecordRepository: Send + Sync {
    /// Create a turn, assigning its `req_id`.
    fn create_turn(
        &self,
        turn: &NewChatTurn,
    ) -> impl std::future::Future<Output = Result<ChatTurn, RepositoryError>> + Send;

    /// Ordered conversation for (uid, chat_id), oldest first.
    ///
    /// When `before_req_id` is set, only turns created before it (and their
    /// answers) are returned.
    fn history(
        &self,
        uid: &str,
        chat_id: i64,
        before_req_id: Option<i64>,
    ) -> impl std::future::Future<Output = Result<Vec<HistoryMessage>, RepositoryError>> + Send;

    /// Store (or replace) the answer for a turn.
    fn save_answer(
        &self,
        answer: &AnswerRecord,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
