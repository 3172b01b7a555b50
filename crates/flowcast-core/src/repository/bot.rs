//! Workflow bot lookup trait definition.

use flowcast_types::error::RepositoryError;
use flowcast_types::workflow::{MarketListing, WorkflowBot};

/// Read access to bot workflow bindings and publish state.
///
/// Implementations live in flowcast-infra (e.g., SqliteWorkflowBotRepository).
pub trait WorkflowBotRepository: Send + Sync {
    /// Get the workflow binding of a bot.
    fn workflow_bot(
        &self,
        bot_id: i64,
    ) -> impl std::future::Future<Output = Result<Option<WorkflowBot>, RepositoryError>> + Send;

    /// Get the bot's market listing. `None` when the bot was never listed.
    fn market_listing(
        &self,
        bot_id: i64,
    ) -> impl std::future::Future<Output = Result<Option<MarketListing>, RepositoryError>> + Send;

    /// Record whether the workflow's latest run makes it eligible to publish.
    ///
    /// Callers hold the `workflow:publish:{flow_id}` lock while calling this.
    fn set_can_publish(
        &self,
        flow_id: &str,
        can_publish: bool,
    ) -> impl std::future::Future<Output = Result<(), RepositoryError>> + Send;
}
