//! UpstreamGateway trait definition.
//!
//! `open` returns a boxed stream (not a callback interface) so the session
//! task can `select!` between upstream events, cancellation and idle
//! timeouts in one place.

use std::pin::Pin;

use futures_util::Stream;

use flowcast_types::error::UpstreamError;
use flowcast_types::event::WorkflowChunk;
use flowcast_types::workflow::{ComparisonRun, UpstreamPayload, UpstreamTarget};

/// Decoded upstream events. Ends after the `[DONE]` sentinel or when the
/// upstream closes the connection; a transport failure is yielded as the
/// last item.
pub type ChunkStream = Pin<Box<dyn Stream<Item = Result<WorkflowChunk, UpstreamError>> + Send + 'static>>;

/// Connection to the external workflow execution engine.
///
/// Implementations live in flowcast-infra (e.g., `HttpUpstreamGateway`).
pub trait UpstreamGateway: Send + Sync {
    /// Open a streaming run against `target`.
    ///
    /// Resolves once the upstream accepted the request, bounded by the
    /// connect timeout. Dropping the returned stream closes the connection.
    fn open(
        &self,
        target: &UpstreamTarget,
        payload: &UpstreamPayload,
    ) -> impl std::future::Future<Output = Result<ChunkStream, UpstreamError>> + Send;

    /// Remove the scaffolding a prompt-comparison run left on the upstream.
    fn delete_comparisons(
        &self,
        run: &ComparisonRun,
    ) -> impl std::future::Future<Output = Result<(), UpstreamError>> + Send;
}
