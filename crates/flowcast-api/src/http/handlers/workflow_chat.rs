//! Workflow chat streaming endpoints.
//!
//! POST /api/v1/workflow/chat/stream  - start a run, streamed as SSE
//! POST /api/v1/workflow/chat/resume  - continue a paused run, streamed as SSE
//! POST /api/v1/workflow/chat/stop    - cancel a live stream
//!
//! SSE event types (one JSON object per `data:` line):
//! - `session` - `{ "stream_id": "...", "request_id": N }`
//! - `data` - an ordered workflow frame: `{ "node_id", "content", "finish_reason"?, "elapsed_seconds", ... }`
//! - `interrupt` - the run paused: `{ "event_id", "operations", "need_reply", "value" }`
//! - `complete` - `{ "final_result", "thinking_result", "chat_id", "request_id", "interrupted", "reason"? }`
//! - `error` - `{ "code": "...", "message": "..." }`
//! - `end` - always last: `{ "end": true, "timestamp": "..." }`

use std::convert::Infallible;
use std::time::{Duration, Instant};

use axum::Json;
use axum::extract::State;
use axum::response::sse::{Event, KeepAlive, Sse};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::{Stream, StreamExt};

use flowcast_core::stream::{ChatStream, ResumeRequest, StartRequest};
use flowcast_types::frame::StreamFrame;
use flowcast_types::workflow::{ComparisonRun, WorkflowOperation};

use crate::http::error::AppError;
use crate::http::response::ApiResponse;
use crate::state::AppState;

/// Request body for starting a stream.
#[derive(Debug, Deserialize)]
pub struct StartStreamRequest {
    pub uid: String,
    #[serde(alias = "chatId")]
    pub chat_id: i64,
    #[serde(alias = "botId")]
    pub bot_id: i64,
    #[serde(alias = "askText", default)]
    pub ask_text: String,
    #[serde(alias = "fileUrl", default)]
    pub file_url: Option<String>,
    /// Answer the pending pause instead of starting a new run.
    #[serde(alias = "resumeFlag", default)]
    pub resume_flag: bool,
    #[serde(default)]
    pub version: Option<String>,
    #[serde(default)]
    pub comparison: Option<ComparisonRun>,
}

/// Request body for resuming a paused run.
#[derive(Debug, Deserialize)]
pub struct ResumeStreamRequest {
    pub uid: String,
    #[serde(alias = "chatId")]
    pub chat_id: i64,
    #[serde(alias = "answerText", default)]
    pub answer_text: String,
    #[serde(default)]
    pub operation: Option<WorkflowOperation>,
}

#[derive(Debug, Deserialize)]
pub struct StopStreamRequest {
    #[serde(alias = "streamId")]
    pub stream_id: String,
}

fn require_uid(uid: &str) -> Result<(), AppError> {
    if uid.trim().is_empty() {
        return Err(AppError::Validation("uid is required".to_string()));
    }
    Ok(())
}

/// Render one frame as an SSE event.
fn frame_event(frame: &StreamFrame) -> Event {
    match frame.to_json() {
        Ok(data) => Event::default().event(frame.event_name()).data(data),
        Err(e) => {
            tracing::error!(error = %e, event = frame.event_name(), "Failed to serialize frame");
            let data = serde_json::json!({
                "code": "INTERNAL_ERROR",
                "message": "Failed to serialize frame",
            });
            Event::default().event("error").data(data.to_string())
        }
    }
}

/// Forward a session's frames to the client. Dropping the response drops
/// the receiver, which the session task observes as a disconnect.
fn sse_response(
    chat: ChatStream,
    keep_alive: Duration,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    tracing::debug!(stream_id = %chat.stream_id, request_id = chat.request_id, "Streaming to client");
    let frames = ReceiverStream::new(chat.frames);
    let sse_stream = async_stream::stream! {
        let mut frames = frames;
        while let Some(frame) = frames.next().await {
            yield Ok::<_, Infallible>(frame_event(&frame));
        }
    };
    Sse::new(sse_stream).keep_alive(KeepAlive::new().interval(keep_alive))
}

/// POST /api/v1/workflow/chat/stream - start a workflow run.
///
/// With `resume_flag` set, `ask_text` answers the pending pause instead.
pub async fn start_stream(
    State(state): State<AppState>,
    Json(body): Json<StartStreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_uid(&body.uid)?;
    if !body.resume_flag && body.ask_text.trim().is_empty() && body.file_url.is_none() {
        return Err(AppError::Validation("ask_text is required".to_string()));
    }

    let chat = state
        .controller
        .start(StartRequest {
            uid: body.uid,
            chat_id: body.chat_id,
            bot_id: body.bot_id,
            ask_text: body.ask_text,
            file_url: body.file_url,
            resume: body.resume_flag,
            version: body.version,
            comparison: body.comparison,
        })
        .await?;

    Ok(sse_response(chat, state.keep_alive))
}

/// POST /api/v1/workflow/chat/resume - continue the paused run of (uid, chat_id).
pub async fn resume_stream(
    State(state): State<AppState>,
    Json(body): Json<ResumeStreamRequest>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, AppError> {
    require_uid(&body.uid)?;

    let chat = state
        .controller
        .resume(ResumeRequest {
            uid: body.uid,
            chat_id: body.chat_id,
            answer: body.answer_text,
            operation: body.operation.unwrap_or(WorkflowOperation::Resume),
        })
        .await?;

    Ok(sse_response(chat, state.keep_alive))
}

/// POST /api/v1/workflow/chat/stop - cancel a live stream.
///
/// Unknown or already finished streams report `stopped: false`.
pub async fn stop_stream(
    State(state): State<AppState>,
    Json(body): Json<StopStreamRequest>,
) -> Result<Json<ApiResponse<serde_json::Value>>, AppError> {
    let start = Instant::now();
    let request_id = uuid::Uuid::now_v7().to_string();

    if body.stream_id.trim().is_empty() {
        return Err(AppError::Validation("stream_id is required".to_string()));
    }
    let stopped = state.controller.stop(&body.stream_id);

    let data = serde_json::json!({
        "stream_id": body.stream_id,
        "stopped": stopped,
    });
    let resp = ApiResponse::success(data, request_id, start.elapsed().as_millis() as u64)
        .with_link("self", "/api/v1/workflow/chat/stop");

    Ok(Json(resp))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_request_accepts_camel_case() {
        let body: StartStreamRequest = serde_json::from_str(
            r#"{"uid":"u1","chatId":7,"botId":3,"askText":"hi","fileUrl":"http://x/a.png","resumeFlag":true}"#,
        )
        .unwrap();
        assert_eq!(body.chat_id, 7);
        assert_eq!(body.bot_id, 3);
        assert_eq!(body.file_url.as_deref(), Some("http://x/a.png"));
        assert!(body.resume_flag);

        let body: StartStreamRequest =
            serde_json::from_str(r#"{"uid":"u1","chat_id":7,"bot_id":3,"ask_text":"hi"}"#).unwrap();
        assert!(!body.resume_flag);
        assert!(body.comparison.is_none());
    }

    #[test]
    fn test_resume_request_operation() {
        let body: ResumeStreamRequest =
            serde_json::from_str(r#"{"uid":"u1","chatId":7,"answerText":"yes","operation":"ignore"}"#).unwrap();
        assert_eq!(body.operation, Some(WorkflowOperation::Ignore));
        assert_eq!(body.answer_text, "yes");
    }
}
