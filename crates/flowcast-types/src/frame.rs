//! Frames delivered to the client over SSE.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::event::{EventValue, WorkflowChunk};
use crate::workflow::WorkflowOperation;

/// An ordered, possibly paced, workflow output frame.
///
/// The upstream chunk is flattened into the frame so fields this service
/// does not know about still reach the client.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatFrame {
    pub node_id: String,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    pub elapsed_seconds: f64,
    /// Set when the frame was flushed on close rather than emitted in order.
    #[serde(skip_serializing_if = "std::ops::Not::not")]
    pub forced: bool,
    #[serde(flatten)]
    pub chunk: WorkflowChunk,
}

impl ChatFrame {
    pub fn from_chunk(chunk: WorkflowChunk, elapsed_seconds: f64) -> Self {
        Self {
            node_id: chunk.node_id().unwrap_or_default().to_string(),
            content: chunk.content().to_string(),
            finish_reason: chunk.node_finish_reason().map(str::to_string),
            elapsed_seconds,
            forced: false,
            chunk,
        }
    }

    /// A copy carrying `content` in place of the original text. The node
    /// id, finish reason and elapsed time are kept.
    pub fn with_content(&self, content: &str) -> Self {
        Self {
            node_id: self.node_id.clone(),
            content: content.to_string(),
            finish_reason: self.finish_reason.clone(),
            elapsed_seconds: self.elapsed_seconds,
            forced: self.forced,
            chunk: self.chunk.with_content(content),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionInfo {
    pub stream_id: String,
    pub request_id: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InterruptInfo {
    pub event_id: String,
    pub operations: Vec<WorkflowOperation>,
    pub need_reply: bool,
    pub value: EventValue,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CompleteInfo {
    pub final_result: String,
    pub thinking_result: String,
    pub chat_id: i64,
    pub request_id: i64,
    pub interrupted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ErrorInfo {
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EndInfo {
    pub end: bool,
    pub timestamp: DateTime<Utc>,
}

/// Everything a session can send to its client, in protocol order:
/// `session`, then `data`/`interrupt` frames, then `complete` or `error`,
/// and finally `end`.
#[derive(Debug, Clone, PartialEq)]
pub enum StreamFrame {
    Session(SessionInfo),
    Data(ChatFrame),
    Interrupt(InterruptInfo),
    Complete(CompleteInfo),
    Error(ErrorInfo),
    End(EndInfo),
}

impl StreamFrame {
    pub fn error(code: &str, message: &str) -> Self {
        StreamFrame::Error(ErrorInfo {
            code: code.to_string(),
            message: message.to_string(),
        })
    }

    pub fn end() -> Self {
        StreamFrame::End(EndInfo {
            end: true,
            timestamp: Utc::now(),
        })
    }

    /// SSE `event:` name.
    pub fn event_name(&self) -> &'static str {
        match self {
            StreamFrame::Session(_) => "session",
            StreamFrame::Data(_) => "data",
            StreamFrame::Interrupt(_) => "interrupt",
            StreamFrame::Complete(_) => "complete",
            StreamFrame::Error(_) => "error",
            StreamFrame::End(_) => "end",
        }
    }

    /// SSE `data:` payload.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        match self {
            StreamFrame::Session(info) => serde_json::to_string(info),
            StreamFrame::Data(frame) => serde_json::to_string(frame),
            StreamFrame::Interrupt(info) => serde_json::to_string(info),
            StreamFrame::Complete(info) => serde_json::to_string(info),
            StreamFrame::Error(info) => serde_json::to_string(info),
            StreamFrame::End(info) => serde_json::to_string(info),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, StreamFrame::End(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chunk(json: &str) -> WorkflowChunk {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_chat_frame_flattens_chunk() {
        let c = chunk(
            r#"{"code":0,"message":"ok","id":"sid-1",
                "choices":[{"delta":{"content":"Hi"},"index":0}],
                "workflow_step":{"node":{"id":"message-1","finish_reason":"stop"}}}"#,
        );
        let frame = ChatFrame::from_chunk(c, 1.25);
        let json: serde_json::Value = serde_json::to_value(&frame).unwrap();
        assert_eq!(json["node_id"], "message-1");
        assert_eq!(json["content"], "Hi");
        assert_eq!(json["finish_reason"], "stop");
        assert_eq!(json["elapsed_seconds"], 1.25);
        assert_eq!(json["id"], "sid-1");
        assert!(json.get("forced").is_none());
    }

    #[test]
    fn test_with_content_keeps_metadata() {
        let c = chunk(
            r#"{"code":0,"message":"ok",
                "choices":[{"delta":{"content":"AB"},"index":0}],
                "workflow_step":{"node":{"id":"message-1"}}}"#,
        );
        let frame = ChatFrame::from_chunk(c, 0.5);
        let a = frame.with_content("A");
        assert_eq!(a.content, "A");
        assert_eq!(a.chunk.content(), "A");
        assert_eq!(a.node_id, "message-1");
        assert_eq!(a.elapsed_seconds, 0.5);
    }

    #[test]
    fn test_event_names() {
        assert_eq!(StreamFrame::end().event_name(), "end");
        assert!(StreamFrame::end().is_terminal());
        let err = StreamFrame::error("UPSTREAM_TIMEOUT", "Request timeout, please try again later");
        assert_eq!(err.event_name(), "error");
        let json: serde_json::Value = serde_json::from_str(&err.to_json().unwrap()).unwrap();
        assert_eq!(json["code"], "UPSTREAM_TIMEOUT");
    }
}
