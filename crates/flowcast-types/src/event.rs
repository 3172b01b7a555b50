//! Upstream workflow event chunks.
//!
//! The upstream sends one JSON chunk per SSE `data:` line. Fields this
//! service does not interpret are kept in `extra` so that direct output
//! mode can forward a chunk unchanged.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Data line that terminates the upstream stream.
pub const DONE_SENTINEL: &str = "[DONE]";

/// Finish reason of a completed node or run.
pub const FINISH_STOP: &str = "stop";

/// Choice finish reason signalling that the run paused for input.
pub const FINISH_INTERRUPT: &str = "interrupt";

/// Node id prefix of message nodes.
pub const MESSAGE_NODE_PREFIX: &str = "message-";

/// Node id prefix of the flow terminus.
pub const END_NODE_PREFIX: &str = "node-end";

/// How the reorderer treats a node's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeClass {
    /// Message node: output is ordered and may be paced.
    Message,
    /// Flow terminus: ordered, paced, and its `stop` ends the run.
    Terminal,
    /// Everything else: forwarded as it arrives.
    Passthrough,
}

impl NodeClass {
    pub fn of(node_id: &str) -> Self {
        if node_id.starts_with(END_NODE_PREFIX) {
            NodeClass::Terminal
        } else if node_id.starts_with(MESSAGE_NODE_PREFIX) {
            NodeClass::Message
        } else {
            NodeClass::Passthrough
        }
    }

    pub fn is_ordered(&self) -> bool {
        !matches!(self, NodeClass::Passthrough)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reasoning_content: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Choice {
    #[serde(default)]
    pub delta: Delta,
    #[serde(default)]
    pub index: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ext: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub outputs: Option<Value>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node: Option<NodeInfo>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The value a paused workflow is waiting for.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventValue {
    #[serde(rename = "type", default)]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub option: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventData {
    pub event_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_type: Option<String>,
    #[serde(default)]
    pub need_reply: bool,
    #[serde(default)]
    pub value: EventValue,
}

/// One upstream event.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowChunk {
    #[serde(default)]
    pub code: i64,
    #[serde(default)]
    pub message: String,
    /// Upstream session id.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<Choice>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workflow_step: Option<WorkflowStep>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_data: Option<EventData>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl WorkflowChunk {
    pub fn node(&self) -> Option<&NodeInfo> {
        self.workflow_step.as_ref().and_then(|s| s.node.as_ref())
    }

    pub fn node_id(&self) -> Option<&str> {
        self.node().map(|n| n.id.as_str())
    }

    pub fn first_choice(&self) -> Option<&Choice> {
        self.choices.first()
    }

    /// Text carried by the first choice, empty when there is none.
    pub fn content(&self) -> &str {
        self.first_choice()
            .map(|c| c.delta.content.as_str())
            .unwrap_or("")
    }

    pub fn reasoning(&self) -> Option<&str> {
        self.first_choice()
            .and_then(|c| c.delta.reasoning_content.as_deref())
    }

    pub fn choice_finish_reason(&self) -> Option<&str> {
        self.first_choice().and_then(|c| c.finish_reason.as_deref())
    }

    pub fn node_finish_reason(&self) -> Option<&str> {
        self.node().and_then(|n| n.finish_reason.as_deref())
    }

    /// Class of the node that produced this chunk. Chunks without node
    /// info or without choices cannot be ordered and pass through.
    pub fn class(&self) -> NodeClass {
        match self.node_id() {
            Some(id) if !self.choices.is_empty() => NodeClass::of(id),
            _ => NodeClass::Passthrough,
        }
    }

    /// Whether the producing node reported completion.
    pub fn is_node_finished(&self) -> bool {
        self.node_finish_reason() == Some(FINISH_STOP)
    }

    /// The flow terminus reporting `stop`: normal end of the run.
    pub fn is_terminal(&self) -> bool {
        self.node_id().is_some_and(|id| id.starts_with(END_NODE_PREFIX))
            && self.choice_finish_reason() == Some(FINISH_STOP)
    }

    /// The run paused and is waiting for input described by `event_data`.
    pub fn is_suspend(&self) -> bool {
        self.event_data.is_some() && self.choice_finish_reason() == Some(FINISH_INTERRUPT)
    }

    /// Outputs of a flow terminus that answers through its outputs
    /// (`ext.answer_mode == 0`) instead of streamed text. Only reported
    /// once the terminus finishes.
    pub fn end_node_outputs(&self) -> Option<&Value> {
        let node = self.node()?;
        if !node.id.starts_with(END_NODE_PREFIX) || node.finish_reason.as_deref() != Some(FINISH_STOP) {
            return None;
        }
        let answer_mode = node.ext.as_ref()?.get("answer_mode")?.as_i64()?;
        if answer_mode != 0 {
            return None;
        }
        node.outputs.as_ref()
    }

    /// Copy of this chunk with the first choice's content replaced.
    pub fn with_content(&self, content: &str) -> Self {
        let mut chunk = self.clone();
        if let Some(choice) = chunk.choices.first_mut() {
            choice.delta.content = content.to_string();
        }
        chunk
    }
}

/// Human readable fallback appended to an answer when the upstream
/// reports a non-zero code.
pub fn fallback_message(code: i64) -> &'static str {
    match code {
        20201 => "Corresponding Flow ID not found",
        20202 => "Flow ID is invalid",
        20204 => "Workflow not published",
        20207 => "Workflow is in draft status",
        20303 => "Model request failed",
        20350 => "Authorization error: Daily flow control exceeded",
        11202 => "Authorization error: Second-level flow control exceeded",
        11203 => "Authorization error: Concurrent flow control exceeded",
        _ => "Service exception, please try again later",
    }
}
