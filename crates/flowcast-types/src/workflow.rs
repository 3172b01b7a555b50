//! Workflow bot metadata, upstream targets, payloads and pause markers.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::chat::HistoryMessage;

/// Parameter key carrying the user's question in the upstream payload.
pub const USER_INPUT_PARAM: &str = "AGENT_USER_INPUT";

/// Workflow binding of a bot, as stored by the bot service.
///
/// The two input declarations are raw JSON owned by the bot editor; they
/// are parsed lazily because malformed values must not block a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowBot {
    pub bot_id: i64,
    pub flow_id: String,
    /// JSON object mapping the single file parameter name to its file type.
    pub extra_inputs: Option<String>,
    /// JSON array of [`InputSlot`] declarations for multi-file binding.
    pub extra_inputs_config: Option<String>,
}

/// Shelf state of a bot's market listing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShelfStatus {
    Pending,
    OnShelf,
    OffShelf,
}

impl fmt::Display for ShelfStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ShelfStatus::Pending => write!(f, "pending"),
            ShelfStatus::OnShelf => write!(f, "on_shelf"),
            ShelfStatus::OffShelf => write!(f, "off_shelf"),
        }
    }
}

impl FromStr for ShelfStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ShelfStatus::Pending),
            "on_shelf" => Ok(ShelfStatus::OnShelf),
            "off_shelf" => Ok(ShelfStatus::OffShelf),
            other => Err(format!("invalid shelf status: '{other}'")),
        }
    }
}

/// A bot's market listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketListing {
    pub bot_id: i64,
    pub status: ShelfStatus,
}

/// Declared schema of a multi-file input slot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlotSchema {
    #[serde(rename = "type")]
    pub kind: String,
}

/// One multi-file input slot declared by a workflow bot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputSlot {
    pub name: String,
    #[serde(rename = "type", default)]
    pub file_type: Option<String>,
    pub schema: SlotSchema,
    #[serde(default)]
    pub required: bool,
}

impl InputSlot {
    /// Whether the slot receives a list of URLs instead of a single URL.
    pub fn is_array(&self) -> bool {
        self.schema.kind.starts_with("array")
    }
}

/// Which upstream endpoint a request runs against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetKind {
    /// Draft execution for bots that are not on the market.
    Debug,
    /// Published execution.
    Production,
    /// Continuation of a paused run.
    Resume,
}

impl fmt::Display for TargetKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TargetKind::Debug => write!(f, "debug"),
            TargetKind::Production => write!(f, "production"),
            TargetKind::Resume => write!(f, "resume"),
        }
    }
}

/// Resolved upstream endpoint for one request. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamTarget {
    pub kind: TargetKind,
    pub url: String,
}

/// What the client does with a paused workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkflowOperation {
    /// Answer the pending question.
    Resume,
    /// Skip the pending question and let the workflow continue.
    Ignore,
    /// Terminate the paused run.
    Abort,
}

impl WorkflowOperation {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowOperation::Resume => "resume",
            WorkflowOperation::Ignore => "ignore",
            WorkflowOperation::Abort => "abort",
        }
    }

    /// Operations offered to the client when a run pauses.
    pub fn offered(need_reply: bool) -> Vec<WorkflowOperation> {
        if need_reply {
            vec![WorkflowOperation::Resume, WorkflowOperation::Abort]
        } else {
            vec![
                WorkflowOperation::Resume,
                WorkflowOperation::Ignore,
                WorkflowOperation::Abort,
            ]
        }
    }
}

impl fmt::Display for WorkflowOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of value a paused workflow waits for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ValueKind {
    /// A choice among structured options; answers may arrive as option JSON.
    Option,
    /// Free text.
    Direct,
}

impl ValueKind {
    /// Map an upstream value `type` to a kind. Unknown types are free text.
    pub fn from_tag(tag: &str) -> Self {
        if tag.eq_ignore_ascii_case("option") {
            ValueKind::Option
        } else {
            ValueKind::Direct
        }
    }

    /// Whether `tag` names a value kind the upstream is known to send.
    pub fn is_known_tag(tag: &str) -> bool {
        tag.eq_ignore_ascii_case("option") || tag.eq_ignore_ascii_case("direct")
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            ValueKind::Option => "OPTION",
            ValueKind::Direct => "DIRECT",
        }
    }
}

/// A suspended workflow run waiting for input from (uid, chat_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PauseMarker {
    pub uid: String,
    pub chat_id: i64,
    pub event_id: String,
    pub value_kind: ValueKind,
    pub expires_at: DateTime<Utc>,
}

/// A prompt-comparison debug run whose upstream scaffolding is removed
/// once the run reaches its terminal event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComparisonRun {
    pub flow_id: String,
    pub version: String,
}

/// Payload that starts a fresh workflow run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatPayload {
    pub flow_id: String,
    pub uid: String,
    pub chat_id: i64,
    pub stream: bool,
    pub parameters: Map<String, Value>,
    pub history: Vec<HistoryMessage>,
    #[serde(default)]
    pub ext: Map<String, Value>,
}

/// Payload that continues a paused run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResumePayload {
    pub event_id: String,
    pub event_type: String,
    pub content: String,
}

/// Body sent to the upstream endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum UpstreamPayload {
    Chat(ChatPayload),
    Resume(ResumePayload),
}
