//! Chat turn, history, file binding and answer types.
//!
//! A `ChatTurn` is created once per user message and never mutated; the
//! answer the workflow produces for it is stored separately as an
//! `AnswerRecord` keyed by the turn's `req_id`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use std::fmt;

/// One user message within a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatTurn {
    pub uid: String,
    pub chat_id: i64,
    pub req_id: i64,
    pub ask_text: String,
    pub file_url: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Fields needed to create a [`ChatTurn`]; the store assigns `req_id`.
#[derive(Debug, Clone)]
pub struct NewChatTurn {
    pub uid: String,
    pub chat_id: i64,
    pub ask_text: String,
    pub file_url: Option<String>,
}

/// A part of a multimodal message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentPart {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

/// Message content: plain text or a list of multimodal parts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    /// Concatenated text of the content, ignoring non-text parts.
    pub fn text(&self) -> String {
        match self {
            MessageContent::Text(s) => s.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .filter(|p| p.kind == "text")
                .filter_map(|p| p.text.as_deref())
                .collect::<Vec<_>>()
                .join(""),
        }
    }
}

/// One entry of the ordered conversation history for a chat.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryMessage {
    pub role: String,
    pub content: MessageContent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

impl HistoryMessage {
    pub fn text(role: &str, content: &str) -> Self {
        Self {
            role: role.to_string(),
            content: MessageContent::Text(content.to_string()),
            content_type: None,
        }
    }
}

/// Where an attached file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileSource {
    /// Image or document attached to a multimodal model input.
    ModelAttachment,
    /// Generic upload from the chat box.
    Upload,
}

impl fmt::Display for FileSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileSource::ModelAttachment => write!(f, "model_attachment"),
            FileSource::Upload => write!(f, "upload"),
        }
    }
}

impl std::str::FromStr for FileSource {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "model_attachment" => Ok(FileSource::ModelAttachment),
            "upload" => Ok(FileSource::Upload),
            other => Err(format!("invalid file source: '{other}'")),
        }
    }
}

/// A file attached to a chat, possibly already consumed by a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatFile {
    pub id: i64,
    pub uid: String,
    pub chat_id: i64,
    pub url: String,
    pub source: FileSource,
    /// Workflow input slot this file was uploaded for, if any.
    pub param_name: Option<String>,
    /// The turn that consumed this file. `None` while still unbound.
    pub req_id: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// How a saved answer should be interpreted when replayed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerKind {
    /// Ordinary text answer.
    Text,
    /// The workflow paused; the answer holds the serialized pause value.
    Interrupt,
}

impl fmt::Display for AnswerKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnswerKind::Text => write!(f, "text"),
            AnswerKind::Interrupt => write!(f, "interrupt"),
        }
    }
}

/// The workflow's answer to one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnswerRecord {
    pub req_id: i64,
    pub uid: String,
    pub chat_id: i64,
    pub content: String,
    pub reasoning: String,
    pub sid: Option<String>,
    pub kind: AnswerKind,
    /// False when the stream was stopped or the client left mid-answer.
    pub complete: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_content_text_from_parts() {
        let content = MessageContent::Parts(vec![
            ContentPart {
                kind: "text".to_string(),
                text: Some("Hello ".to_string()),
                url: None,
            },
            ContentPart {
                kind: "image_url".to_string(),
                text: None,
                url: Some("http://x/a.png".to_string()),
            },
            ContentPart {
                kind: "text".to_string(),
                text: Some("world".to_string()),
                url: None,
            },
        ]);
        assert_eq!(content.text(), "Hello world");
    }

    #[test]
    fn test_message_content_untagged_roundtrip() {
        let msg: HistoryMessage =
            serde_json::from_str(r#"{"role":"user","content":"hi"}"#).unwrap();
        assert_eq!(msg.content, MessageContent::Text("hi".to_string()));

        let msg: HistoryMessage = serde_json::from_str(
            r#"{"role":"user","content":[{"type":"text","text":"a"}],"content_type":"multimodal"}"#,
        )
        .unwrap();
        assert!(matches!(msg.content, MessageContent::Parts(ref p) if p.len() == 1));
        assert_eq!(msg.content_type.as_deref(), Some("multimodal"));
    }

    #[test]
    fn test_file_source_parse() {
        assert_eq!("upload".parse::<FileSource>().unwrap(), FileSource::Upload);
        assert_eq!(FileSource::ModelAttachment.to_string(), "model_attachment");
        assert!("other".parse::<FileSource>().is_err());
    }
}
