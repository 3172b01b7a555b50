//! Conversation history as the workflow expects it.

use flowcast_types::chat::{HistoryMessage, MessageContent};
use flowcast_types::workflow::ValueKind;
use serde_json::Value;

/// Prepare stored history for the upstream payload.
///
/// Multimodal messages are flattened to their text. A stored pause value
/// (the JSON an interrupted answer is saved as) is dropped together with
/// the message after it, since that pair is a resume exchange rather than
/// conversation.
pub fn shape_history(messages: Vec<HistoryMessage>) -> Vec<HistoryMessage> {
    let mut shaped = Vec::with_capacity(messages.len());
    let mut skip_next = false;

    for message in messages {
        if skip_next {
            skip_next = false;
            continue;
        }
        let text = message.content.text();
        if is_pause_value(&text) {
            skip_next = true;
            continue;
        }
        shaped.push(HistoryMessage {
            role: message.role,
            content: MessageContent::Text(text),
            content_type: None,
        });
    }

    shaped
}

fn is_pause_value(text: &str) -> bool {
    if !text.trim_start().starts_with('{') {
        return false;
    }
    match serde_json::from_str::<Value>(text) {
        Ok(Value::Object(obj)) => obj
            .get("type")
            .and_then(Value::as_str)
            .is_some_and(ValueKind::is_known_tag),
        _ => false,
    }
}
