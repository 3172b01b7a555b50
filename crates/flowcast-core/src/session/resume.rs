//! Resume request handling: marker lookup and answer normalisation.

use flowcast_types::error::ChatStreamError;
use flowcast_types::workflow::{PauseMarker, ResumePayload, ValueKind, WorkflowOperation};
use serde_json::Value;
use tracing::{debug, warn};

use super::store::SessionStore;

/// Load the pause marker a resume must continue from.
pub async fn pending_marker<S: SessionStore>(
    store: &S,
    uid: &str,
    chat_id: i64,
) -> Result<PauseMarker, ChatStreamError> {
    store
        .get(uid, chat_id)
        .await?
        .ok_or_else(|| ChatStreamError::NoPendingInteraction {
            uid: uid.to_string(),
            chat_id,
        })
}

/// Content forwarded upstream for a client answer.
///
/// For option prompts the client may send the whole option object; its
/// `id` is what the workflow expects. Anything that does not parse as an
/// option with an id is forwarded as typed.
pub fn resume_content(kind: ValueKind, answer: &str) -> String {
    if kind != ValueKind::Option {
        return answer.to_string();
    }

    match serde_json::from_str::<Value>(answer) {
        Ok(Value::Object(option)) => match option.get("id") {
            Some(Value::String(id)) => id.clone(),
            Some(Value::Number(id)) => id.to_string(),
            _ => {
                debug!("option answer has no id, forwarding verbatim");
                answer.to_string()
            }
        },
        Ok(_) => answer.to_string(),
        Err(e) => {
            warn!(error = %e, "option answer is not JSON, forwarding verbatim");
            answer.to_string()
        }
    }
}

/// Build the upstream resume payload for `marker`.
pub fn resume_payload(
    marker: &PauseMarker,
    operation: WorkflowOperation,
    answer: &str,
) -> ResumePayload {
    ResumePayload {
        event_id: marker.event_id.clone(),
        event_type: operation.as_str().to_string(),
        content: resume_content(marker.value_kind, answer),
    }
}
