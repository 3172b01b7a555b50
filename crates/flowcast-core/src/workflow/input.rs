//! InputAssembler: binds attached files to workflow input parameters.
//!
//! Two strategies, tried in order:
//!
//! 1. Multi-file: the bot declares named slots (`extra_inputs_config`).
//!    Files uploaded for a slot are bound to it, as a list when the slot
//!    is array-typed and as the newest URL otherwise.
//! 2. Single parameter: the bot declares one file parameter
//!    (`extra_inputs`). The explicit upload URL wins; otherwise the newest
//!    unbound model attachment or chat upload is used.
//!
//! Every file used is bound to the turn's `req_id` so later turns do not
//! pick it up again.

use std::collections::HashSet;

use flowcast_types::chat::{ChatFile, ChatTurn, FileSource};
use flowcast_types::error::{ChatStreamError, RepositoryError};
use flowcast_types::workflow::{InputSlot, WorkflowBot};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::repository::file::FileBindingRepository;

/// The single file parameter a bot declares.
#[derive(Debug, Clone, PartialEq, Eq)]
struct FileParam {
    name: String,
    is_array: bool,
}

pub struct InputAssembler<'a, F: FileBindingRepository> {
    files: &'a F,
}

impl<'a, F: FileBindingRepository> InputAssembler<'a, F> {
    pub fn new(files: &'a F) -> Self {
        Self { files }
    }

    /// Workflow input parameters for `turn`, excluding the question itself.
    ///
    /// Malformed input declarations are logged and skipped; only storage
    /// failures are returned.
    pub async fn assemble(
        &self,
        bot: &WorkflowBot,
        turn: &ChatTurn,
    ) -> Result<Map<String, Value>, RepositoryError> {
        let unbound = self.files.unbound_files(&turn.uid, turn.chat_id).await?;

        let slots = parse_slots(bot).unwrap_or_else(|e| {
            warn!(bot_id = bot.bot_id, error.kind = e.code(), error = %e, "Skipping multi-file binding");
            Vec::new()
        });

        let (params, touched) = bind_slots(&slots, &unbound);
        if !params.is_empty() {
            self.bind(&touched, turn.req_id).await?;
            debug!(req_id = turn.req_id, slots = params.len(), "Bound multi-file inputs");
            return Ok(params);
        }

        let param = match parse_file_param(bot) {
            Ok(Some(param)) => param,
            Ok(None) => return Ok(Map::new()),
            Err(e) => {
                warn!(bot_id = bot.bot_id, error.kind = e.code(), error = %e, "Skipping file binding");
                return Ok(Map::new());
            }
        };

        let (url, touched) = match turn.file_url.as_deref().filter(|u| !u.is_empty()) {
            Some(url) => {
                let touched = unbound
                    .iter()
                    .filter(|f| f.param_name.is_none() && f.url == url)
                    .map(|f| f.id)
                    .collect::<Vec<_>>();
                (url.to_string(), touched)
            }
            None => match latest_candidate(&unbound) {
                Some(file) => (file.url.clone(), vec![file.id]),
                None => return Ok(Map::new()),
            },
        };

        self.bind(&touched, turn.req_id).await?;

        let value = if param.is_array {
            Value::Array(vec![Value::String(url)])
        } else {
            Value::String(url)
        };
        let mut params = Map::new();
        params.insert(param.name, value);
        Ok(params)
    }

    async fn bind(&self, file_ids: &[i64], req_id: i64) -> Result<(), RepositoryError> {
        if file_ids.is_empty() {
            return Ok(());
        }
        self.files.bind_files(file_ids, req_id).await
    }
}

fn parse_slots(bot: &WorkflowBot) -> Result<Vec<InputSlot>, ChatStreamError> {
    match bot.extra_inputs_config.as_deref().map(str::trim) {
        None | Some("") => Ok(Vec::new()),
        Some(raw) => serde_json::from_str(raw)
            .map_err(|e| ChatStreamError::InputBinding(format!("extra_inputs_config: {e}"))),
    }
}

/// The first parameter in declaration order; relies on serde_json `preserve_order`.
fn parse_file_param(bot: &WorkflowBot) -> Result<Option<FileParam>, ChatStreamError> {
    let raw = match bot.extra_inputs.as_deref().map(str::trim) {
        None | Some("") => return Ok(None),
        Some(raw) => raw,
    };
    let declared: Map<String, Value> = serde_json::from_str(raw)
        .map_err(|e| ChatStreamError::InputBinding(format!("extra_inputs: {e}")))?;

    Ok(declared.into_iter().next().map(|(name, kind)| FileParam {
        is_array: kind.as_str().is_some_and(|k| k.starts_with("array")),
        name,
    }))
}

/// Slot parameters and the ids of the files bound to them.
fn bind_slots(slots: &[InputSlot], unbound: &[ChatFile]) -> (Map<String, Value>, Vec<i64>) {
    let mut params = Map::new();
    let mut touched = Vec::new();
    let mut seen = HashSet::new();

    for slot in slots {
        if !seen.insert(slot.name.as_str()) {
            continue;
        }
        let mut files = unbound
            .iter()
            .filter(|f| f.param_name.as_deref() == Some(slot.name.as_str()))
            .collect::<Vec<_>>();
        if files.is_empty() {
            continue;
        }
        files.sort_by_key(|f| (f.created_at, f.id));

        let value = if slot.is_array() {
            Value::Array(files.iter().map(|f| Value::String(f.url.clone())).collect())
        } else {
            match files.last() {
                Some(newest) => Value::String(newest.url.clone()),
                None => continue,
            }
        };
        params.insert(slot.name.clone(), value);
        touched.extend(files.iter().map(|f| f.id));
    }

    (params, touched)
}

/// Newest of the latest model attachment and the latest chat upload.
fn latest_candidate(unbound: &[ChatFile]) -> Option<&ChatFile> {
    let latest = |source: FileSource| {
        unbound
            .iter()
            .filter(|f| f.param_name.is_none() && f.source == source)
            .max_by_key(|f| (f.created_at, f.id))
    };

    match (latest(FileSource::ModelAttachment), latest(FileSource::Upload)) {
        (Some(a), Some(u)) => Some(if u.created_at > a.created_at { u } else { a }),
        (a, u) => a.or(u),
    }
}
