//! ChatStreamController: one workflow run per client stream.
//!
//! `start` and `resume` do the request-scoped work (bot lookup, turn
//! creation, input binding, endpoint selection) and fail with a
//! [`ChatStreamError`] before anything is streamed. The run itself happens
//! in a spawned session task that owns the upstream connection, the
//! reorderer and the answer accumulators, and writes [`StreamFrame`]s to a
//! bounded channel. From then on every failure becomes an `error` frame
//! followed by `end`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures_util::StreamExt;
use serde_json::{Map, Value};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

use flowcast_types::chat::{AnswerKind, AnswerRecord, NewChatTurn};
use flowcast_types::config::{FlowcastConfig, StreamConfig, UpstreamConfig};
use flowcast_types::error::{ChatStreamError, LockError, UpstreamError};
use flowcast_types::event::{EventData, FINISH_STOP, WorkflowChunk, fallback_message};
use flowcast_types::frame::{CompleteInfo, InterruptInfo, SessionInfo, StreamFrame};
use flowcast_types::lock::{FailurePolicy, LockFlavor};
use flowcast_types::workflow::{
    ChatPayload, ComparisonRun, TargetKind, USER_INPUT_PARAM, UpstreamPayload, UpstreamTarget,
    ValueKind, WorkflowOperation,
};

use crate::lock::{LockBackend, LockKey, LockManager, LockOptions};
use crate::repository::bot::WorkflowBotRepository;
use crate::repository::chat::ChatRecordRepository;
use crate::repository::file::FileBindingRepository;
use crate::session::resume::{pending_marker, resume_payload};
use crate::session::store::SessionStore;
use crate::stream::pacer::Pacer;
use crate::stream::registry::{Registration, StreamRegistry};
use crate::stream::reorderer::StreamReorderer;
use crate::upstream::gateway::UpstreamGateway;
use crate::upstream::target::select_target;
use crate::workflow::history::shape_history;
use crate::workflow::input::InputAssembler;

/// Lock guarding a workflow's publish-eligibility flag.
pub const PUBLISH_LOCK_KEY: &str = "workflow:publish:{flow_id}";

/// A request to start a workflow run.
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub uid: String,
    pub chat_id: i64,
    pub bot_id: i64,
    pub ask_text: String,
    pub file_url: Option<String>,
    /// Treat `ask_text` as the answer to the pending pause.
    pub resume: bool,
    /// Workflow version under test, if the run targets a specific version.
    pub version: Option<String>,
    /// Set for prompt-comparison debug runs.
    pub comparison: Option<ComparisonRun>,
}

/// A request to continue a paused run.
#[derive(Debug, Clone)]
pub struct ResumeRequest {
    pub uid: String,
    pub chat_id: i64,
    pub answer: String,
    pub operation: WorkflowOperation,
}

/// A running session as seen by the HTTP layer.
#[derive(Debug)]
pub struct ChatStream {
    pub stream_id: String,
    pub request_id: i64,
    pub frames: mpsc::Receiver<StreamFrame>,
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub upstream: UpstreamConfig,
    pub stream: StreamConfig,
    pub marker_ttl: Duration,
    pub publish_wait: Duration,
    pub publish_lease: Duration,
}

impl ControllerSettings {
    pub fn from_config(config: &FlowcastConfig) -> Self {
        Self {
            upstream: config.upstream.clone(),
            stream: config.stream.clone(),
            marker_ttl: config.resume.marker_ttl(),
            publish_wait: Duration::from_millis(config.lock.publish_wait_ms),
            publish_lease: Duration::from_millis(config.lock.publish_lease_ms),
        }
    }
}

/// Everything the session task needs about its run.
#[derive(Debug)]
struct SessionRun {
    uid: String,
    chat_id: i64,
    req_id: i64,
    flow_id: Option<String>,
    version: Option<String>,
    comparison: Option<ComparisonRun>,
    target: UpstreamTarget,
    payload: UpstreamPayload,
}

/// Per-session accumulators.
#[derive(Debug, Default)]
struct SessionState {
    final_result: String,
    thinking_result: String,
    sid: Option<String>,
    interrupt: Option<EventData>,
    terminal: bool,
    last_publish: Option<bool>,
    frames_sent: usize,
}

#[derive(Debug, Clone, PartialEq)]
enum SessionEnd {
    Completed,
    Suspended,
    Stopped,
    ClientGone,
    UpstreamClosed,
    Failed { code: String, message: String },
}

impl SessionEnd {
    fn failed_upstream(e: UpstreamError) -> Self {
        let message = e.user_message().to_string();
        SessionEnd::Failed {
            code: ChatStreamError::from(e).code().to_string(),
            message,
        }
    }

    fn reason(&self) -> Option<&'static str> {
        match self {
            SessionEnd::Completed => None,
            SessionEnd::Suspended => Some("interrupted"),
            SessionEnd::Stopped => Some("stopped"),
            SessionEnd::ClientGone => Some("client_gone"),
            SessionEnd::UpstreamClosed => Some("upstream_closed"),
            SessionEnd::Failed { .. } => Some("error"),
        }
    }
}

/// Wires input assembly, the upstream gateway, reordering, pacing and the
/// resume protocol into client streams.
///
/// Generic over its ports so flowcast-core never depends on flowcast-infra.
pub struct ChatStreamController<C, F, B, S, L, U>
where
    L: LockBackend,
{
    chats: C,
    files: F,
    bots: B,
    sessions: S,
    locks: LockManager<L>,
    upstream: U,
    registry: StreamRegistry,
    settings: ControllerSettings,
}

impl<C, F, B, S, L, U> ChatStreamController<C, F, B, S, L, U>
where
    C: ChatRecordRepository + 'static,
    F: FileBindingRepository + 'static,
    B: WorkflowBotRepository + 'static,
    S: SessionStore + 'static,
    L: LockBackend + 'static,
    U: UpstreamGateway + 'static,
{
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        chats: C,
        files: F,
        bots: B,
        sessions: S,
        locks: LockManager<L>,
        upstream: U,
        registry: StreamRegistry,
        settings: ControllerSettings,
    ) -> Self {
        Self {
            chats,
            files,
            bots,
            sessions,
            locks,
            upstream,
            registry,
            settings,
        }
    }

    pub fn registry(&self) -> &StreamRegistry {
        &self.registry
    }

    pub fn sessions(&self) -> &S {
        &self.sessions
    }

    pub fn settings(&self) -> &ControllerSettings {
        &self.settings
    }

    /// Start a run for a user question.
    pub async fn start(self: &Arc<Self>, req: StartRequest) -> Result<ChatStream, ChatStreamError> {
        if req.resume {
            return self
                .resume(ResumeRequest {
                    uid: req.uid,
                    chat_id: req.chat_id,
                    answer: req.ask_text,
                    operation: WorkflowOperation::Resume,
                })
                .await;
        }

        let bot = self
            .bots
            .workflow_bot(req.bot_id)
            .await?
            .ok_or(ChatStreamError::BotNotFound(req.bot_id))?;

        let turn = self
            .chats
            .create_turn(&NewChatTurn {
                uid: req.uid.clone(),
                chat_id: req.chat_id,
                ask_text: req.ask_text.clone(),
                file_url: req.file_url.clone(),
            })
            .await?;

        let mut parameters = InputAssembler::new(&self.files).assemble(&bot, &turn).await?;
        parameters.insert(USER_INPUT_PARAM.to_string(), Value::String(req.ask_text.clone()));

        let history = shape_history(
            self.chats
                .history(&req.uid, req.chat_id, Some(turn.req_id))
                .await?,
        );

        let target = if req.comparison.is_some() {
            UpstreamTarget {
                kind: TargetKind::Debug,
                url: self.settings.upstream.debug_url.clone(),
            }
        } else {
            let listing = self.bots.market_listing(req.bot_id).await?;
            select_target(&self.settings.upstream, false, listing.as_ref())
        };

        let mut ext = Map::new();
        if let Some(version) = &req.version {
            ext.insert("version".to_string(), Value::String(version.clone()));
        }

        let payload = UpstreamPayload::Chat(ChatPayload {
            flow_id: bot.flow_id.clone(),
            uid: req.uid.clone(),
            chat_id: req.chat_id,
            stream: true,
            parameters,
            history,
            ext,
        });

        Ok(self.spawn_session(SessionRun {
            uid: req.uid,
            chat_id: req.chat_id,
            req_id: turn.req_id,
            flow_id: Some(bot.flow_id),
            version: req.version,
            comparison: req.comparison,
            target,
            payload,
        }))
    }

    /// Continue the paused run of (uid, chat_id).
    ///
    /// Fails with `NO_PENDING_INTERACTION` when no marker exists. The
    /// marker is left in place; the resumed run clears it when it stops or
    /// replaces it when it pauses again.
    pub async fn resume(self: &Arc<Self>, req: ResumeRequest) -> Result<ChatStream, ChatStreamError> {
        let marker = pending_marker(&self.sessions, &req.uid, req.chat_id).await?;

        let turn = self
            .chats
            .create_turn(&NewChatTurn {
                uid: req.uid.clone(),
                chat_id: req.chat_id,
                ask_text: req.answer.clone(),
                file_url: None,
            })
            .await?;

        let payload = UpstreamPayload::Resume(resume_payload(&marker, req.operation, &req.answer));
        let target = select_target(&self.settings.upstream, true, None);

        Ok(self.spawn_session(SessionRun {
            uid: req.uid,
            chat_id: req.chat_id,
            req_id: turn.req_id,
            flow_id: None,
            version: None,
            comparison: None,
            target,
            payload,
        }))
    }

    /// Terminate a live stream. Unknown ids are not an error.
    pub fn stop(&self, stream_id: &str) -> bool {
        self.registry.stop(stream_id)
    }

    fn spawn_session(self: &Arc<Self>, run: SessionRun) -> ChatStream {
        let stream_id = StreamRegistry::stream_id(run.chat_id, &run.uid);
        let registration = self.registry.register(&stream_id);
        let (tx, rx) = mpsc::channel(self.settings.stream.channel_capacity.max(1));
        let request_id = run.req_id;

        let span = info_span!(
            "chat_stream",
            stream_id = %stream_id,
            uid = %run.uid,
            chat_id = run.chat_id,
            req_id = run.req_id,
            endpoint = %run.target.kind,
        );
        let this = Arc::clone(self);
        let id = stream_id.clone();
        tokio::spawn(async move { this.run_session(id, run, tx, registration).await }.instrument(span));

        ChatStream {
            stream_id,
            request_id,
            frames: rx,
        }
    }

    async fn run_session(
        &self,
        stream_id: String,
        run: SessionRun,
        tx: mpsc::Sender<StreamFrame>,
        registration: Registration,
    ) {
        let token = &registration.token;
        let started = Instant::now();
        info!("Chat stream started");

        let mut state = SessionState::default();
        let mut reorderer = StreamReorderer::started_at(started);
        let pacer = Pacer::from_config(&self.settings.stream);

        let session = StreamFrame::Session(SessionInfo {
            stream_id: stream_id.clone(),
            request_id: run.req_id,
        });
        let end = if tx.send(session).await.is_err() {
            SessionEnd::ClientGone
        } else {
            self.drive(&run, &tx, token, &mut state, &mut reorderer, &pacer)
                .await
        };

        let forced = reorderer.finish();
        if end != SessionEnd::ClientGone {
            for frame in forced {
                if tx.send(StreamFrame::Data(frame)).await.is_err() {
                    break;
                }
                state.frames_sent += 1;
            }
        }

        self.save_answer(&run, &state, &end).await;

        match &end {
            SessionEnd::ClientGone => {}
            SessionEnd::Failed { code, message } => {
                let _ = tx.send(StreamFrame::error(code, message)).await;
                let _ = tx.send(StreamFrame::end()).await;
            }
            other => {
                let complete = StreamFrame::Complete(CompleteInfo {
                    final_result: state.final_result.clone(),
                    thinking_result: state.thinking_result.clone(),
                    chat_id: run.chat_id,
                    request_id: run.req_id,
                    interrupted: state.interrupt.is_some(),
                    reason: other.reason().map(str::to_string),
                    timestamp: Utc::now(),
                });
                let _ = tx.send(complete).await;
                let _ = tx.send(StreamFrame::end()).await;
            }
        }

        self.registry.remove(&stream_id, registration.seq);
        info!(
            outcome = end.reason().unwrap_or("completed"),
            frames = state.frames_sent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Chat stream closed"
        );
    }

    async fn drive(
        &self,
        run: &SessionRun,
        tx: &mpsc::Sender<StreamFrame>,
        token: &CancellationToken,
        state: &mut SessionState,
        reorderer: &mut StreamReorderer,
        pacer: &Pacer,
    ) -> SessionEnd {
        let opened = tokio::select! {
            biased;
            _ = token.cancelled() => return SessionEnd::Stopped,
            _ = tx.closed() => return SessionEnd::ClientGone,
            opened = self.upstream.open(&run.target, &run.payload) => opened,
        };
        let mut upstream = match opened {
            Ok(stream) => stream,
            Err(e) => {
                error!(error = %e, "Failed to open upstream stream");
                return SessionEnd::failed_upstream(e);
            }
        };

        let idle = self.settings.upstream.idle_timeout();
        loop {
            let next = tokio::select! {
                biased;
                _ = token.cancelled() => return SessionEnd::Stopped,
                _ = tx.closed() => return SessionEnd::ClientGone,
                next = tokio::time::timeout(idle, upstream.next()) => next,
            };

            match next {
                Err(_) => {
                    warn!(idle_secs = idle.as_secs(), "Upstream idle timeout");
                    return SessionEnd::failed_upstream(UpstreamError::Timeout(idle));
                }
                Ok(None) => {
                    return if state.terminal {
                        SessionEnd::Completed
                    } else if state.interrupt.is_some() {
                        SessionEnd::Suspended
                    } else {
                        debug!("Upstream closed without a terminal event");
                        SessionEnd::UpstreamClosed
                    };
                }
                Ok(Some(Err(e))) => {
                    error!(error = %e, "Upstream stream failed");
                    return SessionEnd::failed_upstream(e);
                }
                Ok(Some(Ok(chunk))) => {
                    if let Some(end) = self
                        .handle_chunk(run, chunk, tx, token, state, reorderer, pacer)
                        .await
                    {
                        return end;
                    }
                }
            }
        }
    }

    #[allow(clippy::too_many_arguments)]
    async fn handle_chunk(
        &self,
        run: &SessionRun,
        chunk: WorkflowChunk,
        tx: &mpsc::Sender<StreamFrame>,
        token: &CancellationToken,
        state: &mut SessionState,
        reorderer: &mut StreamReorderer,
        pacer: &Pacer,
    ) -> Option<SessionEnd> {
        if state.sid.is_none() {
            state.sid = chunk.id.clone();
        }

        if let Err(e) = self.update_publish_flag(run, chunk.code, state).await {
            return Some(SessionEnd::Failed {
                code: e.code().to_string(),
                message: e.to_string(),
            });
        }

        if chunk.code != 0 {
            warn!(code = chunk.code, message = %chunk.message, "Upstream reported an error code");
            state.final_result.push_str(fallback_message(chunk.code));
        } else {
            state.final_result.push_str(chunk.content());
            if let Some(reasoning) = chunk.reasoning() {
                state.thinking_result.push_str(reasoning);
            }
        }
        if run.target.kind == TargetKind::Debug {
            if let Some(outputs) = chunk.end_node_outputs() {
                debug!("Recording end node outputs as the answer");
                state.final_result.push_str(&outputs.to_string());
            }
        }

        let suspend = chunk.is_suspend().then(|| chunk.event_data.clone()).flatten();
        let stopped = chunk.choice_finish_reason() == Some(FINISH_STOP);
        let terminal = chunk.is_terminal();

        for frame in reorderer.push(chunk) {
            for (paced, delay) in pacer.pace(frame) {
                if tx.send(StreamFrame::Data(paced)).await.is_err() {
                    return Some(SessionEnd::ClientGone);
                }
                state.frames_sent += 1;
                if !delay.is_zero() {
                    tokio::select! {
                        biased;
                        _ = token.cancelled() => return Some(SessionEnd::Stopped),
                        _ = tx.closed() => return Some(SessionEnd::ClientGone),
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        if let Some(data) = suspend {
            let kind = ValueKind::from_tag(&data.value.kind);
            if let Err(e) = self
                .sessions
                .put(&run.uid, run.chat_id, &data.event_id, kind, self.settings.marker_ttl)
                .await
            {
                error!(error = %e, "Failed to store pause marker");
                return Some(SessionEnd::Failed {
                    code: ChatStreamError::from(e).code().to_string(),
                    message: "Failed to save the pending interaction".to_string(),
                });
            }
            info!(event_id = %data.event_id, value_kind = kind.as_tag(), "Workflow paused for input");

            let interrupt = StreamFrame::Interrupt(InterruptInfo {
                event_id: data.event_id.clone(),
                operations: WorkflowOperation::offered(data.need_reply),
                need_reply: data.need_reply,
                value: data.value.clone(),
            });
            if tx.send(interrupt).await.is_err() {
                state.interrupt = Some(data);
                return Some(SessionEnd::ClientGone);
            }
            state.frames_sent += 1;
            state.interrupt = Some(data);
        }

        if stopped {
            if let Err(e) = self.sessions.clear(&run.uid, run.chat_id).await {
                warn!(error = %e, "Failed to clear pause marker");
            }
        }

        if terminal {
            state.terminal = true;
            if let Some(comparison) = &run.comparison {
                match self.upstream.delete_comparisons(comparison).await {
                    Ok(()) => debug!(flow_id = %comparison.flow_id, "Comparison scaffolding removed"),
                    Err(e) => warn!(
                        flow_id = %comparison.flow_id,
                        version = %comparison.version,
                        error = %e,
                        "Failed to remove comparison scaffolding"
                    ),
                }
            }
        }

        None
    }

    /// Keep the workflow's publish flag in line with the latest result.
    async fn update_publish_flag(
        &self,
        run: &SessionRun,
        code: i64,
        state: &mut SessionState,
    ) -> Result<(), LockError> {
        if run.comparison.is_some() {
            return Ok(());
        }
        let Some(flow_id) = run.flow_id.as_deref() else {
            return Ok(());
        };

        let can_publish = code == 0 && run.version.is_none();
        if state.last_publish == Some(can_publish) {
            return Ok(());
        }

        let opts = LockOptions::new(LockKey::template(PUBLISH_LOCK_KEY))
            .flavor(LockFlavor::Mutex)
            .wait(self.settings.publish_wait)
            .lease(self.settings.publish_lease)
            .policy(FailurePolicy::Proceed)
            .description("update workflow publish eligibility");

        let updated = self
            .locks
            .run(&opts, &[("flow_id", flow_id)], || {
                self.bots.set_can_publish(flow_id, can_publish)
            })
            .await?;
        if let Some(Err(e)) = updated {
            warn!(flow_id, error = %e, "Failed to update publish flag");
        }

        state.last_publish = Some(can_publish);
        Ok(())
    }

    async fn save_answer(&self, run: &SessionRun, state: &SessionState, end: &SessionEnd) {
        let (kind, content) = match &state.interrupt {
            Some(data) => {
                let mut value = data.value.clone();
                value.message = Some(state.final_result.clone());
                let content = serde_json::to_string(&value).unwrap_or_else(|e| {
                    warn!(error = %e, "Failed to serialize pause value");
                    state.final_result.clone()
                });
                (AnswerKind::Interrupt, content)
            }
            None => (AnswerKind::Text, state.final_result.clone()),
        };

        let answer = AnswerRecord {
            req_id: run.req_id,
            uid: run.uid.clone(),
            chat_id: run.chat_id,
            content,
            reasoning: state.thinking_result.clone(),
            sid: state.sid.clone(),
            kind,
            complete: matches!(end, SessionEnd::Completed | SessionEnd::Suspended),
        };

        if let Err(e) = self.chats.save_answer(&answer).await {
            error!(error = %e, "Failed to save answer");
        }
    }
}
