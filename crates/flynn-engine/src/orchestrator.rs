//! The conversation loop.
//!
//! `submit` accepts one user turn and drives the model/tool cycle to a
//! terminal event. The recursion of the underlying protocol (call model,
//! maybe execute tools, call model again) is flattened into an explicit
//! loop over `RunState` so cancellation and depth stay observable.
//!
//! Cancellation contract: one token per submit. Abort takes effect at the
//! next suspension point; tool calls that were pending when the token
//! fired are resolved as aborted results so every tool call in history
//! has a matching result before the loop exits.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use flynn_core::errors::ProviderError;
use flynn_core::events::AgentEvent;
use flynn_core::ids::SessionId;
use flynn_core::messages::{AssistantTurn, Message, ToolCallBlock, ToolResult};
use flynn_core::provider::{LlmContext, LlmProvider, StreamOptions, Summarizer};
use flynn_core::session::Session;
use flynn_core::store::SessionStore;
use flynn_core::stream::StreamEvent;
use flynn_core::tools::ToolContext;

use crate::compression::CompressionController;
use crate::error::EngineError;
use crate::executor::ToolExecutor;
use crate::registry::ToolRegistry;

const DEFAULT_MAX_TURNS: u32 = 50;
const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);
const PREVIEW_CHARS: usize = 200;

pub struct OrchestratorConfig {
    pub system_prompt: Option<String>,
    pub stream_options: StreamOptions,
    /// Cap on model calls per submit, bounding runaway tool loops.
    pub max_turns: u32,
    pub tool_timeout: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            system_prompt: None,
            stream_options: StreamOptions::default(),
            max_turns: DEFAULT_MAX_TURNS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// Where the loop stands between suspension points.
enum RunState {
    AwaitingModel,
    ExecutingTools(Vec<ToolCallBlock>),
    Done,
    Aborted,
}

/// How one model call ended.
enum ModelOutcome {
    Turn(AssistantTurn),
    Aborted,
    Failed(ProviderError),
}

pub struct ConversationOrchestrator {
    inner: Arc<Inner>,
}

struct Inner {
    provider: Arc<dyn LlmProvider>,
    executor: ToolExecutor,
    compressor: CompressionController,
    store: Mutex<Option<Arc<dyn SessionStore>>>,
    session: Mutex<Session>,
    /// Token of the active run, if any. One run per session at a time.
    active: Mutex<Option<CancellationToken>>,
    config: OrchestratorConfig,
}

impl ConversationOrchestrator {
    pub fn new(
        session: Session,
        provider: Arc<dyn LlmProvider>,
        registry: Arc<ToolRegistry>,
        summarizer: Arc<dyn Summarizer>,
        config: OrchestratorConfig,
    ) -> Self {
        let executor = ToolExecutor::new(registry).with_tool_timeout(config.tool_timeout);
        Self {
            inner: Arc::new(Inner {
                provider,
                executor,
                compressor: CompressionController::new(summarizer),
                store: Mutex::new(None),
                session: Mutex::new(session),
                active: Mutex::new(None),
                config,
            }),
        }
    }

    /// Attach a session store. History is saved through it after every
    /// mutation; without one the session lives only in memory.
    pub fn with_store(self, store: Arc<dyn SessionStore>) -> Self {
        *self.inner.store.lock() = Some(store);
        self
    }

    pub fn session_id(&self) -> SessionId {
        self.inner.session.lock().id.clone()
    }

    /// Append-only snapshot of the conversation for UI readers.
    pub fn session(&self) -> Session {
        self.inner.session.lock().clone()
    }

    pub fn is_running(&self) -> bool {
        self.inner.active.lock().is_some()
    }

    /// Cancel the active run. Returns false when no run is active.
    /// Background shells are unaffected; their lifecycle is independent.
    pub fn abort(&self) -> bool {
        match &*self.inner.active.lock() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Accept one user turn. Returns the run's event stream; exactly one
    /// terminal event (`final_text`, `aborted`, or `error`) ends it.
    pub fn submit(
        &self,
        text: impl Into<String>,
        images: Vec<String>,
    ) -> Result<UnboundedReceiverStream<AgentEvent>, EngineError> {
        let cancel = CancellationToken::new();
        {
            let mut active = self.inner.active.lock();
            if active.is_some() {
                return Err(EngineError::Busy);
            }
            *active = Some(cancel.clone());
        }

        let (tx, rx) = mpsc::unbounded_channel();
        let inner = Arc::clone(&self.inner);
        let text = text.into();
        tokio::spawn(async move {
            inner.run(text, images, cancel, tx).await;
            inner.active.lock().take();
        });
        Ok(UnboundedReceiverStream::new(rx))
    }
}

impl Inner {
    async fn run(
        &self,
        text: String,
        images: Vec<String>,
        cancel: CancellationToken,
        tx: mpsc::UnboundedSender<AgentEvent>,
    ) {
        let session_id = {
            let mut s = self.session.lock();
            s.record_input(&text);
            s.push(if images.is_empty() {
                Message::user_text(&text)
            } else {
                Message::user_with_images(&text, images)
            });
            s.id.clone()
        };
        self.save_session();
        info!(session_id = %session_id, "run started");

        let mut state = RunState::AwaitingModel;
        let mut turn = 0u32;

        loop {
            state = match state {
                RunState::AwaitingModel => {
                    // Outstanding tool calls are already resolved here, so
                    // this is the point where cancellation is honored
                    // before committing to another model call.
                    if cancel.is_cancelled() {
                        self.emit(&tx, AgentEvent::Aborted { session_id: session_id.clone() });
                        RunState::Aborted
                    } else {
                        turn += 1;
                        if turn > self.config.max_turns {
                            warn!(session_id = %session_id, max_turns = self.config.max_turns, "turn cap hit");
                            self.emit(
                                &tx,
                                AgentEvent::Error {
                                    session_id: session_id.clone(),
                                    message: EngineError::MaxTurnsExceeded(self.config.max_turns)
                                        .to_string(),
                                },
                            );
                            RunState::Done
                        } else {
                            self.model_step(&session_id, &cancel, &tx).await
                        }
                    }
                }
                RunState::ExecutingTools(calls) => {
                    self.execute_tools(&session_id, &calls, &cancel, &tx).await;
                    self.save_session();
                    if cancel.is_cancelled() {
                        self.emit(&tx, AgentEvent::Aborted { session_id: session_id.clone() });
                        RunState::Aborted
                    } else {
                        RunState::AwaitingModel
                    }
                }
                RunState::Done | RunState::Aborted => break,
            };
            if matches!(state, RunState::Done | RunState::Aborted) {
                break;
            }
        }
        info!(session_id = %session_id, turns = turn, "run finished");
    }

    /// One model call: stream deltas out, accumulate the turn, record
    /// usage, and check compression. Returns the next state.
    async fn model_step(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<AgentEvent>,
    ) -> RunState {
        self.emit(tx, AgentEvent::ThinkingStarted { session_id: session_id.clone() });

        let outcome = self.call_model(session_id, cancel, tx).await;
        self.emit(tx, AgentEvent::ThinkingEnded { session_id: session_id.clone() });

        let turn = match outcome {
            ModelOutcome::Turn(turn) => turn,
            ModelOutcome::Aborted => {
                self.emit(tx, AgentEvent::Aborted { session_id: session_id.clone() });
                return RunState::Aborted;
            }
            ModelOutcome::Failed(e) => {
                // Terminal for the turn; the orchestrator never retries.
                warn!(session_id = %session_id, error = %e, "model call failed");
                self.emit(
                    tx,
                    AgentEvent::Error {
                        session_id: session_id.clone(),
                        message: e.to_string(),
                    },
                );
                return RunState::Done;
            }
        };

        let usage = turn.usage;
        {
            let mut s = self.session.lock();
            if let Some(u) = &usage {
                s.total_tokens = u.total_tokens();
            }
            s.push(turn.clone().into_message());
        }
        self.save_session();

        // Checked after every model call that reports usage, independent
        // of whether tools were requested.
        if let Some(u) = usage {
            let total = u.total_tokens();
            if self.compressor.triggered(self.session.lock().messages.len(), total) {
                self.emit(
                    tx,
                    AgentEvent::CompressionStarted { session_id: session_id.clone() },
                );
                if let Some(report) = self.compressor.compress(&self.session, total, cancel).await {
                    self.emit(
                        tx,
                        AgentEvent::CompressionComplete {
                            session_id: session_id.clone(),
                            tokens_before: report.tokens_before,
                            messages_removed: report.messages_removed,
                        },
                    );
                    self.save_session();
                }
            }
        }

        let calls: Vec<ToolCallBlock> = turn.tool_calls().into_iter().cloned().collect();
        if calls.is_empty() {
            self.emit(
                tx,
                AgentEvent::FinalText {
                    session_id: session_id.clone(),
                    text: turn.text(),
                },
            );
            RunState::Done
        } else {
            RunState::ExecutingTools(calls)
        }
    }

    async fn call_model(
        &self,
        session_id: &SessionId,
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<AgentEvent>,
    ) -> ModelOutcome {
        let context = LlmContext {
            messages: self.session.lock().messages.clone(),
            system_prompt: self.config.system_prompt.clone(),
            tools: self.executor.registry().definitions(),
        };

        let mut stream = match self
            .provider
            .stream(&context, &self.config.stream_options)
            .await
        {
            Ok(stream) => stream,
            Err(e) => return ModelOutcome::Failed(e),
        };

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return ModelOutcome::Aborted,
                event = stream.next() => match event {
                    Some(StreamEvent::TextDelta { delta }) => {
                        self.emit(tx, AgentEvent::TextDelta {
                            session_id: session_id.clone(),
                            delta,
                        });
                    }
                    Some(StreamEvent::ThinkingDelta { delta }) => {
                        self.emit(tx, AgentEvent::ThinkingDelta {
                            session_id: session_id.clone(),
                            delta,
                        });
                    }
                    Some(StreamEvent::Done { turn }) => return ModelOutcome::Turn(turn),
                    Some(StreamEvent::Error { error }) => return ModelOutcome::Failed(error),
                    Some(_) => {}
                    None => {
                        return ModelOutcome::Failed(ProviderError::StreamInterrupted(
                            "stream ended without a final message".into(),
                        ))
                    }
                },
            }
        }
    }

    /// Execute the turn's tool calls sequentially, in the order received.
    /// Calls still pending when the token fires resolve as aborted
    /// results, keeping the call/result pairing intact.
    async fn execute_tools(
        &self,
        session_id: &SessionId,
        calls: &[ToolCallBlock],
        cancel: &CancellationToken,
        tx: &mpsc::UnboundedSender<AgentEvent>,
    ) {
        let workdir = self.session.lock().workdir.clone();
        let ctx = ToolContext::new(session_id.clone(), workdir).with_abort(cancel.clone());

        for call in calls {
            self.emit(
                tx,
                AgentEvent::ToolStarted {
                    session_id: session_id.clone(),
                    tool_call_id: call.id.clone(),
                    tool_name: call.name.clone(),
                },
            );

            let start = Instant::now();
            let result = if cancel.is_cancelled() {
                ToolResult::aborted()
            } else {
                self.executor.run(call, &ctx).await
            };

            self.emit(
                tx,
                AgentEvent::ToolFinished {
                    session_id: session_id.clone(),
                    tool_call_id: call.id.clone(),
                    success: result.success,
                    preview: preview_of(&result),
                    duration_ms: start.elapsed().as_millis() as u64,
                },
            );

            self.session
                .lock()
                .push(Message::tool_result(call.id.clone(), result));
        }
    }

    fn emit(&self, tx: &mpsc::UnboundedSender<AgentEvent>, event: AgentEvent) {
        if tx.send(event).is_err() {
            warn!("event receiver dropped, event discarded");
        }
    }

    fn save_session(&self) {
        let store = self.store.lock().clone();
        if let Some(store) = store {
            let session = self.session.lock().clone();
            if let Err(e) = store.save(&session) {
                // Persistence is best-effort; the turn carries on.
                warn!(session_id = %session.id, error = %e, "session save failed");
            }
        }
    }
}

fn preview_of(result: &ToolResult) -> String {
    result
        .short_result
        .clone()
        .unwrap_or_else(|| result.content.chars().take(PREVIEW_CHARS).collect())
}
