//! Tool execution loop - the core conversation engine.
//!
//! One turn sends the conversation to the model, runs any tool calls it
//! makes, feeds the results back and repeats until the model answers
//! without tools, the round limit is hit, or a call needs approval.
//!
//! The loop is an explicit state machine:
//!
//! ```text
//! AwaitingModel -> InspectingResponse -> ExecutingTools -> AwaitingModel ...
//!                                     \-> Done(status)
//! any state ----------------------------> Failed(error)
//! ```
//!
//! Everything within a turn is sequential. Async is only used so that
//! timeouts, cancellation and child-process killing compose.

use crate::conversation::{ConversationStore, OperationStatus, PendingOperation, StoredMessage};
use crate::error::{ConversationError, CoreError, CoreResult};
use sidecode_provider::{
    BoxedLanguageModel, ChatRequest, Message, NormalizedResponse, ProviderError, ResponseOutput,
    SystemPrompt, ToolCall, ToolChoice, ToolResult,
};
use sidecode_tools::{ToolContext, ToolRegistry, DEFAULT_TOOL_TIMEOUT};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

/// System prompt used unless one is supplied.
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a coding assistant working inside a single \
project directory. Use the provided tools to inspect and change files and to run commands. \
All paths are relative to the project root; you cannot reach files outside it. Keep answers \
short and say what you changed.";

/// Tuning for one turn.
#[derive(Debug, Clone, PartialEq)]
pub struct LoopConfig {
    /// Provider calls allowed per turn.
    pub max_rounds: usize,
    /// Run tool calls without asking. When false, calls are held for approval.
    pub auto_execute_tools: bool,
    /// Messages sent to the model per round.
    pub max_context_messages: usize,
    pub max_tokens: u32,
    pub tool_choice: ToolChoice,
    /// Return the full response instead of just its text.
    pub structured_output: bool,
    /// Deadline for a single provider call.
    pub round_timeout: Duration,
    /// Deadline for a single tool invocation.
    pub tool_timeout: Duration,
    /// In manual mode, run a batch without asking when every call in it is
    /// read-only. Off by default.
    pub auto_approve_read_only: bool,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            max_rounds: 5,
            auto_execute_tools: true,
            max_context_messages: 50,
            max_tokens: 4096,
            tool_choice: ToolChoice::Auto,
            structured_output: false,
            round_timeout: Duration::from_secs(120),
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
            auto_approve_read_only: false,
        }
    }
}

impl LoopConfig {
    /// Hold tool calls for approval instead of running them.
    pub fn manual(mut self) -> Self {
        self.auto_execute_tools = false;
        self
    }

    pub fn with_max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }
}

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnStatus {
    /// The model answered without requesting tools.
    Completed,
    /// The model was still requesting tools after `max_rounds` calls.
    LoopLimitExceeded,
    /// Tool calls are waiting in the conversation's approval queue.
    AwaitingApproval,
}

impl TurnStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TurnStatus::Completed => "completed",
            TurnStatus::LoopLimitExceeded => "loop_limit_exceeded",
            TurnStatus::AwaitingApproval => "awaiting_approval",
        }
    }
}

/// Result of [`ToolLoop::run_turn`] and [`ToolLoop::resolve_pending`].
#[derive(Debug, Clone)]
pub struct TurnOutcome {
    pub status: TurnStatus,
    pub output: ResponseOutput,
    /// The last model response.
    pub response: NormalizedResponse,
    /// Provider calls made.
    pub rounds: usize,
    /// Results of every tool executed during the turn, in order.
    pub tool_results: Vec<ToolResult>,
    /// Calls held for approval.
    pub pending: Vec<ToolCall>,
}

impl TurnOutcome {
    pub fn text(&self) -> &str {
        self.output.text()
    }
}

/// A decision on one held tool call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Approval {
    pub operation_id: String,
    pub approved: bool,
}

impl Approval {
    pub fn approve(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            approved: true,
        }
    }

    pub fn reject(operation_id: impl Into<String>) -> Self {
        Self {
            operation_id: operation_id.into(),
            approved: false,
        }
    }
}

#[derive(Debug)]
enum LoopState {
    AwaitingModel,
    InspectingResponse(NormalizedResponse),
    ExecutingTools(Vec<ToolCall>),
    Done(TurnStatus),
    Failed(CoreError),
}

impl LoopState {
    fn name(&self) -> &'static str {
        match self {
            LoopState::AwaitingModel => "awaiting_model",
            LoopState::InspectingResponse(_) => "inspecting_response",
            LoopState::ExecutingTools(_) => "executing_tools",
            LoopState::Done(_) => "done",
            LoopState::Failed(_) => "failed",
        }
    }
}

/// Drives turns for conversations in one project.
pub struct ToolLoop {
    store: Arc<ConversationStore>,
    model: BoxedLanguageModel,
    registry: Arc<ToolRegistry>,
    context: ToolContext,
    system: SystemPrompt,
}

impl ToolLoop {
    /// `context` supplies the sandbox and command policy for every tool call.
    pub fn new(
        store: Arc<ConversationStore>,
        model: BoxedLanguageModel,
        registry: Arc<ToolRegistry>,
        context: ToolContext,
    ) -> Self {
        Self {
            store,
            model,
            registry,
            context,
            system: SystemPrompt::from(DEFAULT_SYSTEM_PROMPT),
        }
    }

    pub fn with_system(mut self, system: impl Into<SystemPrompt>) -> Self {
        self.system = system.into();
        self
    }

    pub fn store(&self) -> &Arc<ConversationStore> {
        &self.store
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Run one user turn.
    ///
    /// The user message is persisted before the model is called, so it
    /// survives provider failures and cancellation. Calls still awaiting
    /// approval from an earlier turn are rejected first.
    pub async fn run_turn(
        &self,
        conversation_id: &str,
        user_text: &str,
        config: &LoopConfig,
        cancel: CancellationToken,
    ) -> CoreResult<TurnOutcome> {
        let span = info_span!("turn", conversation = %conversation_id);
        async move {
            info!(
                max_rounds = config.max_rounds,
                manual = !config.auto_execute_tools,
                "Turn started"
            );
            self.supersede_pending(conversation_id).await?;
            self.store
                .append(conversation_id, StoredMessage::new(Message::user(user_text)))
                .await?;
            self.store.persist(conversation_id).await?;

            self.drive(conversation_id, config, cancel, Vec::new()).await
        }
        .instrument(span)
        .await
    }

    /// Apply approval decisions to held calls and continue the turn.
    ///
    /// Approved calls run, rejected ones get an error result. Pending calls
    /// without a decision are rejected.
    pub async fn resolve_pending(
        &self,
        conversation_id: &str,
        approvals: &[Approval],
        config: &LoopConfig,
        cancel: CancellationToken,
    ) -> CoreResult<TurnOutcome> {
        let span = info_span!("turn", conversation = %conversation_id);
        async move {
            let decisions = self
                .store
                .update(conversation_id, |conversation| {
                    if !conversation.has_pending() {
                        return Err(ConversationError::NothingPending {
                            id: conversation.id.clone(),
                        });
                    }
                    for approval in approvals {
                        let known = conversation
                            .pending_operations()
                            .any(|op| op.id == approval.operation_id);
                        if !known {
                            return Err(ConversationError::OperationNotFound {
                                id: approval.operation_id.clone(),
                            });
                        }
                    }

                    let mut decisions = Vec::new();
                    for op in conversation.pending.iter_mut().filter(|op| op.is_pending()) {
                        let approved = approvals
                            .iter()
                            .any(|a| a.operation_id == op.id && a.approved);
                        op.status = if approved {
                            OperationStatus::Approved
                        } else {
                            OperationStatus::Rejected
                        };
                        decisions.push((op.call.clone(), approved));
                    }
                    Ok(decisions)
                })
                .await??;

            info!(operations = decisions.len(), "Resolving pending operations");
            // Approved commands skip the policy's confirmation step
            let ctx = self
                .tool_context(conversation_id, config, &cancel)
                .with_confirmed(true);
            let mut tool_results = Vec::with_capacity(decisions.len());
            for (call, approved) in decisions {
                let result = if approved {
                    self.execute(&call, &ctx).await
                } else {
                    debug!(tool = %call.name, call_id = %call.id, "Call rejected");
                    ToolResult::error(&call, "rejected by user")
                };
                self.store
                    .append(conversation_id, StoredMessage::new(Message::tool_result(&result)))
                    .await?;
                tool_results.push(result);
            }
            self.store.persist(conversation_id).await?;

            self.drive(conversation_id, config, cancel, tool_results).await
        }
        .instrument(span)
        .await
    }

    async fn drive(
        &self,
        id: &str,
        config: &LoopConfig,
        cancel: CancellationToken,
        mut tool_results: Vec<ToolResult>,
    ) -> CoreResult<TurnOutcome> {
        let ctx = self.tool_context(id, config, &cancel);
        let mut rounds = 0;
        let mut last = NormalizedResponse::default();
        let mut pending = Vec::new();
        let mut state = LoopState::AwaitingModel;

        loop {
            debug!(state = state.name(), round = rounds, "Loop state");
            state = match state {
                LoopState::AwaitingModel => {
                    rounds += 1;
                    match self.call_model(id, config, &cancel).await {
                        Ok(response) => LoopState::InspectingResponse(response),
                        Err(e) => LoopState::Failed(e),
                    }
                }

                LoopState::InspectingResponse(response) => {
                    self.record_response(id, &response).await?;
                    let calls = response.tool_calls.clone();
                    last = response;

                    if calls.is_empty() {
                        LoopState::Done(TurnStatus::Completed)
                    } else {
                        if self.needs_approval(&calls, config) {
                            // The whole batch waits so results keep call order
                            self.hold(id, &calls).await?;
                            pending = calls;
                            LoopState::Done(TurnStatus::AwaitingApproval)
                        } else if rounds >= config.max_rounds {
                            warn!(max_rounds = config.max_rounds, "Loop limit reached");
                            self.skip(id, &calls).await?;
                            LoopState::Done(TurnStatus::LoopLimitExceeded)
                        } else {
                            LoopState::ExecutingTools(calls)
                        }
                    }
                }

                LoopState::ExecutingTools(calls) => {
                    self.execute_all(id, &calls, &ctx, &mut tool_results).await?;
                    LoopState::AwaitingModel
                }

                LoopState::Done(status) => {
                    info!(?status, rounds, tools = tool_results.len(), "Turn finished");
                    return Ok(TurnOutcome {
                        status,
                        output: last.clone().into_output(config.structured_output),
                        response: last,
                        rounds,
                        tool_results,
                        pending,
                    });
                }

                LoopState::Failed(error) => {
                    warn!(error = %error, rounds, "Turn failed");
                    self.store.persist(id).await?;
                    return Err(error);
                }
            };
        }
    }

    fn needs_approval(&self, calls: &[ToolCall], config: &LoopConfig) -> bool {
        if config.auto_execute_tools {
            return false;
        }
        !(config.auto_approve_read_only
            && calls.iter().all(|call| self.registry.is_read_only(&call.name)))
    }

    async fn call_model(
        &self,
        id: &str,
        config: &LoopConfig,
        cancel: &CancellationToken,
    ) -> CoreResult<NormalizedResponse> {
        let messages = self
            .store
            .context_slice(id, config.max_context_messages)
            .await?
            .into_iter()
            .map(|m| m.message)
            .collect();
        let request = ChatRequest::new(messages)
            .with_system(self.system.clone())
            .with_tools(self.registry.definitions())
            .with_tool_choice(config.tool_choice.clone())
            .with_max_tokens(config.max_tokens);

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(CoreError::Cancelled),
            result = tokio::time::timeout(
                config.round_timeout,
                self.model.complete(request, cancel.child_token()),
            ) => match result {
                Ok(Ok(response)) => Ok(response),
                Ok(Err(ProviderError::Cancelled)) => Err(CoreError::Cancelled),
                Ok(Err(e)) => Err(e.into()),
                Err(_) => Err(CoreError::Timeout(config.round_timeout)),
            },
        }
    }

    async fn record_response(&self, id: &str, response: &NormalizedResponse) -> CoreResult<()> {
        let message =
            StoredMessage::new(response.to_message()).with_usage(response.usage, response.cost);
        let model = response.model.clone();
        let provider = self.model.provider_id().to_string();
        self.store
            .update(id, move |conversation| {
                conversation.push(message);
                if !model.is_empty() {
                    conversation.stats.model = Some(model);
                }
                conversation.stats.provider = Some(provider);
            })
            .await?;
        self.store.persist(id).await
    }

    /// Run `calls` in order, appending one result message each, then persist.
    async fn execute_all(
        &self,
        id: &str,
        calls: &[ToolCall],
        ctx: &ToolContext,
        tool_results: &mut Vec<ToolResult>,
    ) -> CoreResult<()> {
        for call in calls {
            let result = self.execute(call, ctx).await;
            self.store
                .append(id, StoredMessage::new(Message::tool_result(&result)))
                .await?;
            tool_results.push(result);
        }
        if !calls.is_empty() {
            self.store.persist(id).await?;
        }
        Ok(())
    }

    async fn execute(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        info!(tool = %call.name, call_id = %call.id, "Executing tool");
        let result = self.registry.invoke(call, ctx).await;
        if result.is_error {
            warn!(tool = %call.name, error = %result.content_text(), "Tool call failed");
        }
        result
    }

    /// Queue `calls` for approval.
    async fn hold(&self, id: &str, calls: &[ToolCall]) -> CoreResult<()> {
        info!(calls = calls.len(), "Holding tool calls for approval");
        let ops: Vec<_> = calls.iter().cloned().map(PendingOperation::new).collect();
        self.store
            .update(id, move |conversation| conversation.pending.extend(ops))
            .await?;
        self.store.persist(id).await
    }

    /// Answer calls that will never run so the history stays well formed.
    async fn skip(&self, id: &str, calls: &[ToolCall]) -> CoreResult<()> {
        for call in calls {
            let result = ToolResult::error(call, "not executed: tool round limit reached");
            self.store
                .append(id, StoredMessage::new(Message::tool_result(&result)))
                .await?;
        }
        self.store.persist(id).await
    }

    /// Reject calls left pending by an earlier turn.
    async fn supersede_pending(&self, id: &str) -> CoreResult<()> {
        let superseded = self
            .store
            .update(id, |conversation| {
                let calls: Vec<ToolCall> = conversation
                    .pending
                    .iter_mut()
                    .filter(|op| op.is_pending())
                    .map(|op| {
                        op.status = OperationStatus::Rejected;
                        op.call.clone()
                    })
                    .collect();
                for call in &calls {
                    let result =
                        ToolResult::error(call, "not executed: superseded by a new message");
                    conversation.push(StoredMessage::new(Message::tool_result(&result)));
                }
                calls.len()
            })
            .await?;
        if superseded > 0 {
            warn!(calls = superseded, "Rejected calls left pending by an earlier turn");
        }
        Ok(())
    }

    fn tool_context(&self, id: &str, config: &LoopConfig, cancel: &CancellationToken) -> ToolContext {
        self.context
            .clone()
            .with_conversation(id)
            .with_abort(cancel.clone())
            .with_timeout(config.tool_timeout)
    }
}
