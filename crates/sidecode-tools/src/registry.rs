//! Tool registry.

use crate::schema::{check_schema, InputValidator, SchemaError};
use crate::{BoxedTool, HandlerResult, Tool, ToolContext, ToolError, ToolOutput};
use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use serde_json::Value;
use sidecode_provider::{ToolCall, ToolDefinition, ToolResult};
use sidecode_util::TimingGuard;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::{info, info_span, warn, Instrument};

/// Registry of available tools.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, BoxedTool>,
    validators: HashMap<String, Result<InputValidator, SchemaError>>,
}

impl ToolRegistry {
    /// Create a new empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a registry with all built-in tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(crate::read::ReadFileTool));
        registry.register(Arc::new(crate::write::WriteFileTool));
        registry.register(Arc::new(crate::list::ListFilesTool));
        registry.register(Arc::new(crate::bash::RunCommandTool));
        registry.register(Arc::new(crate::search::SearchCodeTool));
        registry
    }

    /// Register a tool, replacing any tool with the same id.
    pub fn register(&mut self, tool: BoxedTool) {
        let id = tool.id().to_string();
        let validator = InputValidator::compile(&id, &tool.parameters_schema());
        if let Err(e) = &validator {
            warn!(error = %e, "Registered tool has an invalid schema");
        }
        self.validators.insert(id.clone(), validator);
        if self.tools.insert(id, tool).is_some() {
            warn!("Replaced an already registered tool");
        }
    }

    /// Register a closure as a tool.
    pub fn register_fn<F, Fut>(&mut self, definition: ToolDefinition, handler: F)
    where
        F: Fn(Value, ToolContext) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = HandlerResult<Value>> + Send + 'static,
    {
        self.register(Arc::new(FnTool {
            definition,
            handler: Box::new(move |args, ctx| handler(args, ctx).boxed()),
        }));
    }

    /// Get a tool by ID.
    pub fn get(&self, id: &str) -> Option<BoxedTool> {
        self.tools.get(id).cloned()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.tools.contains_key(id)
    }

    /// All tool IDs, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        ids.sort_unstable();
        ids
    }

    /// Definitions for the model, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.list()
            .into_iter()
            .filter_map(|id| self.tools.get(id))
            .map(|tool| tool.definition())
            .collect()
    }

    /// Whether the named tool is registered and read-only.
    pub fn is_read_only(&self, id: &str) -> bool {
        self.tools.get(id).is_some_and(|tool| tool.is_read_only())
    }

    /// Check every registered schema.
    pub fn validate_all(&self) -> Result<(), Vec<SchemaError>> {
        let errors: Vec<SchemaError> = self
            .list()
            .into_iter()
            .filter_map(|id| self.tools.get(id))
            .flat_map(|tool| check_schema(tool.id(), &tool.parameters_schema()))
            .collect();
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Run one tool call. Never fails: every problem becomes an error result.
    pub async fn invoke(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let span = info_span!("tool", name = %call.name, call_id = %call.id);
        self.invoke_inner(call, ctx).instrument(span).await
    }

    async fn invoke_inner(&self, call: &ToolCall, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(&call.name) else {
            warn!("Unknown tool requested");
            return ToolResult::error(call, ToolError::NotFound(call.name.clone()).to_string());
        };

        let checked = match self.validators.get(&call.name) {
            Some(Ok(validator)) => validator.validate(&call.input),
            Some(Err(e)) => Err(vec![e.message.clone()]),
            None => Err(vec!["no schema registered".to_string()]),
        };
        if let Err(errors) = checked {
            warn!(errors = ?errors, "Tool input rejected");
            return ToolResult::error(
                call,
                format!("schema validation failed: {}", errors.join("; ")),
            );
        }

        let _timing = TimingGuard::tool(call.name.clone());
        let timeout = ctx.timeout;
        let args = call.input.clone();
        let task_ctx = ctx.clone();
        let handle = tokio::spawn(
            async move { tool.execute(args, &task_ctx).await }.in_current_span(),
        );
        let abort = handle.abort_handle();

        let outcome = tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => {
                abort.abort();
                return ToolResult::error(call, ToolError::Cancelled.to_string());
            }
            outcome = tokio::time::timeout(timeout, handle) => outcome,
        };

        match outcome {
            Ok(Ok(Ok(output))) => {
                info!(title = %output.title, "Tool succeeded");
                ToolResult::success(call, output.content)
            }
            Ok(Ok(Err(e))) => {
                warn!(error = %e, "Tool failed");
                ToolResult::error(call, e.to_string())
            }
            Ok(Err(join_error)) => {
                warn!(error = %join_error, "Tool task aborted");
                let message = if join_error.is_panic() {
                    format!("tool '{}' panicked", call.name)
                } else {
                    format!("tool '{}' was aborted", call.name)
                };
                ToolResult::error(call, message)
            }
            Err(_) => {
                abort.abort();
                warn!(timeout_ms = timeout.as_millis() as u64, "Tool timed out");
                ToolResult::error(call, ToolError::Timeout(timeout).to_string())
            }
        }
    }
}

type Handler = Box<dyn Fn(Value, ToolContext) -> BoxFuture<'static, HandlerResult<Value>> + Send + Sync>;

/// A tool backed by a closure.
struct FnTool {
    definition: ToolDefinition,
    handler: Handler,
}

#[async_trait]
impl Tool for FnTool {
    fn id(&self) -> &str {
        &self.definition.name
    }

    fn description(&self) -> &str {
        &self.definition.description
    }

    fn parameters_schema(&self) -> Value {
        self.definition.parameters.clone()
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> HandlerResult<ToolOutput> {
        let content = (self.handler)(args, ctx.clone()).await?;
        Ok(ToolOutput::new(self.definition.name.clone(), content))
    }
}
