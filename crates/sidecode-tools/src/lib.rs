//! Tool implementations for sidecode.
//!
//! This crate provides the tools the model can call, and the registry that
//! validates and runs them. Every tool that touches the filesystem resolves
//! paths through the [`ToolContext`]'s sandbox resolver first, and
//! `run_command` classifies commands through its command policy.

pub mod error;
pub mod registry;
pub mod schema;

// Tool implementations
pub mod bash;
pub mod list;
pub mod read;
pub mod search;
pub mod write;

pub use error::{HandlerResult, ToolError};
pub use registry::ToolRegistry;
pub use schema::SchemaError;

use async_trait::async_trait;
use serde_json::Value;
use sidecode_provider::ToolDefinition;
use sidecode_sandbox::{CommandPolicy, PolicyConfig, SandboxResolver, SandboxResult, SandboxedPath};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Default per-invocation timeout.
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(120);

/// Context provided to tools during execution.
///
/// Cheap to clone. The registry hands each invocation its own copy.
#[derive(Debug, Clone)]
pub struct ToolContext {
    /// Conversation the call belongs to.
    pub conversation_id: String,
    /// Path confinement for the project root.
    pub resolver: Arc<SandboxResolver>,
    /// Shell command rules.
    pub policy: Arc<CommandPolicy>,
    /// Cancellation token.
    pub abort: CancellationToken,
    /// Upper bound for a single invocation.
    pub timeout: Duration,
    /// A human approved this call, so commands the policy marks as needing
    /// confirmation may run. Denied commands still never run.
    pub confirmed: bool,
}

impl ToolContext {
    pub fn new(resolver: SandboxResolver, policy: CommandPolicy) -> Self {
        Self {
            conversation_id: String::new(),
            resolver: Arc::new(resolver),
            policy: Arc::new(policy),
            abort: CancellationToken::new(),
            timeout: DEFAULT_TOOL_TIMEOUT,
            confirmed: false,
        }
    }

    /// Context for `root` with the default command policy.
    pub fn for_root(root: impl AsRef<Path>) -> SandboxResult<Self> {
        Ok(Self::new(
            SandboxResolver::new(root)?,
            CommandPolicy::new(&PolicyConfig::default()),
        ))
    }

    pub fn with_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = conversation_id.into();
        self
    }

    pub fn with_abort(mut self, abort: CancellationToken) -> Self {
        self.abort = abort;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_confirmed(mut self, confirmed: bool) -> Self {
        self.confirmed = confirmed;
        self
    }

    pub fn root(&self) -> &Path {
        self.resolver.root()
    }

    /// Resolve a user-supplied path inside the project root.
    pub fn resolve(&self, path: impl AsRef<Path>) -> HandlerResult<SandboxedPath> {
        Ok(self.resolver.resolve(path)?)
    }
}

/// Successful result of a tool execution.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolOutput {
    /// Short summary for logs and the CLI.
    pub title: String,
    /// Payload handed back to the model.
    pub content: Value,
}

impl ToolOutput {
    pub fn new(title: impl Into<String>, content: impl Into<Value>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// The main trait for tools.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Get the tool ID.
    fn id(&self) -> &str;

    /// Get the tool description (for the AI).
    fn description(&self) -> &str;

    /// Get the JSON Schema for the tool's parameters.
    fn parameters_schema(&self) -> Value;

    /// Whether the tool only observes the project. Read-only tools may run
    /// without approval in manual mode.
    fn is_read_only(&self) -> bool {
        false
    }

    /// Execute the tool. `args` has already been validated against
    /// [`Tool::parameters_schema`].
    async fn execute(&self, args: Value, ctx: &ToolContext) -> HandlerResult<ToolOutput>;

    fn definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.id().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters_schema(),
        }
    }
}

/// A boxed tool for dynamic dispatch.
pub type BoxedTool = Arc<dyn Tool>;


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_context_resolve() {
        let (_dir, ctx) = testing::project();
        assert!(ctx.resolve("src/main.rs").is_ok());
        let err = ctx.resolve("../../etc/passwd").unwrap_err();
        assert!(matches!(err, ToolError::Sandbox(_)));
    }

    #[test]
    fn test_context_builders() {
        let (_dir, ctx) = testing::project();
        let ctx = ctx
            .with_conversation("cnv_1")
            .with_timeout(Duration::from_millis(5));
        assert_eq!(ctx.conversation_id, "cnv_1");
        assert_eq!(ctx.timeout, Duration::from_millis(5));
    }

    #[test]
    fn test_output_new() {
        let output = ToolOutput::new("Title", "Content");
        assert_eq!(output.title, "Title");
        assert_eq!(output.content, Value::String("Content".into()));
    }
}
