//! run_command tool - execute shell commands.
//!
//! Every command is classified by the context's [`CommandPolicy`] before
//! anything is spawned. Commands run under `bash -c` with:
//! - a timeout (default 2 minutes, max 10 minutes)
//! - a working directory confined to the project root
//! - stdout and stderr combined and truncated for large outputs
//!
//! [`CommandPolicy`]: sidecode_sandbox::CommandPolicy

use crate::{HandlerResult, Tool, ToolContext, ToolError, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sidecode_sandbox::Classification;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::Command;
use tracing::{debug, info, warn};

/// Default timeout in milliseconds (2 minutes).
const DEFAULT_TIMEOUT_MS: u64 = 120_000;

/// Maximum timeout in milliseconds (10 minutes).
const MAX_TIMEOUT_MS: u64 = 600_000;

/// Maximum output size in bytes before truncation.
const MAX_OUTPUT_SIZE: usize = 30_000;

/// Execute shell commands inside the project.
pub struct RunCommandTool;

#[derive(Debug, Deserialize)]
struct RunArgs {
    command: String,
    timeout_ms: Option<u64>,
    workdir: Option<String>,
}

#[async_trait]
impl Tool for RunCommandTool {
    fn id(&self) -> &str {
        "run_command"
    }

    fn description(&self) -> &str {
        r#"Executes a bash command in the project.

Usage notes:
- Commands run from the project root unless workdir is given (relative to the root).
- You can specify an optional timeout_ms (up to 600000ms / 10 minutes).
- Commands time out after 120000ms (2 minutes) by default.
- Destructive or privileged commands are refused.
- Output is truncated if it exceeds 30000 bytes."#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["command"],
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout_ms": {
                    "type": "integer",
                    "description": "Optional timeout in milliseconds (max 600000)"
                },
                "workdir": {
                    "type": "string",
                    "description": "Working directory, relative to the project root"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> HandlerResult<ToolOutput> {
        let args: RunArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;

        match ctx.policy.classify(&args.command) {
            Classification::Allowed => {
                debug!(command = %args.command, "Command allowed by policy");
            }
            Classification::Denied(reason) => {
                warn!(command = %args.command, %reason, "Command denied by policy");
                return Err(ToolError::CommandDenied(format!(
                    "'{}': {reason}",
                    truncate_command(&args.command)
                )));
            }
            Classification::RequiresConfirmation(reason) if ctx.confirmed => {
                info!(command = %args.command, %reason, "Running confirmed command");
            }
            Classification::RequiresConfirmation(reason) => {
                warn!(command = %args.command, %reason, "Command requires confirmation");
                return Err(ToolError::CommandRequiresConfirmation(format!(
                    "'{}': {reason}",
                    truncate_command(&args.command)
                )));
            }
        }

        let workdir = ctx.resolve(args.workdir.as_deref().unwrap_or("."))?;
        if !workdir.as_path().is_dir() {
            return Err(ToolError::validation(format!(
                "Working directory does not exist: {}",
                workdir.relative().display()
            )));
        }

        let timeout_ms = args
            .timeout_ms
            .unwrap_or(DEFAULT_TIMEOUT_MS)
            .min(MAX_TIMEOUT_MS);
        let timeout = Duration::from_millis(timeout_ms);

        debug!(
            command = %args.command,
            workdir = %workdir.relative().display(),
            timeout_ms,
            "Executing command"
        );

        tokio::select! {
            biased;
            _ = ctx.abort.cancelled() => Err(ToolError::Cancelled),
            result = run(&args.command, workdir.as_path(), timeout) => result,
        }
    }
}

/// Spawn `bash -c command` and wait for it. Dropping the returned future
/// kills the child.
async fn run(command: &str, workdir: &Path, timeout: Duration) -> HandlerResult<ToolOutput> {
    let mut cmd = Command::new("bash");
    cmd.arg("-c")
        .arg(command)
        .current_dir(workdir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    // No interactive prompts or escape codes
    cmd.env("TERM", "dumb");
    cmd.env("GIT_TERMINAL_PROMPT", "0");
    cmd.env("NO_COLOR", "1");

    let mut child = cmd
        .spawn()
        .map_err(|e| ToolError::execution_failed(format!("Failed to spawn process: {e}")))?;

    let result = tokio::time::timeout(timeout, async {
        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let stdout_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stdout) = stdout {
                stdout.read_to_end(&mut buf).await.ok();
            }
            buf
        });
        let stderr_handle = tokio::spawn(async move {
            let mut buf = Vec::new();
            if let Some(mut stderr) = stderr {
                stderr.read_to_end(&mut buf).await.ok();
            }
            buf
        });

        let status = child.wait().await?;
        let stdout_bytes = stdout_handle.await.unwrap_or_default();
        let stderr_bytes = stderr_handle.await.unwrap_or_default();
        Ok::<_, std::io::Error>((status, stdout_bytes, stderr_bytes))
    })
    .await;

    let (status, stdout_bytes, stderr_bytes) = match result {
        Ok(Ok(done)) => done,
        Ok(Err(e)) => return Err(ToolError::execution_failed(format!("Process error: {e}"))),
        Err(_) => {
            // kill_on_drop reaps the child once `child` goes out of scope
            warn!(command = %command, timeout_ms = timeout.as_millis() as u64, "Command timed out");
            return Err(ToolError::Timeout(timeout));
        }
    };

    let exit_code = status.code().unwrap_or(-1);
    let mut output = String::from_utf8_lossy(&stdout_bytes).into_owned();
    let stderr = String::from_utf8_lossy(&stderr_bytes);
    if !stderr.is_empty() {
        if !output.is_empty() && !output.ends_with('\n') {
            output.push('\n');
        }
        output.push_str(&stderr);
    }

    let (output, truncated) = truncate_output(&output, MAX_OUTPUT_SIZE);
    if truncated {
        warn!(command = %command, "Output truncated to {} bytes", MAX_OUTPUT_SIZE);
    }

    let title = if status.success() {
        truncate_command(command)
    } else {
        format!("{} (exit code: {})", truncate_command(command), exit_code)
    };

    Ok(ToolOutput::new(
        title,
        json!({
            "output": output,
            "exit_code": exit_code
        }),
    ))
}

/// Truncate command for display in titles and errors.
fn truncate_command(cmd: &str) -> String {
    let first_line = cmd.lines().next().unwrap_or(cmd);
    if first_line.chars().count() > 50 {
        let head: String = first_line.chars().take(47).collect();
        format!("{head}...")
    } else {
        first_line.to_string()
    }
}

/// Keep the first `max_size` bytes, cut on a char boundary.
fn truncate_output(output: &str, max_size: usize) -> (String, bool) {
    if output.len() <= max_size {
        return (output.to_string(), false);
    }
    let mut end = max_size;
    while !output.is_char_boundary(end) {
        end -= 1;
    }
    (
        format!(
            "{}\n... [truncated {} bytes]",
            &output[..end],
            output.len() - end
        ),
        true,
    )
}
