//! Turn commands: `run` starts a turn, `approve` continues one that is
//! waiting on held tool calls.

use crate::app::App;
use anyhow::bail;
use clap::Args;
use serde_json::json;
use sidecode_core::{Approval, LoopConfig, PendingOperation, ToolLoop, TurnOutcome, TurnStatus};
use std::io::{self, Read};
use tokio_util::sync::CancellationToken;
use tracing::warn;

/// Arguments for `sidecode run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Message to send. Read from stdin when omitted.
    #[arg(num_args = 0..)]
    pub prompt: Vec<String>,
    /// Continue an existing conversation
    #[arg(short, long)]
    pub conversation: Option<String>,
    /// Hold mutating tool calls for approval
    #[arg(long)]
    pub manual: bool,
    /// Provider calls allowed for this turn
    #[arg(long)]
    pub max_rounds: Option<usize>,
    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

/// Arguments for `sidecode approve`.
#[derive(Args, Debug)]
pub struct ApproveArgs {
    /// Conversation with held tool calls
    pub conversation: String,
    /// Operation to run (repeatable)
    #[arg(long = "approve", value_name = "OP")]
    pub approve: Vec<String>,
    /// Operation to reject (repeatable)
    #[arg(long = "reject", value_name = "OP")]
    pub reject: Vec<String>,
    /// Approve every held operation
    #[arg(long, conflicts_with = "approve")]
    pub all: bool,
    /// Run further tool calls without asking
    #[arg(long)]
    pub auto: bool,
    /// Print the outcome as JSON
    #[arg(long)]
    pub json: bool,
}

pub async fn handle_run(app: &App, args: RunArgs) -> anyhow::Result<()> {
    let prompt = if args.prompt.is_empty() {
        let mut input = String::new();
        io::stdin().read_to_string(&mut input)?;
        input.trim().to_string()
    } else {
        args.prompt.join(" ")
    };
    if prompt.is_empty() {
        bail!("No message provided");
    }

    let mut config = app.config.loop_config()?;
    if args.manual {
        config = config.manual();
    }
    if let Some(max_rounds) = args.max_rounds {
        if max_rounds == 0 {
            bail!("--max-rounds must be at least 1");
        }
        config = config.with_max_rounds(max_rounds);
    }

    let tool_loop = app.tool_loop()?;
    let store = tool_loop.store();
    let id = match args.conversation {
        Some(id) => store.get(&id).await?.id,
        None => store.create(title_for(&prompt)).await?.id,
    };

    let outcome = tool_loop
        .run_turn(&id, &prompt, &config, cancel_on_ctrl_c())
        .await?;
    print_outcome(&tool_loop, &id, &outcome, args.json).await
}

pub async fn handle_approve(app: &App, args: ApproveArgs) -> anyhow::Result<()> {
    let mut config = app.config.loop_config()?;
    if !args.auto {
        config = config.manual();
    }

    let tool_loop = app.tool_loop()?;
    let conversation = tool_loop.store().get(&args.conversation).await?;

    let approvals: Vec<Approval> = if args.all {
        conversation
            .pending_operations()
            .map(|op| Approval::approve(&op.id))
            .collect()
    } else {
        args.approve
            .iter()
            .map(Approval::approve)
            .chain(args.reject.iter().map(Approval::reject))
            .collect()
    };
    if approvals.is_empty() {
        warn!(conversation = %args.conversation, "No decisions given, rejecting all held calls");
    }

    let outcome = tool_loop
        .resolve_pending(&conversation.id, &approvals, &config, cancel_on_ctrl_c())
        .await?;
    print_outcome(&tool_loop, &conversation.id, &outcome, args.json).await
}

/// A token cancelled on Ctrl-C.
fn cancel_on_ctrl_c() -> CancellationToken {
    let token = CancellationToken::new();
    let trigger = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            eprintln!("Interrupted, cancelling turn...");
            trigger.cancel();
        }
    });
    token
}

/// Conversation title from the first line of the prompt.
fn title_for(prompt: &str) -> String {
    let line = prompt.lines().next().unwrap_or_default().trim();
    if line.chars().count() > 60 {
        let cut: String = line.chars().take(57).collect();
        format!("{cut}...")
    } else {
        line.to_string()
    }
}

async fn print_outcome(
    tool_loop: &ToolLoop,
    id: &str,
    outcome: &TurnOutcome,
    as_json: bool,
) -> anyhow::Result<()> {
    let pending: Vec<PendingOperation> = if outcome.status == TurnStatus::AwaitingApproval {
        let conversation = tool_loop.store().get(id).await?;
        conversation.pending_operations().cloned().collect()
    } else {
        Vec::new()
    };

    if as_json {
        let output = json!({
            "conversation_id": id,
            "status": outcome.status.as_str(),
            "text": outcome.text(),
            "rounds": outcome.rounds,
            "usage": outcome.response.usage,
            "tool_results": outcome.tool_results,
            "pending": pending
                .iter()
                .map(|op| json!({"id": op.id, "tool": op.call.name, "input": op.call.input}))
                .collect::<Vec<_>>(),
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    if !outcome.text().is_empty() {
        println!("{}", outcome.text());
    }
    match outcome.status {
        TurnStatus::Completed => {}
        TurnStatus::LoopLimitExceeded => {
            eprintln!(
                "Stopped after {} model calls; the model still wanted to run tools.",
                outcome.rounds
            );
        }
        TurnStatus::AwaitingApproval => {
            println!();
            println!("Waiting for approval:");
            for op in &pending {
                println!("  {}  {} {}", op.id, op.call.name, op.call.input);
            }
            println!();
            println!("Continue with: sidecode approve {id} --approve <OP> | --all");
        }
    }
    eprintln!("conversation: {id}");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_title_for() {
        assert_eq!(title_for("fix the build\nit fails on CI"), "fix the build");
        let long = "a".repeat(100);
        let title = title_for(&long);
        assert_eq!(title.chars().count(), 60);
        assert!(title.ends_with("..."));
        assert_eq!(title_for(""), "");
    }
}
