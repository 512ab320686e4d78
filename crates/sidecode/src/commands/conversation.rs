//! Conversation command handlers.
//!
//! Handles listing and showing stored conversations.

use crate::app::App;
use clap::Subcommand;
use sidecode_core::StoredMessage;
use sidecode_provider::{ContentPart, Role};

/// Conversation subcommands.
#[derive(Subcommand, Debug)]
pub enum ConversationCommands {
    /// List all conversations
    List,
    /// Show a conversation
    Show {
        /// Conversation ID
        id: String,
        /// Only show the last N messages
        #[arg(long)]
        last: Option<usize>,
        /// Print the stored conversation as JSON
        #[arg(long)]
        json: bool,
    },
}

/// Handle conversation commands.
pub async fn handle_conversations(app: &App, command: ConversationCommands) -> anyhow::Result<()> {
    let store = app.store()?;

    match command {
        ConversationCommands::List => {
            let summaries = store.summaries().await?;
            if summaries.is_empty() {
                println!("No conversations found.");
                return Ok(());
            }

            println!("{:<30} {:<32} {:<20} {:>8}", "ID", "TITLE", "UPDATED", "MESSAGES");
            println!("{}", "-".repeat(93));
            for summary in summaries {
                let title = if summary.title.chars().count() > 30 {
                    format!("{}...", summary.title.chars().take(27).collect::<String>())
                } else {
                    summary.title.clone()
                };
                println!(
                    "{:<30} {:<32} {:<20} {:>8}",
                    summary.id,
                    title,
                    format_time(summary.updated),
                    summary.messages
                );
            }
        }
        ConversationCommands::Show { id, last, json } => {
            let conversation = store.get(&id).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&conversation)?);
                return Ok(());
            }

            println!("Conversation: {}", conversation.id);
            println!("Title: {}", conversation.title);
            println!("Created: {}", format_time(conversation.time.created));
            println!("Updated: {}", format_time(conversation.time.updated));
            let stats = &conversation.stats;
            if let Some(model) = &stats.model {
                println!(
                    "Model: {}/{}",
                    stats.provider.as_deref().unwrap_or("?"),
                    model
                );
            }
            println!(
                "Tokens: {} in / {} out (${:.4})",
                stats.input_tokens, stats.output_tokens, stats.cost
            );
            println!();

            let skip = last
                .map(|n| conversation.messages.len().saturating_sub(n))
                .unwrap_or(0);
            for message in &conversation.messages[skip..] {
                print_message(message);
            }

            let pending: Vec<_> = conversation.pending_operations().collect();
            if !pending.is_empty() {
                println!("Waiting for approval:");
                for op in pending {
                    println!("  {}  {} {}", op.id, op.call.name, op.call.input);
                }
            }
        }
    }

    Ok(())
}

fn print_message(message: &StoredMessage) {
    let label = match message.role() {
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::ToolResult => "tool",
    };
    println!("[{}] {}", label, format_time(message.timestamp));
    for part in &message.message.content {
        match part {
            ContentPart::Text { text } => println!("{text}"),
            ContentPart::ToolUse { id, name, input } => println!("-> {name} {input} ({id})"),
            ContentPart::ToolResult {
                tool_use_id,
                content,
                is_error,
            } => {
                let marker = if *is_error { " error" } else { "" };
                let text = sidecode_provider::message::value_to_text(content);
                println!("<- {tool_use_id}{marker}: {}", preview(&text, 400));
            }
        }
    }
    println!();
}

fn format_time(millis: i64) -> String {
    chrono::DateTime::from_timestamp_millis(millis)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
        .unwrap_or_else(|| "-".to_string())
}

fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
