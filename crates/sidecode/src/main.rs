//! Sidecode - a sandboxed AI coding assistant.
//!
//! This is the main entry point for the sidecode CLI.

mod app;
mod commands;

use anyhow::anyhow;
use app::App;
use clap::{Parser, Subcommand};
use commands::{ApproveArgs, ConversationCommands, RunArgs};
use sidecode_util::log::LogLevel;
use std::path::PathBuf;
use tracing::debug;

#[derive(Parser)]
#[command(name = "sidecode")]
#[command(author, version, about = "Sandboxed AI coding assistant", long_about = None)]
struct Cli {
    /// Project directory (defaults to the current directory)
    #[arg(long, global = true)]
    project: Option<PathBuf>,

    /// Print logs to stderr instead of the log file
    #[arg(long, global = true)]
    print_logs: bool,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a message and run the tool loop until the model answers
    Run(RunArgs),
    /// Approve or reject tool calls held in manual mode, then continue
    Approve(ApproveArgs),
    /// Manage stored conversations
    Conversations {
        #[command(subcommand)]
        command: ConversationCommands,
    },
    /// Show how the command policy classifies a shell command
    Policy {
        #[arg(num_args = 1.., trailing_var_arg = true, allow_hyphen_values = true)]
        command: Vec<String>,
    },
    /// Resolve a path inside the project sandbox
    Resolve {
        path: String,
    },
    /// List the built-in tools
    Tools,
    /// Show the effective configuration
    Config,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let app = App::load(cli.project.as_deref()).await?;

    let level = match cli.log_level.as_deref() {
        Some(level) => {
            LogLevel::parse(level).ok_or_else(|| anyhow!("Unknown log level '{level}'"))?
        }
        None => app.config.log_level().unwrap_or_default(),
    };
    let log_file = commands::init_logging(cli.print_logs, level);
    debug!(log_file = ?log_file, root = %app.root.display(), "Starting sidecode");

    match cli.command {
        Commands::Run(args) => commands::handle_run(&app, args).await,
        Commands::Approve(args) => commands::handle_approve(&app, args).await,
        Commands::Conversations { command } => commands::handle_conversations(&app, command).await,
        Commands::Policy { command } => commands::handle_policy(&app, &command),
        Commands::Resolve { path } => commands::handle_resolve(&app, &path),
        Commands::Tools => commands::handle_tools(),
        Commands::Config => commands::handle_config(&app),
    }
}
