//! Commands that inspect the environment without talking to a model.

use crate::app::App;
use anyhow::bail;
use serde_json::Value;
use sidecode_sandbox::Classification;
use sidecode_tools::ToolRegistry;

/// Print how the command policy classifies `command`.
pub fn handle_policy(app: &App, command: &[String]) -> anyhow::Result<()> {
    let command = command.join(" ");
    if command.trim().is_empty() {
        bail!("No command provided");
    }
    match app.policy().classify(&command) {
        Classification::Allowed => println!("allowed"),
        Classification::Denied(reason) => println!("denied: {reason}"),
        Classification::RequiresConfirmation(reason) => {
            println!("requires confirmation: {reason}")
        }
    }
    Ok(())
}

/// Print the sandboxed absolute path, or fail with the violation.
pub fn handle_resolve(app: &App, path: &str) -> anyhow::Result<()> {
    let resolved = app.resolver()?.resolve(path)?;
    println!("{}", resolved.as_path().display());
    Ok(())
}

pub fn handle_tools() -> anyhow::Result<()> {
    let registry = ToolRegistry::with_builtins();
    for definition in registry.definitions() {
        let access = if registry.is_read_only(&definition.name) {
            "read-only"
        } else {
            "mutating"
        };
        let summary = definition.description.lines().next().unwrap_or_default();
        println!("{:<14} {:<10} {}", definition.name, access, summary);
    }
    Ok(())
}

/// Print the effective configuration with secrets masked.
pub fn handle_config(app: &App) -> anyhow::Result<()> {
    let mut value = serde_json::to_value(&app.config)?;
    if let Some(key) = value
        .pointer_mut("/provider/api_key")
        .filter(|key| key.is_string())
    {
        *key = Value::String("********".to_string());
    }
    println!("{}", serde_json::to_string_pretty(&value)?);
    println!("project root: {}", app.root.display());
    Ok(())
}
