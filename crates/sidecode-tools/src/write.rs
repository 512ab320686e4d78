//! write_file tool - create or overwrite a file.

use crate::{HandlerResult, Tool, ToolContext, ToolError, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use sidecode_util::Identifier;
use std::path::Path;
use tracing::debug;

/// Write a file inside the project.
pub struct WriteFileTool;

#[derive(Debug, Deserialize)]
struct WriteArgs {
    path: String,
    content: String,
}

#[async_trait]
impl Tool for WriteFileTool {
    fn id(&self) -> &str {
        "write_file"
    }

    fn description(&self) -> &str {
        r#"Writes a file to the project, replacing it if it exists.

Usage:
- path is relative to the project root
- Parent directories are created as needed"#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path", "content"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file, relative to the project root"
                },
                "content": {
                    "type": "string",
                    "description": "The full content to write"
                }
            }
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> HandlerResult<ToolOutput> {
        let args: WriteArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let path = ctx.resolve(&args.path)?;

        if path.is_root() || path.as_path().is_dir() {
            return Err(ToolError::validation(format!(
                "{} is a directory",
                path.relative().display()
            )));
        }

        if let Some(parent) = path.as_path().parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        write_atomic(path.as_path(), args.content.as_bytes()).await?;

        debug!(path = %path.relative().display(), bytes = args.content.len(), "Wrote file");
        Ok(ToolOutput::new(
            format!("Wrote {}", path.relative().display()),
            json!({
                "path": path.relative().display().to_string(),
                "bytes": args.content.len()
            }),
        ))
    }
}

/// Write through a sibling temp file so readers never see a partial file.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let temp = path.with_file_name(format!(".{file_name}.{}.tmp", Identifier::operation()));

    if let Err(e) = tokio::fs::write(&temp, bytes).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    if let Err(e) = tokio::fs::rename(&temp, path).await {
        let _ = tokio::fs::remove_file(&temp).await;
        return Err(e);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_creates_parents() {
        let (dir, ctx) = testing::project();
        let output = WriteFileTool
            .execute(json!({"path": "docs/notes/todo.md", "content": "- ship it\n"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.content["bytes"], 10);
        let written = std::fs::read_to_string(dir.path().join("docs/notes/todo.md")).unwrap();
        assert_eq!(written, "- ship it\n");
    }

    #[tokio::test]
    async fn test_overwrites_and_leaves_no_temp_files() {
        let (dir, ctx) = testing::project();
        WriteFileTool
            .execute(json!({"path": "README.md", "content": "new"}), &ctx)
            .await
            .unwrap();
        assert_eq!(std::fs::read_to_string(dir.path().join("README.md")).unwrap(), "new");
        let leftovers = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn test_outside_root_is_rejected() {
        let (_dir, ctx) = testing::project();
        let err = WriteFileTool
            .execute(json!({"path": "../escape.txt", "content": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sandbox"));
    }

    #[tokio::test]
    async fn test_directory_target_is_rejected() {
        let (_dir, ctx) = testing::project();
        let err = WriteFileTool
            .execute(json!({"path": "src", "content": "x"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }
}
