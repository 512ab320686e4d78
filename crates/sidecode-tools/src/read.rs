//! read_file tool - read file contents.

use crate::{HandlerResult, Tool, ToolContext, ToolError, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use tracing::debug;

/// Maximum file size to read (10MB).
const MAX_FILE_SIZE: u64 = 10 * 1024 * 1024;

/// Default number of lines returned.
const DEFAULT_LIMIT: usize = 2000;

/// Lines longer than this are cut.
const MAX_LINE_LENGTH: usize = 2000;

/// Bytes sniffed for NUL when detecting binary files.
const BINARY_SNIFF_LEN: usize = 8192;

/// Read file contents with line numbers.
pub struct ReadFileTool;

#[derive(Debug, Deserialize)]
struct ReadArgs {
    path: String,
    offset: Option<usize>,
    limit: Option<usize>,
}

#[async_trait]
impl Tool for ReadFileTool {
    fn id(&self) -> &str {
        "read_file"
    }

    fn description(&self) -> &str {
        r#"Reads a text file from the project.

Usage:
- path is relative to the project root
- By default, it reads up to 2000 lines starting from the beginning of the file
- You can optionally specify a line offset (0-based) and limit
- Results are returned with line numbers starting at 1"#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["path"],
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Path of the file, relative to the project root"
                },
                "offset": {
                    "type": "integer",
                    "description": "The line number to start reading from (0-based)"
                },
                "limit": {
                    "type": "integer",
                    "description": "The number of lines to read (defaults to 2000)"
                }
            }
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> HandlerResult<ToolOutput> {
        let args: ReadArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let path = ctx.resolve(&args.path)?;
        let offset = args.offset.unwrap_or(0);
        let limit = args.limit.unwrap_or(DEFAULT_LIMIT);

        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ToolError::file_not_found(path.relative().display().to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        if metadata.is_dir() {
            return Err(ToolError::validation(format!(
                "{} is a directory, use list_files instead",
                path.relative().display()
            )));
        }
        if metadata.len() > MAX_FILE_SIZE {
            return Err(ToolError::validation(format!(
                "File too large ({} bytes). Maximum allowed size is {} bytes.",
                metadata.len(),
                MAX_FILE_SIZE
            )));
        }

        let bytes = tokio::fs::read(&path).await?;
        let sample = &bytes[..bytes.len().min(BINARY_SNIFF_LEN)];
        if sample.contains(&0) {
            return Err(ToolError::validation(format!(
                "{} is a binary file ({} bytes) and cannot be displayed as text",
                path.relative().display(),
                bytes.len()
            )));
        }

        let content = String::from_utf8_lossy(&bytes);
        let total_lines = content.lines().count();
        let output = content
            .lines()
            .skip(offset)
            .take(limit)
            .enumerate()
            .map(|(i, line)| format!("{:5}|\t{}", offset + i + 1, truncate_line(line)))
            .collect::<Vec<_>>()
            .join("\n");

        debug!(path = %path.relative().display(), lines = total_lines, "Read file");
        Ok(ToolOutput::new(
            format!("Read {}", path.relative().display()),
            output,
        ))
    }
}

fn truncate_line(line: &str) -> String {
    if line.len() <= MAX_LINE_LENGTH {
        return line.to_string();
    }
    let mut end = MAX_LINE_LENGTH;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... [truncated]", &line[..end])
}
