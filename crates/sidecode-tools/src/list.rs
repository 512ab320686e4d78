//! list_files tool - directory listing.

use crate::{HandlerResult, Tool, ToolContext, ToolError, ToolOutput};
use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Value};
use std::path::Path;

/// Directories that are never listed (build output and caches).
pub(crate) const IGNORE_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    "dist",
    "build",
    "target",
    "vendor",
    ".idea",
    ".vscode",
    ".cache",
    ".venv",
    "venv",
];

/// Maximum number of entries returned.
const LIMIT: usize = 500;

/// List files under a project directory.
pub struct ListFilesTool;

#[derive(Debug, Default, Deserialize)]
struct ListArgs {
    path: Option<String>,
    #[serde(default)]
    recursive: bool,
}

#[async_trait]
impl Tool for ListFilesTool {
    fn id(&self) -> &str {
        "list_files"
    }

    fn description(&self) -> &str {
        r#"Lists files in a project directory.

- path is relative to the project root; omit it to list the root
- Set recursive to walk subdirectories
- Respects .gitignore and skips build/cache directories
- Returns at most 500 entries"#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "Directory to list, relative to the project root"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "List subdirectories recursively (default false)"
                }
            }
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> HandlerResult<ToolOutput> {
        let args: ListArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let dir = ctx.resolve(args.path.as_deref().unwrap_or("."))?;
        if !dir.as_path().is_dir() {
            return Err(ToolError::validation(format!(
                "{} is not a directory",
                dir.relative().display()
            )));
        }

        let root = ctx.root().to_path_buf();
        let search = dir.as_path().to_path_buf();
        let recursive = args.recursive;
        let (entries, truncated) =
            tokio::task::spawn_blocking(move || walk(&root, &search, recursive))
                .await
                .map_err(|e| ToolError::execution_failed(e.to_string()))?;

        Ok(ToolOutput::new(
            format!("Listed {}", dir.relative().display()),
            json!({
                "files": entries.join("\n"),
                "count": entries.len(),
                "truncated": truncated
            }),
        ))
    }
}

/// Walk `search`, returning paths relative to `root`. Directories get a
/// trailing `/` in non-recursive listings.
fn walk(root: &Path, search: &Path, recursive: bool) -> (Vec<String>, bool) {
    let mut builder = ignore::WalkBuilder::new(search);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .require_git(false)
        .follow_links(false)
        .filter_entry(|entry| {
            let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
            !(is_dir && entry.file_name().to_str().is_some_and(|n| IGNORE_DIRS.contains(&n)))
        });
    if !recursive {
        builder.max_depth(Some(1));
    }

    let mut entries = Vec::new();
    let mut truncated = false;
    for entry in builder.build().filter_map(Result::ok) {
        if entry.depth() == 0 {
            continue;
        }
        let is_dir = entry.file_type().is_some_and(|t| t.is_dir());
        if recursive && is_dir {
            continue;
        }
        let Ok(rel) = entry.path().strip_prefix(root) else {
            continue;
        };
        if entries.len() >= LIMIT {
            truncated = true;
            break;
        }
        let mut rel = rel.to_string_lossy().into_owned();
        if is_dir {
            rel.push('/');
        }
        entries.push(rel);
    }
    entries.sort();
    (entries, truncated)
}
