//! search_code tool - regex search over project files.

use crate::list::IGNORE_DIRS;
use crate::{HandlerResult, Tool, ToolContext, ToolError, ToolOutput};
use async_trait::async_trait;
use ignore::WalkBuilder;
use regex::Regex;
use serde::Deserialize;
use serde_json::{json, Value};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Maximum number of matches per file to prevent excessive output.
const MAX_MATCHES_PER_FILE: usize = 100;

/// Maximum total matches across all files.
const MAX_TOTAL_MATCHES: usize = 500;

/// Matched lines longer than this are cut.
const MAX_LINE_LENGTH: usize = 500;

/// Search file contents using regex.
pub struct SearchCodeTool;

#[derive(Debug, Deserialize)]
struct SearchArgs {
    pattern: String,
    path: Option<String>,
    include: Option<String>,
}

#[async_trait]
impl Tool for SearchCodeTool {
    fn id(&self) -> &str {
        "search_code"
    }

    fn description(&self) -> &str {
        r#"Searches file contents in the project with a regular expression.

- Supports full regex syntax (eg. "log.*Error", "fn\s+\w+")
- Filter files by name with the include parameter (eg. "*.rs", "*.{ts,tsx}")
- Respects .gitignore and skips build directories
- Returns matches as path:line: text"#
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "required": ["pattern"],
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The regex pattern to search for"
                },
                "path": {
                    "type": "string",
                    "description": "Directory to search, relative to the project root"
                },
                "include": {
                    "type": "string",
                    "description": "File name pattern to include (e.g. \"*.rs\")"
                }
            }
        })
    }

    fn is_read_only(&self) -> bool {
        true
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> HandlerResult<ToolOutput> {
        let args: SearchArgs = serde_json::from_value(args)
            .map_err(|e| ToolError::validation(format!("Invalid arguments: {e}")))?;
        let regex = Regex::new(&args.pattern)
            .map_err(|e| ToolError::validation(format!("Invalid regex pattern: {e}")))?;
        let include = args.include.as_deref().map(IncludeFilter::new).transpose()?;
        let base = ctx.resolve(args.path.as_deref().unwrap_or("."))?;
        if !base.as_path().exists() {
            return Err(ToolError::file_not_found(base.relative().display().to_string()));
        }

        debug!(pattern = %args.pattern, base = %base.relative().display(), "Searching code");

        let root = ctx.root().to_path_buf();
        let search = base.as_path().to_path_buf();
        let abort = ctx.abort.clone();
        let (lines, truncated) = tokio::task::spawn_blocking(move || {
            search_tree(&root, &search, &regex, include.as_ref(), &abort)
        })
        .await
        .map_err(|e| ToolError::execution_failed(e.to_string()))??;

        let count = lines.len();
        let mut output = if lines.is_empty() {
            "No matches found".to_string()
        } else {
            lines.join("\n")
        };
        if truncated {
            output.push_str(&format!("\n... truncated (reached {MAX_TOTAL_MATCHES} matches)"));
        }

        Ok(ToolOutput::new(
            format!("Search: {} ({count} matches)", args.pattern),
            output,
        ))
    }
}

fn search_tree(
    root: &Path,
    base: &Path,
    regex: &Regex,
    include: Option<&IncludeFilter>,
    abort: &CancellationToken,
) -> HandlerResult<(Vec<String>, bool)> {
    let walker = WalkBuilder::new(base)
        .hidden(true)
        .git_ignore(true)
        .git_global(false)
        .git_exclude(true)
        .require_git(false)
        .follow_links(false)
        .filter_entry(|entry| {
            entry
                .file_name()
                .to_str()
                .map_or(true, |name| !IGNORE_DIRS.contains(&name))
        })
        .build();

    let mut results = Vec::new();
    for entry in walker.filter_map(Result::ok) {
        if abort.is_cancelled() {
            return Err(ToolError::Cancelled);
        }
        if !entry.file_type().is_some_and(|t| t.is_file()) {
            continue;
        }
        let path = entry.path();
        if include.is_some_and(|filter| !filter.matches(path)) {
            continue;
        }
        let Ok(matches) = search_file(path, regex, MAX_MATCHES_PER_FILE) else {
            continue;
        };
        let rel = path.strip_prefix(root).unwrap_or(path);
        for (line_num, text) in matches {
            if results.len() >= MAX_TOTAL_MATCHES {
                return Ok((results, true));
            }
            results.push(format!("{}:{}: {}", rel.display(), line_num, truncate(&text)));
        }
    }
    Ok((results, false))
}

/// Search a single file for lines matching the regex pattern. Files that
/// are not valid UTF-8 stop at the first undecodable line.
fn search_file(
    path: &Path,
    regex: &Regex,
    max_matches: usize,
) -> std::io::Result<Vec<(usize, String)>> {
    let reader = BufReader::new(File::open(path)?);
    let mut matches = Vec::new();

    for (line_num, line) in reader.lines().enumerate() {
        let line = line?;
        if regex.is_match(&line) {
            matches.push((line_num + 1, line));
            if matches.len() >= max_matches {
                break;
            }
        }
    }

    Ok(matches)
}

fn truncate(line: &str) -> &str {
    let line = line.trim_end();
    if line.len() <= MAX_LINE_LENGTH {
        return line;
    }
    let mut end = MAX_LINE_LENGTH;
    while !line.is_char_boundary(end) {
        end -= 1;
    }
    &line[..end]
}

/// File name filter such as `*.rs` or `*.{ts,tsx}`.
struct IncludeFilter {
    patterns: Vec<glob::Pattern>,
}

impl IncludeFilter {
    fn new(pattern: &str) -> HandlerResult<Self> {
        let patterns = expand_braces(pattern)
            .iter()
            .map(|p| glob::Pattern::new(p))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ToolError::validation(format!("Invalid include pattern: {e}")))?;
        Ok(Self { patterns })
    }

    fn matches(&self, path: &Path) -> bool {
        let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
            return false;
        };
        self.patterns.iter().any(|p| p.matches(name))
    }
}

/// Expand one `{a,b}` group, which is all `glob::Pattern` lacks.
fn expand_braces(pattern: &str) -> Vec<String> {
    match (pattern.find('{'), pattern.find('}')) {
        (Some(start), Some(end)) if start < end => {
            let prefix = &pattern[..start];
            let suffix = &pattern[end + 1..];
            pattern[start + 1..end]
                .split(',')
                .map(|alt| format!("{prefix}{}{suffix}", alt.trim()))
                .collect()
        }
        _ => vec![pattern.to_string()],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;

    #[tokio::test]
    async fn test_finds_matches_with_relative_paths() {
        let (_dir, ctx) = testing::project();
        let output = SearchCodeTool
            .execute(json!({"pattern": "println!"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.content, json!("src/main.rs:2:     println!(\"hi\");"));
        assert_eq!(output.title, "Search: println! (1 matches)");
    }

    #[tokio::test]
    async fn test_include_filter() {
        let (dir, ctx) = testing::project();
        std::fs::write(dir.path().join("src/app.ts"), "const main = 1;\n").unwrap();

        let output = SearchCodeTool
            .execute(json!({"pattern": "main", "include": "*.{ts,tsx}"}), &ctx)
            .await
            .unwrap();
        let text = output.content.as_str().unwrap();
        assert!(text.contains("src/app.ts:1:"));
        assert!(!text.contains("main.rs"));
    }

    #[tokio::test]
    async fn test_no_matches() {
        let (_dir, ctx) = testing::project();
        let output = SearchCodeTool
            .execute(json!({"pattern": "zzz_not_here"}), &ctx)
            .await
            .unwrap();
        assert_eq!(output.content, json!("No matches found"));
    }

    #[tokio::test]
    async fn test_invalid_regex() {
        let (_dir, ctx) = testing::project();
        let err = SearchCodeTool
            .execute(json!({"pattern": "(unclosed"}), &ctx)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Validation(_)));
    }

    #[tokio::test]
    async fn test_outside_root() {
        let (_dir, ctx) = testing::project();
        let err = SearchCodeTool
            .execute(json!({"pattern": "root", "path": "../.."}), &ctx)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("sandbox"));
    }

    #[test]
    fn test_expand_braces() {
        assert_eq!(expand_braces("*.{ts, tsx}"), vec!["*.ts", "*.tsx"]);
        assert_eq!(expand_braces("*.rs"), vec!["*.rs"]);
    }
}
