//! Temporary project directories for tool and loop tests.

use sidecode_sandbox::{CommandPolicy, PolicyConfig, SandboxResolver};
use sidecode_tools::ToolContext;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tempfile::TempDir;

/// A temporary project with configurable file structure.
///
/// ```rust,ignore
/// let project = TestProject::new()
///     .with_rust_project("demo")
///     .with_file("notes.txt", "hello")
///     .build();
///
/// let ctx = project.tool_context();
/// ```
pub struct TestProject {
    temp_dir: TempDir,
    files: Vec<(PathBuf, String)>,
    dirs: Vec<PathBuf>,
}

impl TestProject {
    pub fn new() -> Self {
        Self {
            temp_dir: TempDir::new().expect("Failed to create temp directory"),
            files: Vec::new(),
            dirs: Vec::new(),
        }
    }

    /// Add a file. Parent directories are created on build.
    pub fn with_file(mut self, path: impl AsRef<Path>, contents: impl Into<String>) -> Self {
        self.files.push((path.as_ref().to_path_buf(), contents.into()));
        self
    }

    pub fn with_dir(mut self, path: impl AsRef<Path>) -> Self {
        self.dirs.push(path.as_ref().to_path_buf());
        self
    }

    /// Add `Cargo.toml` and `src/main.rs`.
    pub fn with_rust_project(self, name: &str) -> Self {
        self.with_file("Cargo.toml", content::cargo_toml(name))
            .with_file("src/main.rs", content::RUST_MAIN)
    }

    /// Add a `sidecode.json` project config.
    pub fn with_config(self, config: &str) -> Self {
        self.with_file("sidecode.json", config)
    }

    pub fn with_gitignore(self, contents: &str) -> Self {
        self.with_file(".gitignore", contents)
    }

    pub fn build(self) -> BuiltTestProject {
        let root = self.temp_dir.path();

        for dir in &self.dirs {
            let full_path = root.join(dir);
            fs::create_dir_all(&full_path).unwrap_or_else(|e| {
                panic!("Failed to create directory {}: {}", full_path.display(), e)
            });
        }

        for (path, contents) in &self.files {
            let full_path = root.join(path);
            if let Some(parent) = full_path.parent() {
                fs::create_dir_all(parent).unwrap_or_else(|e| {
                    panic!("Failed to create parent of {}: {}", full_path.display(), e)
                });
            }
            fs::write(&full_path, contents)
                .unwrap_or_else(|e| panic!("Failed to write file {}: {}", full_path.display(), e));
        }

        BuiltTestProject {
            temp_dir: self.temp_dir,
        }
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// A project whose files exist on disk. Removed when dropped.
pub struct BuiltTestProject {
    temp_dir: TempDir,
}

impl BuiltTestProject {
    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn read_file(&self, path: impl AsRef<Path>) -> String {
        let full_path = self.path().join(path.as_ref());
        fs::read_to_string(&full_path)
            .unwrap_or_else(|e| panic!("Failed to read file {}: {}", full_path.display(), e))
    }

    pub fn file_exists(&self, path: impl AsRef<Path>) -> bool {
        self.path().join(path.as_ref()).exists()
    }

    pub fn write_file(&self, path: impl AsRef<Path>, contents: impl AsRef<str>) {
        let full_path = self.path().join(path.as_ref());
        if let Some(parent) = full_path.parent() {
            fs::create_dir_all(parent).ok();
        }
        fs::write(&full_path, contents.as_ref())
            .unwrap_or_else(|e| panic!("Failed to write file {}: {}", full_path.display(), e));
    }

    /// Directory for conversation files, inside the project's temp dir.
    pub fn data_dir(&self) -> PathBuf {
        self.path().join(".sidecode-data")
    }

    pub fn resolver(&self) -> SandboxResolver {
        SandboxResolver::new(self.path()).expect("Failed to create resolver")
    }

    /// A tool context rooted at the project with the default policy.
    pub fn tool_context(&self) -> ToolContext {
        ToolContext::new(self.resolver(), CommandPolicy::default())
    }

    /// A tool context with a custom policy and tool timeout.
    pub fn tool_context_with(&self, policy: PolicyConfig, timeout: Duration) -> ToolContext {
        ToolContext::new(self.resolver(), CommandPolicy::new(&policy)).with_timeout(timeout)
    }
}

/// Common test file contents.
pub mod content {
    pub const RUST_MAIN: &str = r#"fn main() {
    println!("Hello, world!");
}
"#;

    pub fn cargo_toml(name: &str) -> String {
        format!(
            r#"[package]
name = "{name}"
version = "0.1.0"
edition = "2021"
"#
        )
    }

    /// A minimal `sidecode.json`.
    pub fn sidecode_config(provider: &str, model: &str) -> String {
        format!(
            r#"{{
    "provider": {{ "kind": "{provider}", "model": "{model}" }}
}}"#
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_project_with_files() {
        let project = TestProject::new()
            .with_rust_project("demo")
            .with_dir("empty")
            .with_gitignore("target/\n")
            .build();

        assert!(project.file_exists("Cargo.toml"));
        assert!(project.read_file("src/main.rs").contains("Hello"));
        assert!(project.path().join("empty").is_dir());
        assert_eq!(project.read_file(".gitignore"), "target/\n");
    }

    #[test]
    fn test_write_file_creates_parent_dirs() {
        let project = TestProject::new().build();
        project.write_file("a/b/c.txt", "deep");
        assert_eq!(project.read_file("a/b/c.txt"), "deep");
    }

    #[test]
    fn test_config_content_is_json() {
        let project = TestProject::new()
            .with_config(&content::sidecode_config("openai", "gpt-4o"))
            .build();
        let value: serde_json::Value =
            serde_json::from_str(&project.read_file("sidecode.json")).unwrap();
        assert_eq!(value["provider"]["kind"], "openai");
    }

    #[test]
    fn test_tool_context_is_rooted() {
        let project = TestProject::new().with_file("x.txt", "x").build();
        let ctx = project.tool_context();
        assert!(ctx.resolve("x.txt").is_ok());
        assert!(ctx.resolve("../outside").is_err());
    }
}
