//! Configuration management for sidecode.
//!
//! Configuration is loaded from multiple sources and merged:
//! 1. Global config: `~/.config/sidecode/config.json` or `config.jsonc`
//! 2. Environment variable: `SIDECODE_CONFIG_CONTENT`
//! 3. Project config: `sidecode.jsonc` or `sidecode.json` in the project directory
//!
//! Supports JSONC (JSON with comments) and variable substitution:
//! - `{env:VAR_NAME}` - Substitute environment variable
//! - `{file:path}` - Substitute file contents

use crate::agent_loop::LoopConfig;
use crate::error::{ConfigError, CoreResult};
use serde::{Deserialize, Serialize};
use sidecode_provider::{ProviderKind, ToolChoice};
use sidecode_sandbox::PolicyConfig;
use sidecode_storage::{Cipher, JsonStorage};
use sidecode_util::log::LogLevel;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use std::time::Duration;

/// Environment variable holding inline config content.
pub const CONFIG_CONTENT_ENV: &str = "SIDECODE_CONFIG_CONTENT";

/// Environment variable holding the storage passphrase.
pub const PASSPHRASE_ENV: &str = "SIDECODE_PASSPHRASE";

/// Static regex for variable substitution, compiled once.
static VAR_REGEX: OnceLock<regex::Regex> = OnceLock::new();

/// Get the variable substitution regex, compiling it once on first use.
fn var_regex() -> &'static regex::Regex {
    VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\{(env|file):([^}]+)\}")
            .expect("Invalid regex pattern - this is a compile-time constant")
    })
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// JSON Schema reference.
    #[serde(rename = "$schema", skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,

    /// Project root. Relative paths are resolved against the directory the
    /// config was loaded for.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project_root: Option<PathBuf>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub provider: Option<ProviderConfig>,

    /// Command policy rules.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub policy: Option<PolicyConfig>,

    /// Tool loop overrides.
    #[serde(rename = "loop", skip_serializing_if = "Option::is_none")]
    pub loop_config: Option<LoopOverrides>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub storage: Option<StorageConfig>,

    /// Log level (trace, debug, info, warn, error).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_level: Option<String>,
}

/// Provider selection and credentials.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub kind: Option<ProviderKind>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// Falls back to the provider's conventional environment variable.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
}

impl ProviderConfig {
    pub fn merge(self, other: Self) -> Self {
        Self {
            kind: other.kind.or(self.kind),
            model: other.model.or(self.model),
            api_key: other.api_key.or(self.api_key),
            base_url: other.base_url.or(self.base_url),
        }
    }
}

/// Partial [`LoopConfig`]. Timeouts are in seconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopOverrides {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rounds: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_execute_tools: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_context_messages: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<ToolChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub structured_output: Option<bool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub round_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_timeout_secs: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auto_approve_read_only: Option<bool>,
}

impl LoopOverrides {
    pub fn merge(self, other: Self) -> Self {
        Self {
            max_rounds: other.max_rounds.or(self.max_rounds),
            auto_execute_tools: other.auto_execute_tools.or(self.auto_execute_tools),
            max_context_messages: other.max_context_messages.or(self.max_context_messages),
            max_tokens: other.max_tokens.or(self.max_tokens),
            tool_choice: other.tool_choice.or(self.tool_choice),
            structured_output: other.structured_output.or(self.structured_output),
            round_timeout_secs: other.round_timeout_secs.or(self.round_timeout_secs),
            tool_timeout_secs: other.tool_timeout_secs.or(self.tool_timeout_secs),
            auto_approve_read_only: other.auto_approve_read_only.or(self.auto_approve_read_only),
        }
    }

    /// Apply the overrides on top of `base`.
    pub fn apply(&self, mut base: LoopConfig) -> LoopConfig {
        if let Some(v) = self.max_rounds {
            base.max_rounds = v;
        }
        if let Some(v) = self.auto_execute_tools {
            base.auto_execute_tools = v;
        }
        if let Some(v) = self.max_context_messages {
            base.max_context_messages = v;
        }
        if let Some(v) = self.max_tokens {
            base.max_tokens = v;
        }
        if let Some(v) = &self.tool_choice {
            base.tool_choice = v.clone();
        }
        if let Some(v) = self.structured_output {
            base.structured_output = v;
        }
        if let Some(v) = self.round_timeout_secs {
            base.round_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.tool_timeout_secs {
            base.tool_timeout = Duration::from_secs(v);
        }
        if let Some(v) = self.auto_approve_read_only {
            base.auto_approve_read_only = v;
        }
        base
    }
}

/// Where conversations are stored and whether they are encrypted.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_dir: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<bool>,
}

impl StorageConfig {
    pub fn merge(self, other: Self) -> Self {
        Self {
            data_dir: other.data_dir.or(self.data_dir),
            encryption: other.encryption.or(self.encryption),
        }
    }
}

impl Config {
    /// Load configuration from all sources.
    ///
    /// Loading order (later sources override earlier):
    /// 1. Global config from `~/.config/sidecode/`
    /// 2. `SIDECODE_CONFIG_CONTENT` environment variable
    /// 3. Project config from `project_dir`
    pub async fn load(project_dir: Option<&Path>) -> CoreResult<(Self, Vec<PathBuf>)> {
        let mut config = Config::default();
        let mut sources = Vec::new();

        // 1. Load global config
        if let Some(global_dir) = Self::global_config_dir() {
            for name in &["config.json", "config.jsonc"] {
                let path = global_dir.join(name);
                if path.exists() {
                    let loaded = Self::load_file(&path).await?;
                    config = config.merge(loaded);
                    sources.push(path);
                    break;
                }
            }
        }

        // 2. Load from environment variable
        if let Ok(content) = std::env::var(CONFIG_CONTENT_ENV) {
            let content = Self::substitute_variables(&content, Path::new("."))?;
            let loaded = Self::parse_jsonc(&content, "<env>")?;
            config = config.merge(loaded);
        }

        // 3. Load project config
        if let Some(dir) = project_dir {
            let loaded = Self::load_project(dir).await?;
            if let Some((loaded, path)) = loaded {
                config = config.merge(loaded);
                sources.push(path);
            }
        }

        Ok((config, sources))
    }

    /// Load `sidecode.jsonc` or `sidecode.json` from `dir`, if present.
    pub async fn load_project(dir: &Path) -> CoreResult<Option<(Self, PathBuf)>> {
        for name in &["sidecode.jsonc", "sidecode.json"] {
            let path = dir.join(name);
            if path.exists() {
                let mut loaded = Self::load_file(&path).await?;
                // Relative roots are relative to the config file
                if let Some(root) = loaded.project_root.take() {
                    loaded.project_root = Some(if root.is_relative() {
                        dir.join(root)
                    } else {
                        root
                    });
                }
                return Ok(Some((loaded, path)));
            }
        }
        Ok(None)
    }

    /// Get the global config directory.
    ///
    /// On Unix systems, prefers `~/.config/sidecode` (XDG standard) over
    /// the platform-specific directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            if let Some(home) = dirs::home_dir() {
                let xdg_config = home.join(".config").join("sidecode");
                if xdg_config.exists() {
                    return Some(xdg_config);
                }
            }
        }

        dirs::config_dir().map(|d| d.join("sidecode"))
    }

    /// Load configuration from a file.
    pub async fn load_file(path: &Path) -> CoreResult<Self> {
        let content = tokio::fs::read_to_string(path).await?;
        let content = Self::substitute_variables(&content, path)?;
        Self::parse_jsonc(&content, &path.display().to_string())
    }

    /// Parse JSONC (JSON with comments).
    pub fn parse_jsonc(content: &str, source: &str) -> CoreResult<Self> {
        let stripped = Self::strip_comments(content);

        serde_json::from_str(&stripped).map_err(|e| {
            ConfigError::InvalidJson {
                path: source.to_string(),
                message: e.to_string(),
            }
            .into()
        })
    }

    /// Strip JSON comments.
    fn strip_comments(input: &str) -> String {
        let mut result = String::with_capacity(input.len());
        let mut chars = input.chars().peekable();
        let mut in_string = false;
        let mut escape_next = false;

        while let Some(c) = chars.next() {
            if escape_next {
                result.push(c);
                escape_next = false;
                continue;
            }

            if c == '\\' && in_string {
                result.push(c);
                escape_next = true;
                continue;
            }

            if c == '"' {
                in_string = !in_string;
                result.push(c);
                continue;
            }

            if in_string {
                result.push(c);
                continue;
            }

            if c == '/' {
                match chars.peek() {
                    Some('/') => {
                        chars.next();
                        for c in chars.by_ref() {
                            if c == '\n' {
                                result.push('\n');
                                break;
                            }
                        }
                        continue;
                    }
                    Some('*') => {
                        chars.next();
                        let mut prev = ' ';
                        for c in chars.by_ref() {
                            if prev == '*' && c == '/' {
                                break;
                            }
                            // Keep line numbers stable for error reporting
                            if c == '\n' {
                                result.push('\n');
                            }
                            prev = c;
                        }
                        continue;
                    }
                    _ => {}
                }
            }

            result.push(c);
        }

        result
    }

    /// Substitute `{env:VAR}` and `{file:path}` references. File paths are
    /// relative to the config file.
    fn substitute_variables(content: &str, config_path: &Path) -> CoreResult<String> {
        let config_dir = config_path.parent().unwrap_or(Path::new("."));
        let mut result = content.to_string();

        for cap in var_regex().captures_iter(content) {
            let (Some(full_match), Some(kind), Some(value)) = (cap.get(0), cap.get(1), cap.get(2))
            else {
                continue;
            };
            let value = value.as_str();

            let replacement = match kind.as_str() {
                "env" => std::env::var(value).map_err(|_| ConfigError::EnvVarNotFound {
                    name: value.to_string(),
                })?,
                "file" => {
                    let file_path = config_dir.join(value);
                    std::fs::read_to_string(&file_path)
                        .map_err(|_| ConfigError::FileRefNotFound {
                            path: file_path.display().to_string(),
                        })?
                        .trim()
                        .to_string()
                }
                _ => continue,
            };

            // Values land inside JSON strings
            let escaped = serde_json::to_string(&replacement)?;
            result = result.replace(full_match.as_str(), &escaped[1..escaped.len() - 1]);
        }

        Ok(result)
    }

    /// Merge another config into this one (other takes precedence).
    pub fn merge(mut self, other: Self) -> Self {
        if other.schema.is_some() {
            self.schema = other.schema;
        }
        if other.project_root.is_some() {
            self.project_root = other.project_root;
        }
        if other.log_level.is_some() {
            self.log_level = other.log_level;
        }
        self.provider = merge_with(self.provider, other.provider, ProviderConfig::merge);
        self.policy = merge_with(self.policy, other.policy, PolicyConfig::merge);
        self.loop_config = merge_with(self.loop_config, other.loop_config, LoopOverrides::merge);
        self.storage = merge_with(self.storage, other.storage, StorageConfig::merge);
        self
    }

    /// Project root, falling back to `cwd`.
    pub fn project_root_or(&self, cwd: &Path) -> PathBuf {
        self.project_root.clone().unwrap_or_else(|| cwd.to_path_buf())
    }

    pub fn log_level(&self) -> Option<LogLevel> {
        self.log_level.as_deref().and_then(LogLevel::parse)
    }

    pub fn provider_kind(&self) -> ProviderKind {
        self.provider
            .as_ref()
            .and_then(|p| p.kind)
            .unwrap_or_default()
    }

    pub fn model(&self) -> String {
        self.provider
            .as_ref()
            .and_then(|p| p.model.clone())
            .unwrap_or_else(|| self.provider_kind().default_model().to_string())
    }

    /// API key from the config, else from the provider's environment variable.
    pub fn api_key(&self) -> CoreResult<String> {
        let kind = self.provider_kind();
        self.provider
            .as_ref()
            .and_then(|p| p.api_key.clone())
            .filter(|key| !key.is_empty())
            .or_else(|| std::env::var(kind.api_key_env()).ok())
            .filter(|key| !key.is_empty())
            .ok_or_else(|| {
                ConfigError::MissingApiKey {
                    provider: kind.to_string(),
                    env: kind.api_key_env().to_string(),
                }
                .into()
            })
    }

    pub fn policy_config(&self) -> PolicyConfig {
        self.policy.clone().unwrap_or_default()
    }

    /// Effective loop configuration.
    pub fn loop_config(&self) -> CoreResult<LoopConfig> {
        let config = self
            .loop_config
            .as_ref()
            .map(|o| o.apply(LoopConfig::default()))
            .unwrap_or_default();
        if config.max_rounds == 0 {
            return Err(ConfigError::validation("loop.max_rounds must be at least 1").into());
        }
        Ok(config)
    }

    /// Directory holding conversation files.
    pub fn data_dir(&self) -> CoreResult<PathBuf> {
        self.storage
            .as_ref()
            .and_then(|s| s.data_dir.clone())
            .or_else(sidecode_util::log::default_data_dir)
            .ok_or_else(|| {
                ConfigError::InvalidPath("Could not determine data directory".to_string()).into()
            })
    }

    pub fn encryption_enabled(&self) -> bool {
        self.storage
            .as_ref()
            .and_then(|s| s.encryption)
            .unwrap_or(false)
    }

    /// Storage for conversations. `passphrase` is required when encryption is
    /// enabled and ignored otherwise.
    pub fn storage_with(&self, passphrase: Option<String>) -> CoreResult<JsonStorage> {
        let storage = JsonStorage::new(self.data_dir()?);
        if !self.encryption_enabled() {
            return Ok(storage);
        }
        let passphrase = passphrase
            .filter(|p| !p.is_empty())
            .ok_or_else(|| ConfigError::MissingPassphrase {
                env: PASSPHRASE_ENV.to_string(),
            })?;
        let cipher = Cipher::new(passphrase).map_err(sidecode_storage::StorageError::from)?;
        Ok(storage.with_cipher(cipher))
    }

    /// [`Config::storage_with`] using `SIDECODE_PASSPHRASE`.
    pub fn storage(&self) -> CoreResult<JsonStorage> {
        self.storage_with(std::env::var(PASSPHRASE_ENV).ok())
    }
}

fn merge_with<T>(base: Option<T>, other: Option<T>, merge: impl FnOnce(T, T) -> T) -> Option<T> {
    match (base, other) {
        (Some(b), Some(o)) => Some(merge(b, o)),
        (b, None) => b,
        (None, o) => o,
    }
}
