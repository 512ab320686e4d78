//! Wiring from configuration to stores, models and the tool loop.

use anyhow::Context;
use sidecode_core::{Config, ConversationStore, ToolLoop};
use sidecode_provider::{BoxedLanguageModel, HttpModel, ReqwestTransport};
use sidecode_sandbox::{CommandPolicy, SandboxResolver};
use sidecode_tools::{ToolContext, ToolRegistry};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Everything a command needs, built lazily from the loaded config.
pub struct App {
    pub config: Config,
    /// Directory the tools are confined to.
    pub root: PathBuf,
}

impl App {
    /// Load config for `project`, or for the current directory.
    pub async fn load(project: Option<&Path>) -> anyhow::Result<Self> {
        let cwd = match project {
            Some(dir) => dir.to_path_buf(),
            None => std::env::current_dir().context("Could not determine current directory")?,
        };
        let (config, sources) = Config::load(Some(&cwd)).await?;
        debug!(sources = ?sources, "Configuration loaded");
        let root = config.project_root_or(&cwd);
        Ok(Self { config, root })
    }

    pub fn resolver(&self) -> anyhow::Result<SandboxResolver> {
        SandboxResolver::new(&self.root)
            .with_context(|| format!("Invalid project root {}", self.root.display()))
    }

    pub fn policy(&self) -> CommandPolicy {
        CommandPolicy::new(&self.config.policy_config())
    }

    pub fn store(&self) -> anyhow::Result<Arc<ConversationStore>> {
        Ok(Arc::new(ConversationStore::new(self.config.storage()?)))
    }

    /// The configured provider, talking HTTP.
    pub fn model(&self) -> anyhow::Result<BoxedLanguageModel> {
        let kind = self.config.provider_kind();
        let api_key = self.config.api_key()?;
        let model = self.config.model();
        let base_url = self
            .config
            .provider
            .as_ref()
            .and_then(|p| p.base_url.as_deref());
        debug!(provider = %kind, model = %model, "Building model");

        let adapter = kind.adapter(&api_key, &model, base_url)?;
        Ok(Arc::new(HttpModel::new(
            adapter,
            Arc::new(ReqwestTransport::new()),
        )))
    }

    pub fn tool_loop(&self) -> anyhow::Result<ToolLoop> {
        let context = ToolContext::new(self.resolver()?, self.policy());
        Ok(ToolLoop::new(
            self.store()?,
            self.model()?,
            Arc::new(ToolRegistry::with_builtins()),
            context,
        ))
    }
}
