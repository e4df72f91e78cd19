//! Immutable per-run context handed to every component.

use std::path::{Path, PathBuf};

use gencompare_store::Identity;

use crate::config::RunConfig;
use crate::domain::error::ConfigError;

/// Everything a run needs to know about where it is and what it was asked
/// to do. Built once at startup; never mutated.
#[derive(Debug, Clone)]
pub struct RunContext {
    repo_root: PathBuf,
    invocation_dir: PathBuf,
    config: RunConfig,
}

impl RunContext {
    /// Validate `config` and bind it to a repository.
    ///
    /// `invocation_dir` is the directory relative input paths are
    /// interpreted against; it is captured here so later checkouts cannot
    /// change its meaning.
    pub fn new(
        repo_root: impl Into<PathBuf>,
        invocation_dir: impl Into<PathBuf>,
        config: RunConfig,
    ) -> std::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            repo_root: repo_root.into(),
            invocation_dir: invocation_dir.into(),
            config,
        })
    }

    pub fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    pub fn invocation_dir(&self) -> &Path {
        &self.invocation_dir
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Absolute location of the history store.
    pub fn store_path(&self) -> PathBuf {
        self.repo_root.join(&self.config.history.store_path)
    }

    /// Store location relative to the repository root, `/`-separated, if it
    /// lies inside the repository. Used to protect it from cleaning.
    pub fn store_relative(&self) -> Option<String> {
        let store = self.store_path();
        let rel = store.strip_prefix(&self.repo_root).ok()?;
        let rel = rel.to_string_lossy().replace('\\', "/");
        (!rel.is_empty()).then_some(rel)
    }

    /// Identity the history store commits as.
    pub fn store_identity(&self) -> Identity {
        Identity::new(
            self.config.history.identity_name.clone(),
            self.config.history.identity_email.clone(),
        )
    }

    pub fn build_file(&self) -> PathBuf {
        self.config.build.project_path(&self.repo_root)
    }

    pub fn tool_dir(&self) -> PathBuf {
        self.config.build.tool_dir(&self.repo_root)
    }

    pub fn cross_ref_prefix(&self) -> &str {
        &self.config.history.cross_ref_prefix
    }
}
