//! Build orchestration.
//!
//! One external build action per revision covers every requested tool.
//! Afterwards each tool binary is located from the configured tool
//! directory. A failed build is data, not an error.

use std::path::{Path, PathBuf};

use tracing::{debug, info, warn};

use crate::config::{BuildBackend, Platform};
use crate::context::RunContext;
use crate::domain::tool::{GeneratorTool, ToolSpec};
use crate::process::run_captured;

/// Outcome of building the tools for one revision.
#[derive(Debug, Clone)]
pub enum BuildResult {
    Succeeded { tools: Vec<GeneratorTool> },
    Failed {
        diagnostics: String,
    },
}

/// Builds generator tools with the configured backend.
#[derive(Debug, Clone)]
pub struct BuildOrchestrator {
    backend: BuildBackend,
    platform: Platform,
    build_file: PathBuf,
    tool_dir: PathBuf,
    repo_root: PathBuf,
    parallel: bool,
}

impl BuildOrchestrator {
    pub fn new(ctx: &RunContext) -> Self {
        let config = ctx.config();
        Self {
            backend: config.build.backend(),
            platform: config.build.platform,
            build_file: ctx.build_file(),
            tool_dir: ctx.tool_dir(),
            repo_root: ctx.repo_root().to_path_buf(),
            parallel: config.generation.parallel,
        }
    }

    /// The argv of the build action for `tools`.
    pub fn command(&self, tools: &[ToolSpec]) -> Vec<String> {
        let names = tools.iter().map(|t| t.name.clone());
        match &self.backend {
            BuildBackend::Make => {
                let dir = self
                    .build_file
                    .parent()
                    .unwrap_or(&self.repo_root)
                    .to_string_lossy()
                    .to_string();
                let mut argv = vec!["make".to_string(), "-C".to_string(), dir];
                if self.parallel {
                    argv.push("-j".to_string());
                }
                argv.extend(names);
                argv
            }
            BuildBackend::Msbuild => {
                let mut argv = vec!["msbuild".to_string()];
                if self.parallel {
                    argv.push("/m".to_string());
                }
                argv.push(self.build_file.to_string_lossy().to_string());
                argv.extend(
                    [
                        "/target:BuildDist",
                        "/p:Configuration=Debug",
                        "/p:Platform=x64",
                        "/nr:false",
                    ]
                    .map(String::from),
                );
                argv
            }
            BuildBackend::Custom { command } => {
                let mut argv = command.clone();
                argv.extend(names);
                argv
            }
        }
    }

    /// Expected binary location of `name`.
    pub fn binary_path(&self, name: &str) -> PathBuf {
        self.tool_dir
            .join(format!("{name}{}", self.platform.binary_suffix()))
    }

    /// Build `tools` in the current checkout and locate their binaries.
    pub async fn build(&self, tools: &[ToolSpec]) -> BuildResult {
        let argv = self.command(tools);
        info!(command = %argv.join(" "), "building generator tools");

        let output = run_captured(&argv, &self.repo_root, 0).await;
        let log = output.combined();
        if !output.success {
            warn!(exit_code = output.exit_code, "build failed");
            return BuildResult::Failed {
                diagnostics: format!(
                    "build command `{}` exited with code {}\n{}",
                    argv.join(" "),
                    output.exit_code,
                    log
                ),
            };
        }

        let mut located = Vec::with_capacity(tools.len());
        let mut missing = Vec::new();
        for tool in tools {
            let binary = self.binary_path(&tool.name);
            if is_file(&binary) {
                located.push(GeneratorTool {
                    name: tool.name.clone(),
                    binary,
                    concurrency_safe: tool.concurrency_safe,
                });
            } else {
                missing.push(binary.display().to_string());
            }
        }

        if !missing.is_empty() {
            warn!(missing = ?missing, "build reported success but binaries are missing");
            return BuildResult::Failed {
                diagnostics: format!(
                    "build succeeded but tool binaries are missing:\n{}\n{}",
                    missing.join("\n"),
                    log
                ),
            };
        }

        if !log.trim().is_empty() {
            debug!(output = %log.trim(), "build output");
        }
        info!(tools = located.len(), "build complete");
        BuildResult::Succeeded { tools: located }
    }
}

fn is_file(path: &Path) -> bool {
    std::fs::metadata(path).map(|m| m.is_file()).unwrap_or(false)
}
