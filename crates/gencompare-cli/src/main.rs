//! gencompare - compare code-generator output across revisions
//!
//! The `gencompare` command rebuilds the generator tools at each selected
//! revision of the current git repository, runs them over the input files and
//! records every revision's output as one commit of a separate history, so
//! that `git diff` between two commits shows what changed in the generated
//! code.
//!
//! ## Revision selection
//!
//! - `-b/--branch` (repeatable): visit the named treeishes in order
//! - `--back-track N`: the current commit and its N ancestors, oldest first
//! - `--catchup`: every commit since the one recorded last
//! - none of the above: the current checkout only

use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use gencompare_core::telemetry::parse_level;
use gencompare_core::{
    init_tracing, CompareError, ConfigError, ConfigLoader, Driver, GitHistoryStore,
    GitRepository, RecordOutcome, RevisionSpec, RunConfig, RunContext, RunReport,
    SourceRepository,
};
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Parser, Debug)]
#[command(name = "gencompare")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Record generated code for a range of revisions into a diffable history", long_about = None)]
struct Cli {
    /// Generator tool to build and run (repeatable; default: all configured)
    #[arg(short = 'c', long = "compiler", value_name = "NAME")]
    compilers: Vec<String>,

    /// Branch, tag or commit to visit (repeatable, visited in order)
    #[arg(short = 'b', long = "branch", value_name = "TREEISH")]
    branches: Vec<String>,

    /// Visit the current commit and its N first-parent ancestors
    #[arg(long = "back-track", value_name = "N")]
    back_track: Option<usize>,

    /// Visit every commit made since the last recorded one
    #[arg(long)]
    catchup: bool,

    /// Build file used to build the tools
    #[arg(long, value_name = "PATH")]
    proj_path: Option<PathBuf>,

    /// Directory holding the built tool binaries
    #[arg(long, value_name = "DIR")]
    compilers_path: Option<PathBuf>,

    /// Build and run generators in parallel
    #[arg(short, long)]
    parallel: bool,

    /// Repository-relative prefix to drop from the inputs (repeatable)
    #[arg(long = "exclude", value_name = "PREFIX")]
    exclude: Vec<String>,

    /// History store directory
    #[arg(long, env = "GENCOMPARE_STORE_PATH", value_name = "DIR")]
    store_path: Option<PathBuf>,

    /// Do not ask before cleaning the working tree
    #[arg(short = 'y', long)]
    yes: bool,

    /// Configuration file (default: gencompare.toml at the repository root)
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON log lines and a JSON run report
    #[arg(long)]
    json: bool,

    /// Input files or directories (default: the current directory)
    #[arg(value_name = "INPUT")]
    inputs: Vec<PathBuf>,
}

impl Cli {
    fn revision_spec(&self) -> std::result::Result<RevisionSpec, ConfigError> {
        RevisionSpec::from_options(self.branches.clone(), self.back_track, self.catchup)
    }

    /// Layer flags over `config`. Flags that were not given leave the file
    /// value alone.
    fn apply(&self, config: &mut RunConfig) -> std::result::Result<(), ConfigError> {
        config.revisions = self.revision_spec()?;

        if !self.compilers.is_empty() {
            config.tools.names = self.compilers.clone();
        }
        if let Some(path) = &self.proj_path {
            config.build.project_path = Some(path.clone());
        }
        if let Some(dir) = &self.compilers_path {
            config.build.tool_dir = Some(dir.clone());
        }
        if self.parallel {
            config.generation.parallel = true;
        }
        config
            .inputs
            .exclude_prefixes
            .extend(self.exclude.iter().cloned());
        if let Some(path) = &self.store_path {
            config.history.store_path = path.clone();
        }
        if !self.inputs.is_empty() {
            config.inputs.paths = self.inputs.clone();
        }
        if self.json {
            config.logging.json = true;
        }
        if self.verbose {
            config.logging.level = "debug".to_string();
        }
        Ok(())
    }

    fn load_config(&self, repo_root: &Path) -> std::result::Result<RunConfig, ConfigError> {
        let mut config = match &self.config {
            Some(path) => ConfigLoader::load_from_file(path)?,
            None => ConfigLoader::load(repo_root)?,
        };
        self.apply(&mut config)?;
        Ok(config)
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::from(exit_code(&e))
        }
    }
}

/// 2 for configuration errors, 1 for everything else.
fn exit_code(error: &anyhow::Error) -> u8 {
    let is_config = error.chain().any(|cause| {
        cause.downcast_ref::<ConfigError>().is_some()
            || cause
                .downcast_ref::<CompareError>()
                .is_some_and(CompareError::is_config)
    });
    if is_config {
        2
    } else {
        1
    }
}

async fn run(cli: Cli) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to read current directory")?;
    let repo = GitRepository::discover(&cwd)
        .await
        .context("Failed to locate the enclosing git repository")?;
    let repo_root = repo.root().to_path_buf();

    let config = cli.load_config(&repo_root)?;
    init_tracing(config.logging.json, parse_level(&config.logging.level));
    let json = config.logging.json;

    let ctx = RunContext::new(&repo_root, &cwd, config)?;
    info!(
        repo = %repo_root.display(),
        mode = ctx.config().revisions.mode(),
        tools = ?ctx.config().tools.names,
        parallel = ctx.config().generation.parallel,
        "configuration loaded"
    );

    if !cli.yes && !confirm_clean(&repo_root)? {
        println!("Aborted, nothing was changed.");
        return Ok(());
    }

    let (cancel_tx, cancel_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, stopping after the current step");
            let _ = cancel_tx.send(true);
        }
    });

    let store = Arc::new(GitHistoryStore::new(ctx.store_path()));
    let store_path = ctx.store_path();
    let mut driver = Driver::new(ctx, Arc::new(repo), store, cancel_rx);
    let report = driver.run().await?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print_summary(&report, &store_path);
    }
    Ok(())
}

fn confirm_clean(repo_root: &Path) -> Result<bool> {
    use dialoguer::Confirm;

    eprintln!();
    eprintln!("!!! gencompare cleans and hard-resets {}", repo_root.display());
    eprintln!("!!! uncommitted and untracked work in it will be lost");
    eprintln!();
    Confirm::new()
        .with_prompt("Continue?")
        .default(false)
        .interact()
        .context("Failed to get user input")
}

fn print_summary(report: &RunReport, store_path: &Path) {
    for rev in &report.revisions {
        let outcome = match &rev.outcome {
            Some(RecordOutcome::Committed { commit_id }) => {
                format!("committed {}", &commit_id[..commit_id.len().min(12)])
            }
            Some(RecordOutcome::Unchanged) => "unchanged".to_string(),
            None => "not recorded".to_string(),
        };
        let build = if rev.build_succeeded {
            format!(
                "{}/{} invocations failed",
                rev.failed_invocations, rev.total_invocations
            )
        } else {
            "build failed".to_string()
        };
        println!(
            "  {} {:<24} {:<14} {}",
            rev.short_id, rev.display_name, outcome, build
        );
    }

    println!();
    println!(
        "{} revision(s): {} committed, {} unchanged, {} build failure(s)",
        report.revisions.len(),
        report.committed_count(),
        report.unchanged_count(),
        report.build_failure_count()
    );
    if report.interrupted {
        println!("Run was interrupted; the working tree has been restored.");
    }
    println!("History: {}", store_path.display());
}
