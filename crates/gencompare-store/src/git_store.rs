//! Git-backed history store.
//!
//! The store is an ordinary git repository at `location`. Output trees are
//! never moved into it: every staging and commit command runs with
//! `--git-dir <location>/.git --work-tree <output tree>`, so the metadata
//! directory stays where it is even if the process is interrupted midway.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::debug;

use crate::error::StoreError;
use crate::store_traits::{CommitId, CommitRequest, HistoryStore, Identity, StoreResult};

/// Branch name used when creating a fresh store.
const DEFAULT_BRANCH: &str = "master";

/// Checkpoint file inside the git dir.
const CHECKPOINT_FILE: &str = "GENCOMPARE_LAST";

/// History store backed by a local git repository.
#[derive(Debug, Clone)]
pub struct GitHistoryStore {
    location: PathBuf,
}

impl GitHistoryStore {
    pub fn new(location: impl Into<PathBuf>) -> Self {
        Self {
            location: location.into(),
        }
    }

    fn git_dir(&self) -> PathBuf {
        self.location.join(".git")
    }

    fn checkpoint_path(&self) -> PathBuf {
        self.git_dir().join(CHECKPOINT_FILE)
    }

    /// Base command with prompts and signing disabled.
    fn git(&self) -> Command {
        let mut cmd = Command::new("git");
        cmd.env("GIT_TERMINAL_PROMPT", "0")
            .env("GIT_ASK_YESNO", "false")
            .arg("-c")
            .arg("commit.gpgsign=false")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Command bound to the store's git dir and the given work tree.
    fn git_with_tree(&self, work_tree: &Path) -> Command {
        let mut cmd = self.git();
        cmd.arg("--git-dir")
            .arg(self.git_dir())
            .arg("--work-tree")
            .arg(work_tree)
            .current_dir(work_tree);
        cmd
    }

    /// Command run inside the store directory itself.
    fn git_in_store(&self) -> Command {
        let mut cmd = self.git();
        cmd.arg("-C").arg(&self.location);
        cmd
    }

    async fn has_head(&self) -> StoreResult<bool> {
        let output = self
            .git_in_store()
            .args(["rev-parse", "--verify", "--quiet", "HEAD"])
            .output()
            .await?;
        Ok(output.status.success())
    }
}

/// Run a prepared command and return its trimmed stdout.
async fn run(mut cmd: Command, label: &str) -> StoreResult<String> {
    debug!(command = %label, "running store command");
    let output = cmd.output().await?;
    if !output.status.success() {
        return Err(StoreError::Command {
            command: label.to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

#[async_trait]
impl HistoryStore for GitHistoryStore {
    fn location(&self) -> &Path {
        &self.location
    }

    async fn exists(&self) -> StoreResult<bool> {
        Ok(self.git_dir().is_dir())
    }

    async fn init_with_identity(&self, identity: &Identity) -> StoreResult<()> {
        tokio::fs::create_dir_all(&self.location).await?;

        let mut init = self.git_in_store();
        init.arg("-c")
            .arg(format!("init.defaultBranch={DEFAULT_BRANCH}"))
            .args(["init", "--quiet"]);
        run(init, "git init").await?;

        let mut name = self.git_in_store();
        name.args(["config", "user.name", &identity.name]);
        run(name, "git config user.name").await?;

        let mut email = self.git_in_store();
        email.args(["config", "user.email", &identity.email]);
        run(email, "git config user.email").await?;

        Ok(())
    }

    async fn stage_all(&self, work_tree: &Path) -> StoreResult<()> {
        if !self.exists().await? {
            return Err(StoreError::NotInitialized {
                path: self.location.display().to_string(),
            });
        }
        let mut cmd = self.git_with_tree(work_tree);
        cmd.args(["add", "--all", "--force"]);
        run(cmd, "git add --all").await?;
        Ok(())
    }

    async fn has_pending_changes(&self, work_tree: &Path) -> StoreResult<bool> {
        let mut cmd = self.git_with_tree(work_tree);
        cmd.args(["status", "--porcelain", "--untracked-files=all"]);
        let status = run(cmd, "git status --porcelain").await?;
        Ok(!status.is_empty())
    }

    async fn commit(&self, work_tree: &Path, request: &CommitRequest) -> StoreResult<CommitId> {
        if request.message.trim().is_empty() {
            return Err(StoreError::InvalidMessage(
                "commit message must not be empty".to_string(),
            ));
        }

        let date = request.date.to_rfc3339();
        let mut cmd = self.git_with_tree(work_tree);
        cmd.env("GIT_AUTHOR_DATE", &date)
            .env("GIT_COMMITTER_DATE", &date)
            .args(["commit", "--quiet", "--cleanup=whitespace"])
            .arg(format!("--author={}", request.author))
            .arg("-m")
            .arg(&request.message);
        run(cmd, "git commit").await?;

        let mut head = self.git_in_store();
        head.args(["rev-parse", "HEAD"]);
        let id = run(head, "git rev-parse HEAD").await?;
        Ok(CommitId(id))
    }

    async fn reset_hard(&self) -> StoreResult<()> {
        if !self.has_head().await? {
            return Ok(());
        }
        let mut cmd = self.git_in_store();
        cmd.args(["reset", "--hard", "--quiet"]);
        run(cmd, "git reset --hard").await?;
        Ok(())
    }

    async fn compact(&self) -> StoreResult<()> {
        let mut cmd = self.git_in_store();
        cmd.args(["gc", "--quiet"]);
        run(cmd, "git gc").await?;
        Ok(())
    }

    async fn last_commit_message(&self) -> StoreResult<Option<String>> {
        if !self.exists().await? || !self.has_head().await? {
            return Ok(None);
        }
        let mut cmd = self.git_in_store();
        cmd.args(["log", "-n", "1", "--format=%B"]);
        Ok(Some(run(cmd, "git log -n 1").await?))
    }

    async fn commit_count(&self) -> StoreResult<usize> {
        if !self.exists().await? || !self.has_head().await? {
            return Ok(0);
        }
        let mut cmd = self.git_in_store();
        cmd.args(["rev-list", "--count", "HEAD"]);
        let count = run(cmd, "git rev-list --count").await?;
        count.parse::<usize>().map_err(|e| StoreError::Command {
            command: "git rev-list --count".to_string(),
            stderr: format!("unparsable count {count:?}: {e}"),
        })
    }

    async fn write_checkpoint(&self, marker: &str) -> StoreResult<()> {
        if !self.exists().await? {
            return Err(StoreError::NotInitialized {
                path: self.location.display().to_string(),
            });
        }
        // Write-then-rename so an interrupt never leaves a torn checkpoint.
        let path = self.checkpoint_path();
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, format!("{}\n", marker.trim())).await?;
        tokio::fs::rename(&tmp, &path).await?;
        debug!(marker = %marker.trim(), "checkpoint written");
        Ok(())
    }

    async fn read_checkpoint(&self) -> StoreResult<Option<String>> {
        match tokio::fs::read_to_string(self.checkpoint_path()).await {
            Ok(text) if !text.trim().is_empty() => Ok(Some(text.trim().to_string())),
            Ok(_) => Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}
