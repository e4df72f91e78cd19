//! Host repository access.
//!
//! `SourceRepository` is the seam between the driver and the version-control
//! system of the repository being compared. `GitRepository` implements it by
//! shelling out to `git`; tests use `fakes::FakeSourceRepository`.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use chrono::DateTime;
use gencompare_store::Identity;
use tokio::process::Command;
use tracing::debug;

use crate::domain::error::{CompareError, Result};
use crate::domain::revision::{Position, Revision, RevisionId};

/// Version-control operations the driver needs from the host repository.
#[async_trait]
pub trait SourceRepository: Send + Sync {
    /// Top-level directory of the working tree.
    fn root(&self) -> &Path;

    /// Branch (if any) and commit currently checked out.
    async fn current_position(&self) -> Result<Position>;

    /// Resolve a branch, tag or id to a full commit id.
    async fn resolve_treeish(&self, treeish: &str) -> Result<RevisionId>;

    /// The current commit followed by up to `n` first-parent ancestors,
    /// newest first. Shorter when the history runs out.
    async fn ancestors(&self, n: usize) -> Result<Vec<RevisionId>>;

    /// Number of first-parent commits in `id..HEAD`.
    async fn count_ancestors_since(&self, id: &RevisionId) -> Result<usize>;

    /// Check out `treeish`, detaching if it is not a branch.
    async fn checkout(&self, treeish: &str) -> Result<()>;

    /// Metadata of the commit currently checked out.
    async fn read_commit_metadata(&self) -> Result<Revision>;

    /// Remove untracked and ignored files, keeping the given
    /// root-relative paths.
    async fn clean(&self, exclude: &[String]) -> Result<()>;

    /// Discard modifications to tracked files.
    async fn reset_hard(&self) -> Result<()>;
}

/// `SourceRepository` backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitRepository {
    root: PathBuf,
}

impl GitRepository {
    /// Open the repository whose working tree contains `dir`.
    pub async fn discover(dir: &Path) -> Result<Self> {
        let top = git_output(dir, &["rev-parse", "--show-toplevel"]).await?;
        let root = dunce::canonicalize(&top)
            .map_err(|e| CompareError::Vcs(format!("cannot canonicalize {top}: {e}")))?;
        Ok(Self { root })
    }

    /// Use `root` as-is; it must be the top of a git working tree.
    pub fn at(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    async fn git(&self, args: &[&str]) -> Result<String> {
        git_output(&self.root, args).await
    }
}

/// Run git in `dir` with prompts disabled and return trimmed stdout.
async fn git_output(dir: &Path, args: &[&str]) -> Result<String> {
    debug!(args = ?args, "running git");
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .env("GIT_TERMINAL_PROMPT", "0")
        .env("GIT_ASK_YESNO", "false")
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .output()
        .await
        .map_err(|e| CompareError::Vcs(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(CompareError::Vcs(format!(
            "git {} failed: {}",
            args.join(" "),
            stderr.trim()
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
}

fn parse_count(raw: &str) -> Result<usize> {
    raw.parse::<usize>()
        .map_err(|e| CompareError::Vcs(format!("unparsable commit count {raw:?}: {e}")))
}

#[async_trait]
impl SourceRepository for GitRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn current_position(&self) -> Result<Position> {
        let id = RevisionId::new(self.git(&["rev-parse", "HEAD"]).await?);
        let branch = self
            .git(&["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await
            .ok()
            .filter(|b| !b.is_empty());
        Ok(Position { branch, id })
    }

    async fn resolve_treeish(&self, treeish: &str) -> Result<RevisionId> {
        let spec = format!("{treeish}^{{commit}}");
        let id = self.git(&["rev-parse", "--verify", "--quiet", &spec]).await?;
        Ok(RevisionId::new(id))
    }

    async fn ancestors(&self, n: usize) -> Result<Vec<RevisionId>> {
        let max = format!("--max-count={}", n.saturating_add(1));
        let out = self.git(&["rev-list", "--first-parent", &max, "HEAD"]).await?;
        Ok(out
            .lines()
            .filter(|l| !l.trim().is_empty())
            .map(RevisionId::new)
            .collect())
    }

    async fn count_ancestors_since(&self, id: &RevisionId) -> Result<usize> {
        let range = format!("{id}..HEAD");
        let out = self
            .git(&["rev-list", "--count", "--first-parent", &range])
            .await?;
        parse_count(&out)
    }

    async fn checkout(&self, treeish: &str) -> Result<()> {
        self.git(&["-c", "advice.detachedHead=false", "checkout", "--quiet", treeish])
            .await?;
        Ok(())
    }

    async fn read_commit_metadata(&self) -> Result<Revision> {
        let raw = self
            .git(&["log", "-n", "1", "--format=%H%x00%an%x00%ae%x00%aI%x00%B", "HEAD"])
            .await?;
        let mut fields = raw.splitn(5, '\0');
        let mut next = |name: &str| {
            fields
                .next()
                .map(str::to_string)
                .ok_or_else(|| CompareError::Vcs(format!("commit metadata is missing {name}")))
        };
        let id = RevisionId::new(next("id")?);
        let author_name = next("author name")?;
        let author_email = next("author email")?;
        let date_raw = next("author date")?;
        let message = next("message")?;

        let date = DateTime::parse_from_rfc3339(date_raw.trim())
            .map_err(|e| CompareError::Vcs(format!("unparsable author date {date_raw:?}: {e}")))?;
        let display_name = self.git(&["rev-parse", "--abbrev-ref", "HEAD"]).await?;
        let short_id = self.git(&["rev-parse", "--short", "HEAD"]).await?;

        Ok(Revision {
            id,
            display_name,
            short_id,
            message: message.trim().to_string(),
            author: Identity::new(author_name, author_email),
            date,
        })
    }

    async fn clean(&self, exclude: &[String]) -> Result<()> {
        let mut args = vec!["clean", "-dqfx"];
        for path in exclude {
            args.push("-e");
            args.push(path);
        }
        self.git(&args).await?;
        Ok(())
    }

    async fn reset_hard(&self) -> Result<()> {
        self.git(&["reset", "--hard", "--quiet"]).await?;
        Ok(())
    }
}
