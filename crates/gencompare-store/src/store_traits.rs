//! Storage trait definitions for gencompare
//!
//! `HistoryStore` is the append-only ledger of output trees. Every commit
//! holds the complete generated output of exactly one source revision, so
//! comparing two revisions is a plain diff between two commits.
//!
//! The trait is async and backend-agnostic. A git-backed implementation lives
//! in `git_store`; an in-memory fake for tests lives in `fakes`.

use std::path::Path;

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};

use crate::error::StoreError;

/// Result type for storage operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Name and email pair used for authors and for the store's own identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Identity {
    pub name: String,
    pub email: String,
}

impl Identity {
    pub fn new(name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            email: email.into(),
        }
    }

    /// Parse the `Name <email>` form. Returns `None` when the angle brackets
    /// are missing.
    pub fn parse(s: &str) -> Option<Self> {
        let open = s.rfind('<')?;
        let close = s[open..].find('>')? + open;
        let name = s[..open].trim();
        let email = s[open + 1..close].trim();
        Some(Self::new(name, email))
    }
}

impl std::fmt::Display for Identity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} <{}>", self.name, self.email)
    }
}

/// Identifier of a commit inside the history store.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommitId(pub String);

impl CommitId {
    /// Short form (first 10 chars).
    pub fn short(&self) -> &str {
        &self.0[..10.min(self.0.len())]
    }
}

impl std::fmt::Display for CommitId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Everything needed to write one commit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommitRequest {
    /// Author copied from the source revision.
    pub author: Identity,
    /// Author date copied from the source revision; also used as committer date.
    pub date: DateTime<FixedOffset>,
    /// Full commit message, including the provenance trailer.
    pub message: String,
}

/// Append-only history of output trees.
///
/// Guarantees:
/// - `stage_all(tree)` replaces the staged state with exactly the contents of
///   `tree`; files absent from `tree` are staged as deleted.
/// - `has_pending_changes(tree)` is `false` iff the staged state equals head.
/// - `commit` never rewrites existing history.
/// - The store's metadata never moves: the output tree is used as an external
///   work tree and is only read.
#[async_trait]
pub trait HistoryStore: Send + Sync {
    /// Directory the store lives in.
    fn location(&self) -> &Path;

    /// Whether the store has been initialized.
    async fn exists(&self) -> StoreResult<bool>;

    /// Create the store and configure the identity used as committer.
    async fn init_with_identity(&self, identity: &Identity) -> StoreResult<()>;

    /// Stage the full contents of `work_tree`.
    async fn stage_all(&self, work_tree: &Path) -> StoreResult<()>;

    /// Whether the staged state differs from head.
    async fn has_pending_changes(&self, work_tree: &Path) -> StoreResult<bool>;

    /// Commit the staged state.
    async fn commit(&self, work_tree: &Path, request: &CommitRequest) -> StoreResult<CommitId>;

    /// Reset the store's own working copy to head. No-op on an empty store.
    async fn reset_hard(&self) -> StoreResult<()>;

    /// Repack and garbage-collect.
    async fn compact(&self) -> StoreResult<()>;

    /// Message of the most recent commit, `None` for an empty store.
    async fn last_commit_message(&self) -> StoreResult<Option<String>>;

    /// Number of commits reachable from head.
    async fn commit_count(&self) -> StoreResult<usize>;

    /// Remember which source revision was processed last. Kept outside the
    /// committed history, so it moves even when no commit is made.
    async fn write_checkpoint(&self, marker: &str) -> StoreResult<()>;

    /// The last checkpoint written, `None` if there is none.
    async fn read_checkpoint(&self) -> StoreResult<Option<String>>;
}
