//! In-memory fake for `SourceRepository` (testing only)
//!
//! Models a single first-parent chain of commits plus named branches. Every
//! call is recorded so tests can assert on the sequence of housekeeping
//! steps, and individual operations can be made to fail a set number of
//! times.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Duration, FixedOffset};
use gencompare_store::Identity;

use crate::domain::error::{CompareError, Result};
use crate::domain::revision::{Position, Revision, RevisionId};
use crate::vcs::SourceRepository;

#[derive(Debug, Default)]
struct FakeState {
    /// Oldest first.
    commits: Vec<Revision>,
    branches: HashMap<String, usize>,
    head: usize,
    branch: Option<String>,
    calls: Vec<String>,
    failures: HashMap<String, usize>,
}

/// In-memory source repository.
#[derive(Debug)]
pub struct FakeSourceRepository {
    root: PathBuf,
    state: Mutex<FakeState>,
}

impl FakeSourceRepository {
    /// A repository at `root` with `commits` linear commits on `main`,
    /// checked out at the newest one.
    pub fn linear(root: impl Into<PathBuf>, commits: usize) -> Self {
        let repo = Self {
            root: root.into(),
            state: Mutex::new(FakeState::default()),
        };
        for i in 0..commits {
            repo.push_commit(&format!("commit {i}"));
        }
        repo
    }

    /// Append a commit to `main` and move HEAD to it.
    pub fn push_commit(&self, message: &str) -> RevisionId {
        let mut state = self.state.lock().unwrap();
        let index = state.commits.len();
        let id = RevisionId::new(format!("{:040x}", index + 1));
        let base: DateTime<FixedOffset> =
            DateTime::parse_from_rfc3339("2024-01-01T09:00:00+01:00").unwrap();
        state.commits.push(Revision {
            id: id.clone(),
            display_name: "main".to_string(),
            short_id: id.short().to_string(),
            message: message.to_string(),
            author: Identity::new(format!("author {index}"), format!("a{index}@example.com")),
            date: base + Duration::hours(index as i64),
        });
        state.branches.insert("main".to_string(), index);
        state.head = index;
        state.branch = Some("main".to_string());
        id
    }

    /// Make the next `times` calls of `operation` fail.
    pub fn fail_times(&self, operation: &str, times: usize) {
        self.state
            .lock()
            .unwrap()
            .failures
            .insert(operation.to_string(), times);
    }

    /// Every call made so far, as `operation` or `operation:arg`.
    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    /// Id of the commit at `index` (0 = oldest).
    pub fn id_at(&self, index: usize) -> RevisionId {
        self.state.lock().unwrap().commits[index].id.clone()
    }

    fn record(&self, call: String, operation: &str) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.calls.push(call);
        if let Some(remaining) = state.failures.get_mut(operation) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(CompareError::Vcs(format!("injected {operation} failure")));
            }
        }
        Ok(())
    }

    fn lookup(state: &FakeState, treeish: &str) -> Option<usize> {
        if treeish == "HEAD" {
            return Some(state.head);
        }
        if let Some(index) = state.branches.get(treeish) {
            return Some(*index);
        }
        state
            .commits
            .iter()
            .position(|c| c.id.as_str().starts_with(&treeish.to_ascii_lowercase()))
    }
}

#[async_trait]
impl SourceRepository for FakeSourceRepository {
    fn root(&self) -> &Path {
        &self.root
    }

    async fn current_position(&self) -> Result<Position> {
        let state = self.state.lock().unwrap();
        let head = state
            .commits
            .get(state.head)
            .ok_or_else(|| CompareError::Vcs("empty repository".to_string()))?;
        Ok(Position {
            branch: state.branch.clone(),
            id: head.id.clone(),
        })
    }

    async fn resolve_treeish(&self, treeish: &str) -> Result<RevisionId> {
        let state = self.state.lock().unwrap();
        Self::lookup(&state, treeish)
            .map(|i| state.commits[i].id.clone())
            .ok_or_else(|| CompareError::Vcs(format!("unknown revision {treeish}")))
    }

    async fn ancestors(&self, n: usize) -> Result<Vec<RevisionId>> {
        let state = self.state.lock().unwrap();
        Ok(state.commits[..=state.head]
            .iter()
            .rev()
            .take(n.saturating_add(1))
            .map(|c| c.id.clone())
            .collect())
    }

    async fn count_ancestors_since(&self, id: &RevisionId) -> Result<usize> {
        let state = self.state.lock().unwrap();
        let index = Self::lookup(&state, id.as_str())
            .ok_or_else(|| CompareError::Vcs(format!("unknown revision {id}")))?;
        Ok(state.head.saturating_sub(index))
    }

    async fn checkout(&self, treeish: &str) -> Result<()> {
        self.record(format!("checkout:{treeish}"), "checkout")?;
        let mut state = self.state.lock().unwrap();
        let index = Self::lookup(&state, treeish)
            .ok_or_else(|| CompareError::Vcs(format!("unknown revision {treeish}")))?;
        let branch = state
            .branches
            .contains_key(treeish)
            .then(|| treeish.to_string());
        state.branch = branch;
        state.head = index;
        Ok(())
    }

    async fn read_commit_metadata(&self) -> Result<Revision> {
        let state = self.state.lock().unwrap();
        let mut revision = state.commits[state.head].clone();
        revision.display_name = state.branch.clone().unwrap_or_else(|| "HEAD".to_string());
        Ok(revision)
    }

    async fn clean(&self, exclude: &[String]) -> Result<()> {
        self.record(format!("clean:{}", exclude.join(",")), "clean")
    }

    async fn reset_hard(&self) -> Result<()> {
        self.record("reset".to_string(), "reset")
    }
}
