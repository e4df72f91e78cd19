//! In-memory fake for `HistoryStore` (testing only)
//!
//! `MemoryHistoryStore` snapshots the work tree into a map on every
//! `stage_all`, which is enough to satisfy the trait contract without git.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::error::StoreError;
use crate::store_traits::*;

/// Relative path (with `/` separators) to file bytes.
pub type Tree = BTreeMap<String, Vec<u8>>;

/// One recorded commit.
#[derive(Debug, Clone)]
pub struct MemoryCommit {
    pub id: CommitId,
    pub tree: Tree,
    pub request: CommitRequest,
}

#[derive(Debug, Default)]
struct State {
    identity: Option<Identity>,
    staged: Option<Tree>,
    commits: Vec<MemoryCommit>,
    compactions: usize,
    resets: usize,
    checkpoint: Option<String>,
}

/// In-memory history store.
#[derive(Debug)]
pub struct MemoryHistoryStore {
    location: PathBuf,
    state: Mutex<State>,
}

impl MemoryHistoryStore {
    pub fn new() -> Self {
        Self {
            location: PathBuf::from("memory://history"),
            state: Mutex::new(State::default()),
        }
    }

    /// A store that reports itself as already initialized.
    pub fn initialized(identity: Identity) -> Self {
        let store = Self::new();
        store.state.lock().unwrap().identity = Some(identity);
        store
    }

    /// Seed a commit with the given message and an empty tree.
    pub fn seed_commit(&self, request: CommitRequest) {
        let mut state = self.state.lock().unwrap();
        let id = CommitId(format!("{:040x}", state.commits.len() + 1));
        state.commits.push(MemoryCommit {
            id,
            tree: Tree::new(),
            request,
        });
    }

    pub fn commits(&self) -> Vec<MemoryCommit> {
        self.state.lock().unwrap().commits.clone()
    }

    pub fn identity(&self) -> Option<Identity> {
        self.state.lock().unwrap().identity.clone()
    }

    pub fn compactions(&self) -> usize {
        self.state.lock().unwrap().compactions
    }

    pub fn resets(&self) -> usize {
        self.state.lock().unwrap().resets
    }

    pub fn checkpoint(&self) -> Option<String> {
        self.state.lock().unwrap().checkpoint.clone()
    }
}

impl Default for MemoryHistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

fn snapshot(root: &Path) -> std::io::Result<Tree> {
    let mut tree = Tree::new();
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        for entry in std::fs::read_dir(&dir)? {
            let entry = entry?;
            let path = entry.path();
            if entry.file_type()?.is_dir() {
                pending.push(path);
            } else {
                let rel = path
                    .strip_prefix(root)
                    .unwrap_or(&path)
                    .to_string_lossy()
                    .replace('\\', "/");
                tree.insert(rel, std::fs::read(&path)?);
            }
        }
    }
    Ok(tree)
}

#[async_trait]
impl HistoryStore for MemoryHistoryStore {
    fn location(&self) -> &Path {
        &self.location
    }

    async fn exists(&self) -> StoreResult<bool> {
        Ok(self.state.lock().unwrap().identity.is_some())
    }

    async fn init_with_identity(&self, identity: &Identity) -> StoreResult<()> {
        self.state.lock().unwrap().identity = Some(identity.clone());
        Ok(())
    }

    async fn stage_all(&self, work_tree: &Path) -> StoreResult<()> {
        let tree = snapshot(work_tree)?;
        let mut state = self.state.lock().unwrap();
        if state.identity.is_none() {
            return Err(StoreError::NotInitialized {
                path: self.location.display().to_string(),
            });
        }
        state.staged = Some(tree);
        Ok(())
    }

    async fn has_pending_changes(&self, _work_tree: &Path) -> StoreResult<bool> {
        let state = self.state.lock().unwrap();
        let head = state.commits.last().map(|c| c.tree.clone()).unwrap_or_default();
        Ok(state.staged.as_ref().is_some_and(|staged| *staged != head))
    }

    async fn commit(&self, _work_tree: &Path, request: &CommitRequest) -> StoreResult<CommitId> {
        let mut state = self.state.lock().unwrap();
        let tree = state.staged.clone().ok_or_else(|| StoreError::Command {
            command: "commit".to_string(),
            stderr: "nothing staged".to_string(),
        })?;
        let id = CommitId(format!("{:040x}", state.commits.len() + 1));
        state.commits.push(MemoryCommit {
            id: id.clone(),
            tree,
            request: request.clone(),
        });
        Ok(id)
    }

    async fn reset_hard(&self) -> StoreResult<()> {
        self.state.lock().unwrap().resets += 1;
        Ok(())
    }

    async fn compact(&self) -> StoreResult<()> {
        self.state.lock().unwrap().compactions += 1;
        Ok(())
    }

    async fn last_commit_message(&self) -> StoreResult<Option<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.commits.last().map(|c| c.request.message.clone()))
    }

    async fn commit_count(&self) -> StoreResult<usize> {
        Ok(self.state.lock().unwrap().commits.len())
    }

    async fn write_checkpoint(&self, marker: &str) -> StoreResult<()> {
        let mut state = self.state.lock().unwrap();
        if state.identity.is_none() {
            return Err(StoreError::NotInitialized {
                path: self.location.display().to_string(),
            });
        }
        state.checkpoint = Some(marker.trim().to_string());
        Ok(())
    }

    async fn read_checkpoint(&self) -> StoreResult<Option<String>> {
        Ok(self.state.lock().unwrap().checkpoint.clone())
    }
}
