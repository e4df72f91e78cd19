//! Turns a `RevisionSpec` into the ordered list of treeishes to visit.

use gencompare_store::HistoryStore;
use tracing::{debug, info};

use crate::domain::error::{ConfigError, Result};
use crate::domain::revision::RevisionSpec;
use crate::provenance::parse_provenance_marker_with_legacy;
use crate::vcs::SourceRepository;

/// Resolves revision selections against a source repository and, for
/// catch-up, the history store.
pub struct RevisionResolver<'a> {
    repo: &'a dyn SourceRepository,
    store: &'a dyn HistoryStore,
    legacy_prefix: Option<String>,
}

impl<'a> RevisionResolver<'a> {
    pub fn new(repo: &'a dyn SourceRepository, store: &'a dyn HistoryStore) -> Self {
        Self {
            repo,
            store,
            legacy_prefix: None,
        }
    }

    /// Also accept version 0 provenance headers written with `prefix`.
    pub fn with_legacy_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.legacy_prefix = Some(prefix.into());
        self
    }

    /// Ordered treeishes for `spec`, oldest first for history walks.
    pub async fn resolve(&self, spec: &RevisionSpec) -> Result<Vec<String>> {
        match spec {
            RevisionSpec::Explicit(list) => Ok(list.clone()),
            RevisionSpec::Backtrack(n) => self.backtrack(*n).await,
            RevisionSpec::Catchup => self.catchup().await,
        }
    }

    async fn backtrack(&self, n: usize) -> Result<Vec<String>> {
        let mut ids = self.repo.ancestors(n).await?;
        let requested = n.saturating_add(1);
        if ids.len() < requested {
            return Err(ConfigError::InsufficientHistory {
                requested,
                available: ids.len(),
            }
            .into());
        }
        ids.reverse();
        debug!(count = ids.len(), "resolved backtrack revisions");
        Ok(ids.into_iter().map(|id| id.to_string()).collect())
    }

    async fn catchup(&self) -> Result<Vec<String>> {
        let no_history = || ConfigError::NoPriorHistory {
            path: self.store.location().display().to_string(),
        };
        if !self.store.exists().await? {
            return Err(no_history().into());
        }
        // The checkpoint also covers revisions whose output was unchanged,
        // which leave no commit behind.
        let message = match self.store.read_checkpoint().await? {
            Some(marker) => marker,
            None => self
                .store
                .last_commit_message()
                .await?
                .ok_or_else(no_history)?,
        };

        let last = parse_provenance_marker_with_legacy(&message, self.legacy_prefix.as_deref())
            .map_err(ConfigError::from)?;
        let behind = self.repo.count_ancestors_since(&last).await?;
        info!(last = %last, behind, "catching up from last recorded revision");

        if behind == 0 {
            return Ok(Vec::new());
        }
        self.backtrack(behind - 1).await
    }
}
