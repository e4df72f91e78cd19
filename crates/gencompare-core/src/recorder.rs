//! Folds output trees into the history store.

use std::path::Path;
use std::sync::Arc;

use gencompare_store::{CommitRequest, HistoryStore, Identity};
use tracing::{debug, info};

use crate::context::RunContext;
use crate::domain::error::Result;
use crate::domain::report::RecordOutcome;
use crate::domain::revision::Revision;
use crate::provenance::{compose_message, marker_line};

/// Writes one commit per changed output tree, with provenance copied from
/// the source revision.
pub struct HistoryRecorder {
    store: Arc<dyn HistoryStore>,
    identity: Identity,
    prefix: String,
    compact_every: usize,
    processed: usize,
}

impl HistoryRecorder {
    pub fn new(store: Arc<dyn HistoryStore>, ctx: &RunContext) -> Self {
        Self {
            store,
            identity: ctx.store_identity(),
            prefix: ctx.cross_ref_prefix().to_string(),
            compact_every: ctx.config().history.compact_every.max(1),
            processed: 0,
        }
    }

    pub fn store(&self) -> &Arc<dyn HistoryStore> {
        &self.store
    }

    /// Create the store if it does not exist yet. Reuses an existing one.
    pub async fn ensure_store(&self) -> Result<()> {
        if self.store.exists().await? {
            debug!(store = %self.store.location().display(), "reusing history store");
            return Ok(());
        }
        info!(store = %self.store.location().display(), "initializing history store");
        self.store.init_with_identity(&self.identity).await?;
        Ok(())
    }

    /// Commit request for `revision`. An author with no name or email falls
    /// back to the store identity.
    pub fn commit_request(&self, revision: &Revision) -> CommitRequest {
        let author = if revision.author.name.trim().is_empty()
            || revision.author.email.trim().is_empty()
        {
            self.identity.clone()
        } else {
            revision.author.clone()
        };
        CommitRequest {
            author,
            date: revision.date,
            message: compose_message(revision, &self.prefix),
        }
    }

    /// Stage `tree` as the full new state and commit it if it differs from
    /// head. Either way the checkpoint moves to `revision`. Compacts the
    /// store every `compact_every` recorded revisions.
    pub async fn record(&mut self, tree: &Path, revision: &Revision) -> Result<RecordOutcome> {
        self.store.stage_all(tree).await?;

        let outcome = if self.store.has_pending_changes(tree).await? {
            let request = self.commit_request(revision);
            let id = self.store.commit(tree, &request).await?;
            info!(commit = %id.short(), revision = %revision.short_id, "recorded output tree");
            RecordOutcome::Committed {
                commit_id: id.to_string(),
            }
        } else {
            info!(revision = %revision.short_id, "output unchanged, nothing to record");
            RecordOutcome::Unchanged
        };
        self.store.write_checkpoint(&marker_line(&revision.id)).await?;

        self.processed += 1;
        if self.processed % self.compact_every == 0 {
            info!(processed = self.processed, "compacting history store");
            self.store.compact().await?;
        }
        Ok(outcome)
    }

    /// Restore the store's own working copy to head and compact it.
    pub async fn finalize(&self) -> Result<()> {
        if !self.store.exists().await? {
            return Ok(());
        }
        self.store.reset_hard().await?;
        self.store.compact().await?;
        Ok(())
    }
}
