//! Structured lifecycle events for a comparison run.
//!
//! - `RevisionSpan` scoping logs to one revision
//! - `emit_*` functions for run start/finish and per-revision transitions
//!
//! Events are emitted at `info!` level with an `event` field so they can be
//! filtered out of JSON logs.

use std::future::Future;

use tracing::info;
use tracing::instrument::{Instrument, Instrumented};

use crate::domain::report::{RecordOutcome, RevisionPhase, RunReport};

/// Revision-scoped span.
///
/// Wrap a revision's future with [`RevisionSpan::wrap`] so every log
/// line emitted while it runs carries the revision index and treeish, even
/// across await points.
///
/// ```ignore
/// let span = RevisionSpan::new(3, 10, "main");
/// span.wrap(process(treeish)).await;
/// ```
#[derive(Debug, Clone)]
pub struct RevisionSpan {
    span: tracing::Span,
}

impl RevisionSpan {
    pub fn new(index: usize, total: usize, treeish: &str) -> Self {
        Self {
            span: tracing::info_span!(
                "gencompare.revision",
                index = index,
                total = total,
                treeish = %treeish
            ),
        }
    }

    /// Run `future` inside this span.
    pub fn wrap<F: Future>(&self, future: F) -> Instrumented<F> {
        future.instrument(self.span.clone())
    }
}

/// Emit event: run started.
pub fn emit_run_started(mode: &str, revisions: usize, store: &str) {
    info!(event = "run.started", mode = %mode, revisions = revisions, store = %store);
}

/// Emit event: a revision reached `phase`.
pub fn emit_revision_phase(short_id: &str, phase: RevisionPhase) {
    info!(event = "revision.phase", revision = %short_id, phase = %phase);
}

/// Emit event: a revision's output was folded into the history.
pub fn emit_revision_recorded(short_id: &str, digest: &str, outcome: &RecordOutcome) {
    let (committed, commit_id) = match outcome {
        RecordOutcome::Committed { commit_id } => (true, commit_id.as_str()),
        RecordOutcome::Unchanged => (false, ""),
    };
    info!(
        event = "revision.recorded",
        revision = %short_id,
        tree_digest = %digest,
        committed = committed,
        commit_id = %commit_id,
    );
}

/// Emit event: run finished.
pub fn emit_run_finished(report: &RunReport, duration_ms: u64) {
    info!(
        event = "run.finished",
        mode = %report.mode,
        revisions = report.revisions.len(),
        committed = report.committed_count(),
        unchanged = report.unchanged_count(),
        build_failures = report.build_failure_count(),
        interrupted = report.interrupted,
        duration_ms = duration_ms,
    );
}

/// Emit event: best-effort cleanup step failed (warning level).
pub fn emit_cleanup_error(step: &str, error: &dyn std::fmt::Display) {
    tracing::warn!(event = "run.cleanup_error", step = %step, error = %error);
}
