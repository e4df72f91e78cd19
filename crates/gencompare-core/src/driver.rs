//! Run driver.
//!
//! Resolves the revision list once, then for each revision: checkout ->
//! resolve inputs -> build -> generate -> record. Build and generation
//! failures are written into the output tree; only configuration errors and
//! housekeeping failures that survive one retry stop the run.
//!
//! An interrupt (the `cancel` flag turning `true`) stops dispatch, removes
//! the in-flight output directory, resets the store's working copy and puts
//! the host checkout back where it was.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use gencompare_store::HistoryStore;
use tokio::sync::watch;
use tracing::{info, warn};

use crate::build::{BuildOrchestrator, BuildResult};
use crate::context::RunContext;
use crate::digest::TreeDigest;
use crate::domain::error::{CompareError, Result};
use crate::domain::report::{RevisionPhase, RevisionReport, RunReport};
use crate::domain::revision::{Position, Revision, RevisionSpec};
use crate::generate::GenerationEngine;
use crate::inputs::{InputSetResolver, OUTPUT_DIR_PREFIX};
use crate::obs::{self, RevisionSpan};
use crate::recorder::HistoryRecorder;
use crate::resolver::RevisionResolver;
use crate::vcs::SourceRepository;

/// Name of the diagnostics file at the root of every output tree.
pub const DIAGNOSTICS_FILE: &str = "DIAGNOSTICS";

/// Written into `DIAGNOSTICS` when the build fails.
pub const BUILD_FAILURE_BANNER: &str =
    "!!!!!!!!!!!!!!!!!!!!!!!\n!!!! BUILD FAILURE !!!!\n!!!!!!!!!!!!!!!!!!!!!!!\n";

/// Output directory name for a revision: `_gen_<display>_<short>`.
pub fn output_dir_name(revision: &Revision) -> String {
    let display = revision.display_name.replace(['/', '\\'], "-");
    format!("{OUTPUT_DIR_PREFIX}{display}_{}", revision.short_id)
}

/// Make diagnostics comparable across clones and revisions: the output
/// directory becomes `OUTPUT_DIR`, the repository root `REPO_ROOT`.
pub fn normalize_diagnostics(text: &str, out_dir: &Path, repo_root: &Path) -> String {
    let out_dir = out_dir.to_string_lossy();
    let repo_root = repo_root.to_string_lossy();
    let mut text = text.to_string();
    if !out_dir.is_empty() {
        text = text.replace(out_dir.as_ref(), "OUTPUT_DIR");
    }
    if !repo_root.is_empty() {
        text = text.replace(repo_root.as_ref(), "REPO_ROOT");
    }
    text
}

/// Run a housekeeping step, retrying once before giving up.
async fn retry_once<F, Fut>(operation: &str, mut step: F) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<()>>,
{
    match step().await {
        Ok(()) => Ok(()),
        Err(first) => {
            warn!(operation = %operation, error = %first, "housekeeping step failed, retrying");
            step().await.map_err(|e| CompareError::Housekeeping {
                operation: operation.to_string(),
                source: Box::new(e),
            })
        }
    }
}

/// Resolves when `cancel` turns `true`; never if the sender goes away.
async fn cancelled(mut cancel: watch::Receiver<bool>) {
    loop {
        if *cancel.borrow_and_update() {
            return;
        }
        if cancel.changed().await.is_err() {
            std::future::pending::<()>().await;
        }
    }
}

enum Step {
    Done(RevisionReport),
    Interrupted,
}

/// Sequences one comparison run.
pub struct Driver {
    ctx: RunContext,
    repo: Arc<dyn SourceRepository>,
    recorder: HistoryRecorder,
    builder: BuildOrchestrator,
    engine: GenerationEngine,
    inputs: InputSetResolver,
    cancel: watch::Receiver<bool>,
    /// Output directory of the revision currently being processed.
    in_flight: Option<PathBuf>,
}

impl Driver {
    pub fn new(
        ctx: RunContext,
        repo: Arc<dyn SourceRepository>,
        store: Arc<dyn HistoryStore>,
        cancel: watch::Receiver<bool>,
    ) -> Self {
        Self {
            recorder: HistoryRecorder::new(store, &ctx),
            builder: BuildOrchestrator::new(&ctx),
            engine: GenerationEngine::new(&ctx),
            inputs: InputSetResolver::new(&ctx),
            ctx,
            repo,
            cancel,
            in_flight: None,
        }
    }

    fn is_cancelled(&self) -> bool {
        *self.cancel.borrow()
    }

    fn clean_excludes(&self) -> Vec<String> {
        self.ctx.store_relative().into_iter().collect()
    }

    /// Resolve the revision list without touching the working tree.
    pub async fn resolve(&self, spec: &RevisionSpec) -> Result<Vec<String>> {
        RevisionResolver::new(self.repo.as_ref(), self.recorder.store().as_ref())
            .with_legacy_prefix(self.ctx.cross_ref_prefix())
            .resolve(spec)
            .await
    }

    /// Execute the run.
    pub async fn run(&mut self) -> Result<RunReport> {
        let started = Instant::now();
        let spec = self.ctx.config().revisions.clone();
        let treeishes = self.resolve(&spec).await?;
        let original = self.repo.current_position().await?;

        obs::emit_run_started(
            spec.mode(),
            treeishes.len(),
            &self.recorder.store().location().display().to_string(),
        );

        let mut report = RunReport {
            mode: spec.mode().to_string(),
            revisions: Vec::with_capacity(treeishes.len()),
            interrupted: false,
        };

        match self.run_revisions(&spec, &treeishes, &mut report).await {
            Ok(true) => {
                report.interrupted = true;
                self.interrupt_cleanup(&original).await;
            }
            Ok(false) => self.finish(&original).await?,
            Err(e) => {
                self.abort_cleanup(&original).await;
                return Err(e);
            }
        }

        obs::emit_run_finished(&report, started.elapsed().as_millis() as u64);
        Ok(report)
    }

    /// Returns `true` when the loop stopped because of an interrupt.
    async fn run_revisions(
        &mut self,
        spec: &RevisionSpec,
        treeishes: &[String],
        report: &mut RunReport,
    ) -> Result<bool> {
        let repo = Arc::clone(&self.repo);
        let exclude = self.clean_excludes();

        retry_once("git clean", || repo.clean(&exclude)).await?;
        retry_once("git reset --hard", || repo.reset_hard()).await?;
        {
            let recorder = &self.recorder;
            retry_once("history store init", || recorder.ensure_store()).await?;
        }

        let total = treeishes.len();
        for (index, treeish) in treeishes.iter().enumerate() {
            if self.is_cancelled() {
                return Ok(true);
            }
            let span = RevisionSpan::new(index + 1, total, treeish);
            match span.wrap(self.process_revision(treeish)).await? {
                Step::Done(revision_report) => report.revisions.push(revision_report),
                Step::Interrupted => return Ok(true),
            }

            let remaining = total - index - 1;
            if matches!(spec, RevisionSpec::Backtrack(_) | RevisionSpec::Catchup) {
                info!(done = index + 1, total, remaining, "backtrack progress");
            } else {
                info!(done = index + 1, total, "progress");
            }
        }
        Ok(false)
    }

    async fn process_revision(&mut self, treeish: &str) -> Result<Step> {
        let repo = Arc::clone(&self.repo);
        let exclude = self.clean_excludes();

        retry_once("git checkout", || repo.checkout(treeish)).await?;
        retry_once("git clean", || repo.clean(&exclude)).await?;
        let revision = repo.read_commit_metadata().await?;
        obs::emit_revision_phase(&revision.short_id, RevisionPhase::CheckedOut);

        let mut revision_report = RevisionReport {
            treeish: treeish.to_string(),
            revision_id: revision.id.to_string(),
            display_name: revision.display_name.clone(),
            short_id: revision.short_id.clone(),
            phase: RevisionPhase::CheckedOut,
            build_succeeded: false,
            input_count: 0,
            rejected_inputs: 0,
            failed_invocations: 0,
            total_invocations: 0,
            tree_digest: None,
            outcome: None,
        };

        let out_dir = self.ctx.repo_root().join(output_dir_name(&revision));
        if out_dir.exists() {
            tokio::fs::remove_dir_all(&out_dir).await?;
        }
        tokio::fs::create_dir_all(&out_dir).await?;
        self.in_flight = Some(out_dir.clone());

        let input_set = self.inputs.resolve(&self.ctx.config().inputs.paths);
        revision_report.input_count = input_set.files.len();
        revision_report.rejected_inputs = input_set.rejected.len();
        info!(
            inputs = input_set.files.len(),
            rejected = input_set.rejected.len(),
            "resolved input files"
        );

        let specs = self.ctx.config().tools.specs();
        let build = tokio::select! {
            result = self.builder.build(&specs) => result,
            _ = cancelled(self.cancel.clone()) => return Ok(Step::Interrupted),
        };

        let mut diagnostics = String::new();
        match build {
            BuildResult::Succeeded { tools } => {
                revision_report.build_succeeded = true;
                revision_report.phase = RevisionPhase::Built;
                obs::emit_revision_phase(&revision.short_id, RevisionPhase::Built);

                let generation = self
                    .engine
                    .generate(&tools, &input_set.files, &out_dir, self.cancel.clone())
                    .await;
                if generation.interrupted || self.is_cancelled() {
                    return Ok(Step::Interrupted);
                }
                revision_report.failed_invocations = generation.failed_count();
                revision_report.total_invocations = generation.invocations.len();
                revision_report.phase = RevisionPhase::Generated;
                obs::emit_revision_phase(&revision.short_id, RevisionPhase::Generated);
                diagnostics.push_str(&generation.log());
            }
            BuildResult::Failed {
                diagnostics: build_log,
            } => {
                warn!(revision = %revision.short_id, "build failed, skipping generation");
                revision_report.phase = RevisionPhase::BuildFailed;
                obs::emit_revision_phase(&revision.short_id, RevisionPhase::BuildFailed);
                diagnostics.push('\n');
                diagnostics.push_str(BUILD_FAILURE_BANNER);
                diagnostics.push_str(build_log.trim());
                diagnostics.push('\n');
            }
        }

        let diagnostics = normalize_diagnostics(&diagnostics, &out_dir, self.ctx.repo_root());
        tokio::fs::write(out_dir.join(DIAGNOSTICS_FILE), diagnostics).await?;

        let digest = TreeDigest::compute(&out_dir)?;
        revision_report.tree_digest = Some(digest.to_string());

        if self.is_cancelled() {
            return Ok(Step::Interrupted);
        }

        let outcome = self.recorder.record(&out_dir, &revision).await?;
        revision_report.phase = RevisionPhase::Recorded;
        obs::emit_revision_phase(&revision.short_id, RevisionPhase::Recorded);
        obs::emit_revision_recorded(&revision.short_id, digest.short(), &outcome);
        revision_report.outcome = Some(outcome);

        tokio::fs::remove_dir_all(&out_dir).await?;
        self.in_flight = None;

        Ok(Step::Done(revision_report))
    }

    /// Normal end of run: tidy the store, clean the host tree and go back
    /// to where the run started.
    async fn finish(&mut self, original: &Position) -> Result<()> {
        let repo = Arc::clone(&self.repo);
        let exclude = self.clean_excludes();
        let treeish = original.treeish();
        {
            let recorder = &self.recorder;
            retry_once("history store finalize", || recorder.finalize()).await?;
        }
        retry_once("git clean", || repo.clean(&exclude)).await?;
        retry_once("git checkout", || repo.checkout(&treeish)).await?;
        info!(
            store = %self.recorder.store().location().display(),
            "results stored in history store"
        );
        Ok(())
    }

    async fn remove_in_flight(&mut self) {
        if let Some(dir) = self.in_flight.take() {
            if let Err(e) = tokio::fs::remove_dir_all(&dir).await {
                if e.kind() != std::io::ErrorKind::NotFound {
                    obs::emit_cleanup_error("remove output directory", &e);
                }
            }
        }
    }

    /// Best-effort cleanup after an interrupt.
    async fn interrupt_cleanup(&mut self, original: &Position) {
        warn!("interrupt received, cleaning up");
        self.remove_in_flight().await;
        if let Err(e) = self.recorder.store().reset_hard().await {
            obs::emit_cleanup_error("history store reset", &e);
        }
        if let Err(e) = self.repo.clean(&self.clean_excludes()).await {
            obs::emit_cleanup_error("git clean", &e);
        }
        if let Err(e) = self.repo.checkout(&original.treeish()).await {
            obs::emit_cleanup_error("restore original checkout", &e);
        }
    }

    /// Best-effort cleanup before surfacing a fatal error.
    async fn abort_cleanup(&mut self, original: &Position) {
        self.remove_in_flight().await;
        if let Err(e) = self.repo.checkout(&original.treeish()).await {
            obs::emit_cleanup_error("restore original checkout", &e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BuildBackend, RunConfig};
    use crate::domain::error::ConfigError;
    use crate::domain::report::RecordOutcome;
    use crate::domain::revision::RevisionId;
    use crate::fakes::FakeSourceRepository;
    use chrono::DateTime;
    use gencompare_store::fakes::MemoryHistoryStore;
    use gencompare_store::Identity;

    fn revision(display: &str) -> Revision {
        Revision {
            id: RevisionId::new("0123456789abcdef0123456789abcdef01234567"),
            display_name: display.to_string(),
            short_id: "0123456".to_string(),
            message: String::new(),
            author: Identity::new("a", "a@example.com"),
            date: DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z").unwrap(),
        }
    }

    /// A context whose build always fails, so no generator binaries are
    /// needed and every revision records a build-failure tree.
    fn failing_build_context(root: &Path, spec: RevisionSpec) -> RunContext {
        let mut config = RunConfig::default();
        config.revisions = spec;
        config.tools.names = vec!["gen".to_string()];
        config.tools.serial = vec![];
        config.build.backend = Some(BuildBackend::Custom {
            command: vec!["gencompare-test-no-such-build-tool".to_string()],
        });
        RunContext::new(root, root, config).unwrap()
    }

    #[test]
    fn test_output_dir_name() {
        assert_eq!(output_dir_name(&revision("main")), "_gen_main_0123456");
        assert_eq!(
            output_dir_name(&revision("feature/x")),
            "_gen_feature-x_0123456"
        );
    }

    #[test]
    fn test_normalize_diagnostics() {
        let text = "/repo/_gen_main_1/gen/a.h: warning\n/repo/slice/a.ice:3: error";
        assert_eq!(
            normalize_diagnostics(text, Path::new("/repo/_gen_main_1"), Path::new("/repo")),
            "OUTPUT_DIR/gen/a.h: warning\nREPO_ROOT/slice/a.ice:3: error"
        );
    }

    #[tokio::test]
    async fn test_retry_once_recovers_from_single_failure() {
        let repo = FakeSourceRepository::linear("/repo", 1);
        repo.fail_times("clean", 1);
        retry_once("git clean", || repo.clean(&[])).await.unwrap();

        repo.fail_times("clean", 2);
        let err = retry_once("git clean", || repo.clean(&[])).await.unwrap_err();
        assert!(matches!(err, CompareError::Housekeeping { .. }));
    }

    #[tokio::test]
    async fn test_build_failures_are_recorded_and_checkout_restored() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(FakeSourceRepository::linear(dir.path(), 3));
        let store = Arc::new(MemoryHistoryStore::new());
        let (_tx, rx) = watch::channel(false);
        let ctx = failing_build_context(dir.path(), RevisionSpec::Backtrack(1));

        let mut driver = Driver::new(ctx, repo.clone(), store.clone(), rx);
        let report = driver.run().await.unwrap();

        assert_eq!(report.revisions.len(), 2);
        assert_eq!(report.build_failure_count(), 2);
        assert!(report
            .revisions
            .iter()
            .all(|r| r.phase == RevisionPhase::Recorded));
        // Both trees hold the same banner, so the second is unchanged.
        assert_eq!(store.commits().len(), 1);
        assert_eq!(report.unchanged_count(), 1);

        let tree = &store.commits()[0].tree;
        let diagnostics = String::from_utf8(tree[DIAGNOSTICS_FILE].clone()).unwrap();
        assert!(diagnostics.contains("BUILD FAILURE"));

        assert_eq!(repo.calls().last().map(String::as_str), Some("checkout:main"));
        assert_eq!(store.resets(), 1);
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().starts_with(OUTPUT_DIR_PREFIX))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[tokio::test]
    async fn test_conflicting_state_is_reported_before_touching_repo() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(FakeSourceRepository::linear(dir.path(), 1));
        let store = Arc::new(MemoryHistoryStore::new());
        let (_tx, rx) = watch::channel(false);
        let ctx = failing_build_context(dir.path(), RevisionSpec::Catchup);

        let err = Driver::new(ctx, repo.clone(), store, rx)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CompareError::Config(ConfigError::NoPriorHistory { .. })
        ));
        assert!(repo.calls().is_empty());
    }

    #[tokio::test]
    async fn test_interrupt_before_first_revision_restores_checkout() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(FakeSourceRepository::linear(dir.path(), 2));
        let store = Arc::new(MemoryHistoryStore::new());
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let ctx = failing_build_context(dir.path(), RevisionSpec::Backtrack(1));

        let report = Driver::new(ctx, repo.clone(), store.clone(), rx)
            .run()
            .await
            .unwrap();
        assert!(report.interrupted);
        assert!(report.revisions.is_empty());
        assert!(store.commits().is_empty());
        assert_eq!(repo.calls().last().map(String::as_str), Some("checkout:main"));
    }

    #[tokio::test]
    async fn test_persistent_housekeeping_failure_is_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(FakeSourceRepository::linear(dir.path(), 1));
        repo.fail_times("reset", 2);
        let store = Arc::new(MemoryHistoryStore::new());
        let (_tx, rx) = watch::channel(false);
        let ctx = failing_build_context(dir.path(), RevisionSpec::Explicit(vec!["HEAD".into()]));

        let err = Driver::new(ctx, repo, store.clone(), rx)
            .run()
            .await
            .unwrap_err();
        assert!(matches!(err, CompareError::Housekeeping { .. }));
        assert!(store.commits().is_empty());
    }

    #[tokio::test]
    async fn test_store_excluded_from_cleaning() {
        let dir = tempfile::tempdir().unwrap();
        let repo = Arc::new(FakeSourceRepository::linear(dir.path(), 1));
        let store = Arc::new(MemoryHistoryStore::new());
        let (_tx, rx) = watch::channel(false);
        let ctx = failing_build_context(dir.path(), RevisionSpec::Explicit(vec!["main".into()]));

        let report = Driver::new(ctx, repo.clone(), store.clone(), rx)
            .run()
            .await
            .unwrap();
        assert!(matches!(
            report.revisions[0].outcome,
            Some(RecordOutcome::Committed { .. })
        ));
        assert!(repo
            .calls()
            .iter()
            .filter(|c| c.starts_with("clean"))
            .all(|c| c == "clean:_gen_compare_"));
    }
}
