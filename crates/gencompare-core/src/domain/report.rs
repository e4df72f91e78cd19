//! Per-revision and per-run reports.

use serde::{Deserialize, Serialize};

/// Named phases of one revision's processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionPhase {
    CheckedOut,
    Built,
    BuildFailed,
    Generated,
    Recorded,
}

impl RevisionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            RevisionPhase::CheckedOut => "checked_out",
            RevisionPhase::Built => "built",
            RevisionPhase::BuildFailed => "build_failed",
            RevisionPhase::Generated => "generated",
            RevisionPhase::Recorded => "recorded",
        }
    }
}

impl std::fmt::Display for RevisionPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// What the history recorder did with one output tree.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum RecordOutcome {
    Committed { commit_id: String },
    Unchanged,
}

/// Result of processing one revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevisionReport {
    /// The treeish the driver checked out.
    pub treeish: String,
    pub revision_id: String,
    pub display_name: String,
    pub short_id: String,
    /// Last phase reached.
    pub phase: RevisionPhase,
    pub build_succeeded: bool,
    pub input_count: usize,
    pub rejected_inputs: usize,
    pub failed_invocations: usize,
    pub total_invocations: usize,
    /// SHA-256 over the output tree, `None` if the revision never got that far.
    pub tree_digest: Option<String>,
    pub outcome: Option<RecordOutcome>,
}

/// Result of a whole run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunReport {
    pub mode: String,
    pub revisions: Vec<RevisionReport>,
    pub interrupted: bool,
}

impl RunReport {
    /// Number of revisions that produced a new history commit.
    pub fn committed_count(&self) -> usize {
        self.revisions
            .iter()
            .filter(|r| matches!(r.outcome, Some(RecordOutcome::Committed { .. })))
            .count()
    }

    /// Number of revisions whose output matched the previous commit.
    pub fn unchanged_count(&self) -> usize {
        self.revisions
            .iter()
            .filter(|r| matches!(r.outcome, Some(RecordOutcome::Unchanged)))
            .count()
    }

    /// Number of revisions whose build failed.
    pub fn build_failure_count(&self) -> usize {
        self.revisions.iter().filter(|r| !r.build_succeeded).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report(outcome: Option<RecordOutcome>, build_succeeded: bool) -> RevisionReport {
        RevisionReport {
            treeish: "main".to_string(),
            revision_id: "abc".to_string(),
            display_name: "main".to_string(),
            short_id: "abc".to_string(),
            phase: RevisionPhase::Recorded,
            build_succeeded,
            input_count: 1,
            rejected_inputs: 0,
            failed_invocations: 0,
            total_invocations: 1,
            tree_digest: None,
            outcome,
        }
    }

    #[test]
    fn test_run_report_counts() {
        let run = RunReport {
            mode: "explicit".to_string(),
            revisions: vec![
                report(
                    Some(RecordOutcome::Committed {
                        commit_id: "1".to_string(),
                    }),
                    true,
                ),
                report(Some(RecordOutcome::Unchanged), true),
                report(
                    Some(RecordOutcome::Committed {
                        commit_id: "2".to_string(),
                    }),
                    false,
                ),
            ],
            interrupted: false,
        };
        assert_eq!(run.committed_count(), 2);
        assert_eq!(run.unchanged_count(), 1);
        assert_eq!(run.build_failure_count(), 1);
    }

    #[test]
    fn test_record_outcome_serializes_tagged() {
        let json = serde_json::to_value(RecordOutcome::Unchanged).unwrap();
        assert_eq!(json["outcome"], "unchanged");
    }
}
