//! Revisions of the host repository and the modes that select them.

use chrono::{DateTime, FixedOffset};
use gencompare_store::Identity;
use serde::{Deserialize, Serialize};

use crate::domain::error::{ConfigError, ProvenanceError};

/// Full object id of a host-repository commit (lowercase hex).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RevisionId(String);

impl RevisionId {
    /// Wrap an id reported by the version-control system.
    pub fn new(id: impl Into<String>) -> Self {
        RevisionId(id.into().trim().to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Short form (first 10 hex chars), for logging.
    pub fn short(&self) -> &str {
        &self.0[..10.min(self.0.len())]
    }
}

impl TryFrom<String> for RevisionId {
    type Error = ProvenanceError;

    /// Accepts abbreviated (>= 4 chars) or full (<= 64 chars) hex ids.
    fn try_from(s: String) -> std::result::Result<Self, Self::Error> {
        let trimmed = s.trim();
        let valid = (4..=64).contains(&trimmed.len())
            && trimmed.chars().all(|c| c.is_ascii_hexdigit());
        if !valid {
            return Err(ProvenanceError::InvalidRevisionId { id: s });
        }
        Ok(RevisionId::new(trimmed))
    }
}

impl std::fmt::Display for RevisionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One checked-out point in the host history. Immutable once resolved.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Revision {
    pub id: RevisionId,
    /// Branch name, or `HEAD` for a detached checkout.
    pub display_name: String,
    pub short_id: String,
    pub message: String,
    pub author: Identity,
    pub date: DateTime<FixedOffset>,
}

/// Where the host repository was when a run began.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Position {
    pub branch: Option<String>,
    pub id: RevisionId,
}

impl Position {
    /// Treeish that restores this position: the branch if there was one,
    /// otherwise the detached commit.
    pub fn treeish(&self) -> String {
        match &self.branch {
            Some(branch) => branch.clone(),
            None => self.id.to_string(),
        }
    }
}

/// Which revisions a run visits. Exactly one mode per run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevisionSpec {
    /// Branches, tags or commit ids, visited in the given order.
    Explicit(Vec<String>),
    /// The current position and its `n` first-parent ancestors, oldest first.
    Backtrack(usize),
    /// Resume from the revision recorded in the last history commit.
    Catchup,
}

impl RevisionSpec {
    /// Build a spec from the three independent CLI selectors.
    ///
    /// Populating more than one selector is a configuration error. Populating
    /// none selects the current checkout.
    pub fn from_options(
        treeishes: Vec<String>,
        back_track: Option<usize>,
        catchup: bool,
    ) -> std::result::Result<Self, ConfigError> {
        let explicit = !treeishes.is_empty();
        let backtrack = back_track.is_some();

        if explicit && backtrack {
            return Err(ConfigError::ConflictingModes(
                "explicit branches and a back-track count cannot be combined".to_string(),
            ));
        }
        if explicit && catchup {
            return Err(ConfigError::ConflictingModes(
                "explicit branches and catch-up mode cannot be combined".to_string(),
            ));
        }
        if backtrack && catchup {
            return Err(ConfigError::ConflictingModes(
                "a back-track count and catch-up mode cannot be combined".to_string(),
            ));
        }

        Ok(match (back_track, catchup) {
            (Some(n), _) => RevisionSpec::Backtrack(n),
            (None, true) => RevisionSpec::Catchup,
            (None, false) if explicit => RevisionSpec::Explicit(treeishes),
            (None, false) => RevisionSpec::Explicit(vec!["HEAD".to_string()]),
        })
    }

    /// Mode name for logs.
    pub fn mode(&self) -> &'static str {
        match self {
            RevisionSpec::Explicit(_) => "explicit",
            RevisionSpec::Backtrack(_) => "backtrack",
            RevisionSpec::Catchup => "catchup",
        }
    }
}
