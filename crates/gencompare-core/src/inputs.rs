//! Input file resolution.
//!
//! Expands file and directory arguments into a sorted, deduplicated list of
//! repository-relative input files. Anything that cannot be used (missing,
//! outside the repository, excluded) is reported back instead of aborting.
//! Resolution runs once per revision because the layout may differ between
//! checkouts.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

use serde::Serialize;
use tracing::{debug, warn};
use walkdir::{DirEntry, WalkDir};

use crate::context::RunContext;

/// Prefix of per-revision output directories under the repository root.
pub const OUTPUT_DIR_PREFIX: &str = "_gen_";

/// A repository-relative input path with `/` separators.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct InputFile(String);

impl InputFile {
    pub fn new(rel: impl Into<String>) -> Self {
        InputFile(rel.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Parent directory, `""` for files at the repository root.
    pub fn parent(&self) -> &str {
        match self.0.rfind('/') {
            Some(i) => &self.0[..i],
            None => "",
        }
    }
}

impl std::fmt::Display for InputFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why an argument was dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectReason {
    Missing,
    OutsideRepository,
    Excluded,
}

/// An argument (or expanded file) that was reported and dropped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RejectedInput {
    pub path: String,
    pub reason: RejectReason,
}

/// Result of resolving the inputs for one revision.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct InputSet {
    pub files: Vec<InputFile>,
    pub rejected: Vec<RejectedInput>,
}

/// Resolves input arguments against the current checkout.
#[derive(Debug, Clone)]
pub struct InputSetResolver {
    repo_root: PathBuf,
    invocation_dir: PathBuf,
    extension: String,
    exclude_prefixes: Vec<String>,
    store_path: PathBuf,
}

impl InputSetResolver {
    pub fn new(ctx: &RunContext) -> Self {
        let inputs = &ctx.config().inputs;
        Self {
            repo_root: ctx.repo_root().to_path_buf(),
            invocation_dir: ctx.invocation_dir().to_path_buf(),
            extension: inputs.extension.trim_start_matches('.').to_string(),
            exclude_prefixes: inputs
                .exclude_prefixes
                .iter()
                .map(|p| p.trim_start_matches("./").replace('\\', "/"))
                .filter(|p| !p.is_empty())
                .collect(),
            store_path: ctx.store_path(),
        }
    }

    /// Expand `args` (files or directories, relative to the invocation
    /// directory). No arguments means the invocation directory itself.
    pub fn resolve(&self, args: &[PathBuf]) -> InputSet {
        let defaults = [self.invocation_dir.clone()];
        let args = if args.is_empty() { &defaults[..] } else { args };

        let mut candidates = Vec::new();
        let mut rejected = Vec::new();

        for arg in args {
            let path = if arg.is_absolute() {
                arg.clone()
            } else {
                self.invocation_dir.join(arg)
            };
            let canonical = match dunce::canonicalize(&path) {
                Ok(p) => p,
                Err(_) => {
                    warn!(path = %path.display(), "input does not exist in this revision");
                    rejected.push(RejectedInput {
                        path: slashed(&path),
                        reason: RejectReason::Missing,
                    });
                    continue;
                }
            };
            if canonical.is_dir() {
                candidates.extend(self.expand_dir(&canonical));
            } else {
                candidates.push(canonical);
            }
        }

        let mut files = BTreeSet::new();
        for path in candidates {
            let rel = match path.strip_prefix(&self.repo_root) {
                Ok(rel) => slashed(rel),
                Err(_) => {
                    warn!(path = %path.display(), "input lies outside the repository");
                    rejected.push(RejectedInput {
                        path: slashed(&path),
                        reason: RejectReason::OutsideRepository,
                    });
                    continue;
                }
            };
            if self.is_excluded(&rel) {
                debug!(path = %rel, "input excluded");
                rejected.push(RejectedInput {
                    path: rel,
                    reason: RejectReason::Excluded,
                });
                continue;
            }
            files.insert(InputFile(rel));
        }

        InputSet {
            files: files.into_iter().collect(),
            rejected,
        }
    }

    fn expand_dir(&self, dir: &Path) -> Vec<PathBuf> {
        let walker = WalkDir::new(dir)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_entry(|e| !self.should_skip(e));

        let mut found = Vec::new();
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    warn!(error = %e, "failed to walk input directory");
                    continue;
                }
            };
            if entry.file_type().is_file() && self.has_extension(entry.path()) {
                found.push(entry.into_path());
            }
        }
        found
    }

    fn should_skip(&self, entry: &DirEntry) -> bool {
        if !entry.file_type().is_dir() || entry.depth() == 0 {
            return false;
        }
        let name = entry.file_name().to_string_lossy();
        name == ".git" || name.starts_with(OUTPUT_DIR_PREFIX) || entry.path() == self.store_path
    }

    fn has_extension(&self, path: &Path) -> bool {
        path.extension()
            .is_some_and(|ext| ext.to_string_lossy() == self.extension)
    }

    fn is_excluded(&self, rel: &str) -> bool {
        self.exclude_prefixes.iter().any(|p| rel.starts_with(p.as_str()))
    }
}

fn slashed(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
