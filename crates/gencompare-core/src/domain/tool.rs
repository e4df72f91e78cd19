//! Generator tools.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

/// A generator tool as configured, before the build has produced a binary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    /// `false` for tools that share mutable state between invocations (for
    /// example a single index file) and must never overlap with themselves.
    pub concurrency_safe: bool,
}

impl ToolSpec {
    pub fn new(name: impl Into<String>, concurrency_safe: bool) -> Self {
        Self {
            name: name.into(),
            concurrency_safe,
        }
    }
}

/// A built generator tool ready to run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GeneratorTool {
    pub name: String,
    pub binary: PathBuf,
    pub concurrency_safe: bool,
}
