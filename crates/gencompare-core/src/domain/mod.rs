//! Domain models for gencompare.
//!
//! Canonical definitions for the core entities:
//! - `Revision` / `RevisionSpec`: what gets visited and in which order
//! - `GeneratorTool`: what runs over the inputs
//! - `RevisionReport` / `RunReport`: what happened

pub mod error;
pub mod report;
pub mod revision;
pub mod tool;

// Re-export main types and errors
pub use error::{CompareError, ConfigError, ProvenanceError, Result};
pub use report::{RecordOutcome, RevisionPhase, RevisionReport, RunReport};
pub use revision::{Position, Revision, RevisionId, RevisionSpec};
pub use tool::{GeneratorTool, ToolSpec};
