//! gencompare core library
//!
//! Rebuilds a set of code generators at a sequence of revisions of a host
//! repository, runs them over a fixed input corpus, and records each
//! revision's output tree as one commit of an independent history, so the
//! generated output of any two revisions can be compared with a plain diff.
//!
//! ## Key Components
//!
//! - `RevisionResolver`: explicit list, backtrack or catch-up -> treeishes
//! - `InputSetResolver`: path arguments -> repository-relative input files
//! - `BuildOrchestrator`: one build action per revision, binary lookup
//! - `GenerationEngine`: bounded, per-tool serialized generator invocations
//! - `HistoryRecorder`: output tree -> history commit with provenance
//! - `Driver`: sequences the above with interrupt-safe cleanup

pub mod build;
pub mod config;
pub mod context;
pub mod digest;
pub mod domain;
pub mod driver;
pub mod fakes;
pub mod generate;
pub mod inputs;
pub mod obs;
pub mod process;
pub mod provenance;
pub mod recorder;
pub mod resolver;
pub mod telemetry;
pub mod vcs;

pub use build::{BuildOrchestrator, BuildResult};
pub use config::{BuildBackend, ConfigLoader, Platform, RunConfig, CONFIG_FILE_NAME};
pub use context::RunContext;
pub use digest::TreeDigest;
pub use domain::{
    CompareError, ConfigError, GeneratorTool, Position, ProvenanceError, RecordOutcome, Result,
    Revision, RevisionId, RevisionPhase, RevisionReport, RevisionSpec, RunReport, ToolSpec,
};
pub use driver::{Driver, DIAGNOSTICS_FILE};
pub use generate::{GenerationEngine, GenerationResult, InvocationRecord};
pub use inputs::{InputFile, InputSet, InputSetResolver, RejectReason, RejectedInput};
pub use provenance::{compose_message, parse_provenance_marker};
pub use recorder::HistoryRecorder;
pub use resolver::RevisionResolver;
pub use telemetry::init_tracing;
pub use vcs::{GitRepository, SourceRepository};

pub use gencompare_store::{GitHistoryStore, HistoryStore, Identity};

/// gencompare version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
