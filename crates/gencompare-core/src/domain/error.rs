//! Domain-level error taxonomy for gencompare.
//!
//! Only two classes halt a run: configuration errors (reported before any
//! revision is touched) and failures that would leave the history store or
//! the host checkout in an unknown state. Build and generation failures are
//! never errors; they are data recorded into the output tree.

use gencompare_store::StoreError;

/// Errors produced while recovering the source revision from a commit message.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProvenanceError {
    #[error("commit message carries no provenance marker")]
    MissingMarker,

    #[error("unsupported provenance marker version: {version}")]
    UnsupportedVersion { version: String },

    #[error("provenance marker has an invalid revision id: {id:?}")]
    InvalidRevisionId { id: String },
}

/// Configuration errors. All of these are fatal and raised up front.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("conflicting revision modes: {0}")]
    ConflictingModes(String),

    #[error("catchup requested but no prior history exists at {path}")]
    NoPriorHistory { path: String },

    #[error("cannot recover last processed revision: {0}")]
    MalformedProvenance(#[from] ProvenanceError),

    #[error("cannot backtrack {requested} revisions: only {available} available")]
    InsufficientHistory { requested: usize, available: usize },

    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("cannot read configuration file {path}: {reason}")]
    File { path: String, reason: String },
}

/// gencompare domain errors.
#[derive(Debug, thiserror::Error)]
pub enum CompareError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("version control error: {0}")]
    Vcs(String),

    #[error("history store error: {0}")]
    Store(#[from] StoreError),

    #[error("housekeeping step `{operation}` failed twice: {source}")]
    Housekeeping {
        operation: String,
        #[source]
        source: Box<CompareError>,
    },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl CompareError {
    /// Whether this error belongs to the configuration class.
    pub fn is_config(&self) -> bool {
        matches!(self, CompareError::Config(_))
    }
}

/// Result type for gencompare domain operations.
pub type Result<T> = std::result::Result<T, CompareError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = CompareError::from(ConfigError::ConflictingModes(
            "--branch and --back-track".to_string(),
        ));
        assert!(err.to_string().contains("conflicting revision modes"));
        assert!(err.is_config());
    }

    #[test]
    fn test_malformed_provenance_is_config_class() {
        let err = CompareError::from(ConfigError::from(ProvenanceError::MissingMarker));
        assert!(err.is_config());
        assert!(err.to_string().contains("no provenance marker"));
    }

    #[test]
    fn test_housekeeping_wraps_source() {
        let err = CompareError::Housekeeping {
            operation: "git clean".to_string(),
            source: Box::new(CompareError::Vcs("index.lock exists".to_string())),
        };
        let msg = err.to_string();
        assert!(msg.contains("git clean"));
        assert!(msg.contains("index.lock exists"));
        assert!(!err.is_config());
    }
}
