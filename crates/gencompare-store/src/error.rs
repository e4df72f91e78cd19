//! Error types for gencompare-store

use thiserror::Error;

/// Errors that can occur while driving the history store
#[derive(Error, Debug)]
pub enum StoreError {
    /// A store command exited unsuccessfully
    #[error("store command `{command}` failed: {stderr}")]
    Command { command: String, stderr: String },

    /// The store directory has not been initialized yet
    #[error("history store not initialized at {path}")]
    NotInitialized { path: String },

    /// A commit message could not be handed to the store
    #[error("invalid commit message: {0}")]
    InvalidMessage(String),

    /// Filesystem error
    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),
}
