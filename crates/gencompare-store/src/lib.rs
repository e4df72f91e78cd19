//! gencompare-store: history ledger for generated output
//!
//! This crate owns the persistent side of gencompare: an append-only history
//! in which every commit is the complete output tree of one source revision.
//!
//! ## Layer 0 - Persistence
//!
//! Focus: single-writer, never-rewritten history; metadata that cannot be
//! detached from the store by an interrupted run.
//!
//! ## Key Components
//!
//! - `HistoryStore`: the storage trait
//! - `GitHistoryStore`: git-backed implementation
//! - `fakes::MemoryHistoryStore`: in-memory implementation for tests

mod error;
pub mod fakes;
pub mod git_store;
pub mod store_traits;

pub use error::StoreError;
pub use git_store::GitHistoryStore;
pub use store_traits::{CommitId, CommitRequest, HistoryStore, Identity, StoreResult};
