//! Trait contract tests for HistoryStore.
//!
//! Each contract is exercised against the in-memory fake and against the
//! git-backed store, so both implementations are held to the same behavior.

use std::path::Path;

use chrono::DateTime;
use gencompare_store::fakes::MemoryHistoryStore;
use gencompare_store::{CommitRequest, GitHistoryStore, HistoryStore, Identity, StoreError};

fn request(message: &str, date: &str) -> CommitRequest {
    CommitRequest {
        author: Identity::new("Ada Author", "ada@example.com"),
        date: DateTime::parse_from_rfc3339(date).unwrap(),
        message: message.to_string(),
    }
}

fn write_tree(root: &Path, files: &[(&str, &str)]) {
    if root.exists() {
        std::fs::remove_dir_all(root).unwrap();
    }
    std::fs::create_dir_all(root).unwrap();
    for (rel, contents) in files {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, contents).unwrap();
    }
}

async fn contract_unchanged_tree_has_no_pending_changes(store: &dyn HistoryStore, scratch: &Path) {
    store
        .init_with_identity(&Identity::new("gencompare", "gencompare@localhost"))
        .await
        .unwrap();

    let tree = scratch.join("out");
    write_tree(&tree, &[("slice2cpp/a/A.h", "// A"), ("DIAGNOSTICS", "")]);
    store.stage_all(&tree).await.unwrap();
    assert!(store.has_pending_changes(&tree).await.unwrap());
    store
        .commit(&tree, &request("first", "2021-03-04T05:06:07+01:00"))
        .await
        .unwrap();

    write_tree(&tree, &[("slice2cpp/a/A.h", "// A"), ("DIAGNOSTICS", "")]);
    store.stage_all(&tree).await.unwrap();
    assert!(!store.has_pending_changes(&tree).await.unwrap());
    assert_eq!(store.commit_count().await.unwrap(), 1);
}

async fn contract_stage_replaces_previous_state(store: &dyn HistoryStore, scratch: &Path) {
    store
        .init_with_identity(&Identity::new("gencompare", "gencompare@localhost"))
        .await
        .unwrap();

    let tree = scratch.join("out");
    write_tree(&tree, &[("x.txt", "x"), ("y.txt", "y")]);
    store.stage_all(&tree).await.unwrap();
    store
        .commit(&tree, &request("both", "2021-03-04T05:06:07+00:00"))
        .await
        .unwrap();

    // y.txt disappears: the deletion alone is a pending change.
    write_tree(&tree, &[("x.txt", "x")]);
    store.stage_all(&tree).await.unwrap();
    assert!(store.has_pending_changes(&tree).await.unwrap());
    store
        .commit(&tree, &request("only x", "2021-03-05T05:06:07+00:00"))
        .await
        .unwrap();

    assert_eq!(store.commit_count().await.unwrap(), 2);
    assert_eq!(
        store.last_commit_message().await.unwrap().unwrap().trim(),
        "only x"
    );
}

async fn contract_checkpoint_moves_without_commits(store: &dyn HistoryStore, scratch: &Path) {
    store
        .init_with_identity(&Identity::new("gencompare", "gencompare@localhost"))
        .await
        .unwrap();
    assert_eq!(store.read_checkpoint().await.unwrap(), None);

    let tree = scratch.join("out");
    write_tree(&tree, &[("DIAGNOSTICS", "")]);
    store.stage_all(&tree).await.unwrap();
    store
        .commit(&tree, &request("first", "2021-03-04T05:06:07+00:00"))
        .await
        .unwrap();
    store
        .write_checkpoint("Gencompare-Provenance: v1 aaaa")
        .await
        .unwrap();
    store
        .write_checkpoint("Gencompare-Provenance: v1 bbbb\n")
        .await
        .unwrap();

    assert_eq!(
        store.read_checkpoint().await.unwrap().as_deref(),
        Some("Gencompare-Provenance: v1 bbbb")
    );
    assert_eq!(store.commit_count().await.unwrap(), 1);
    assert_eq!(
        store.last_commit_message().await.unwrap().unwrap().trim(),
        "first"
    );
}

#[tokio::test]
async fn memory_checkpoint_moves_without_commits() {
    let scratch = tempfile::tempdir().unwrap();
    let store = MemoryHistoryStore::new();
    contract_checkpoint_moves_without_commits(&store, scratch.path()).await;
}

#[tokio::test]
async fn git_checkpoint_moves_without_commits() {
    let scratch = tempfile::tempdir().unwrap();
    let store = GitHistoryStore::new(scratch.path().join("store"));
    contract_checkpoint_moves_without_commits(&store, scratch.path()).await;
}

#[tokio::test]
async fn git_checkpoint_before_init_fails() {
    let scratch = tempfile::tempdir().unwrap();
    let store = GitHistoryStore::new(scratch.path().join("store"));
    assert_eq!(store.read_checkpoint().await.unwrap(), None);
    let err = store.write_checkpoint("x").await.unwrap_err();
    assert!(matches!(err, StoreError::NotInitialized { .. }));
}

#[tokio::test]
async fn memory_unchanged_tree_has_no_pending_changes() {
    let scratch = tempfile::tempdir().unwrap();
    let store = MemoryHistoryStore::new();
    contract_unchanged_tree_has_no_pending_changes(&store, scratch.path()).await;
}

#[tokio::test]
async fn memory_stage_replaces_previous_state() {
    let scratch = tempfile::tempdir().unwrap();
    let store = MemoryHistoryStore::new();
    contract_stage_replaces_previous_state(&store, scratch.path()).await;
}

#[tokio::test]
async fn git_unchanged_tree_has_no_pending_changes() {
    let scratch = tempfile::tempdir().unwrap();
    let store = GitHistoryStore::new(scratch.path().join("store"));
    contract_unchanged_tree_has_no_pending_changes(&store, scratch.path()).await;
}

#[tokio::test]
async fn git_stage_replaces_previous_state() {
    let scratch = tempfile::tempdir().unwrap();
    let store = GitHistoryStore::new(scratch.path().join("store"));
    contract_stage_replaces_previous_state(&store, scratch.path()).await;
}

#[tokio::test]
async fn memory_stage_before_init_fails() {
    let scratch = tempfile::tempdir().unwrap();
    let store = MemoryHistoryStore::new();
    let err = store.stage_all(scratch.path()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotInitialized { .. }));
}

#[tokio::test]
async fn git_stage_before_init_fails() {
    let scratch = tempfile::tempdir().unwrap();
    let store = GitHistoryStore::new(scratch.path().join("store"));
    let err = store.stage_all(scratch.path()).await.unwrap_err();
    assert!(matches!(err, StoreError::NotInitialized { .. }));
}

#[tokio::test]
async fn empty_store_reports_no_message_and_zero_commits() {
    let scratch = tempfile::tempdir().unwrap();
    let store = GitHistoryStore::new(scratch.path().join("store"));
    assert!(!store.exists().await.unwrap());
    assert_eq!(store.last_commit_message().await.unwrap(), None);
    assert_eq!(store.commit_count().await.unwrap(), 0);

    store
        .init_with_identity(&Identity::new("gencompare", "gencompare@localhost"))
        .await
        .unwrap();
    assert!(store.exists().await.unwrap());
    assert_eq!(store.last_commit_message().await.unwrap(), None);
    // Resetting an empty store is a no-op rather than an error.
    store.reset_hard().await.unwrap();
}
