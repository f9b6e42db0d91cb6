//! S2 — content change invalidates a row only once its mtime advances.

mod common;

use care_engine::config::{ProjectConfig, StoreConfig};
use care_engine::indexer::Indexer;
use care_engine::store::{SqliteStore, Table, VectorStore};
use common::MarkerProvider;
use std::fs::File;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tempfile::tempdir;

fn project_config(path: &std::path::Path) -> ProjectConfig {
    ProjectConfig { path: path.to_path_buf(), exclude_patterns: Vec::new(), respect_gitignore: true, include_project_structure: false }
}

fn set_mtime(path: &std::path::Path, time: SystemTime) {
    let file = File::options().write(true).open(path).unwrap();
    file.set_times(std::fs::FileTimes::new().set_modified(time)).unwrap();
}

#[tokio::test]
async fn content_change_is_gated_by_mtime_then_reembeds_and_deletes_the_prior_row() {
    let project_dir = tempdir().unwrap();
    let store_dir = tempdir().unwrap();
    let store = Arc::new(SqliteStore::connect(&StoreConfig { data_dir: store_dir.path().to_path_buf() }).await.unwrap());
    let provider = Arc::new(MarkerProvider::new());
    let indexer = Indexer::new(store.clone(), provider.clone());

    let file_path = project_dir.path().join("a.rs");
    std::fs::write(&file_path, "fn one() {}").unwrap();
    let original_mtime = std::fs::metadata(&file_path).unwrap().modified().unwrap();

    let config = project_config(project_dir.path());
    let summary = indexer.index_project(&config, &[], 64).await.unwrap();
    assert_eq!(summary.processed, vec!["a.rs".to_string()]);
    let calls_after_first = provider.passage_calls.load(Ordering::Relaxed);

    let original_row = store
        .list_rows_for_project(Table::FileEmbeddings, &project_dir.path().to_string_lossy())
        .await
        .unwrap()
        .into_iter()
        .find(|r| r.path.as_deref() == Some("a.rs"))
        .unwrap();

    // Change content but restore the original mtime: must be gated (no re-embed).
    std::fs::write(&file_path, "fn one_changed() {}").unwrap();
    set_mtime(&file_path, original_mtime);

    let summary = indexer.index_project(&config, &[], 64).await.unwrap();
    assert_eq!(summary.skipped, vec!["a.rs".to_string()]);
    assert_eq!(provider.passage_calls.load(Ordering::Relaxed), calls_after_first);

    // Now advance the mtime: exactly one new embedding, and the prior row id is gone.
    set_mtime(&file_path, original_mtime + Duration::from_secs(5));
    let summary = indexer.index_project(&config, &[], 64).await.unwrap();
    assert_eq!(summary.processed, vec!["a.rs".to_string()]);
    assert_eq!(provider.passage_calls.load(Ordering::Relaxed), calls_after_first + 1);

    let rows = store
        .list_rows_for_project(Table::FileEmbeddings, &project_dir.path().to_string_lossy())
        .await
        .unwrap();
    assert_eq!(rows.iter().filter(|r| r.path.as_deref() == Some("a.rs")).count(), 1);
    assert!(store.get_row(Table::FileEmbeddings, &original_row.id).await.unwrap().is_none());
    assert_eq!(rows.iter().find(|r| r.path.as_deref() == Some("a.rs")).unwrap().content, "fn one_changed() {}");
}
