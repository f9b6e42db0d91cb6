//! S5 — hybrid (dense + FTS) search surfaces a lexically-strong match that
//! pure vector search would bury at the bottom of the ranking.
//!
//! Exercised directly against [`SqliteStore::search`] rather than through
//! `ContextRetriever::get_context`: every one of the retriever's branches
//! calls `SearchOptions::new` with an empty `query_text`, so the FTS
//! channel only ever contributes here, at the store's public API.

mod common;

use care_engine::config::StoreConfig;
use care_engine::models::Vector;
use care_engine::store::{SearchOptions, SqliteStore, Table, VectorStore};
use common::file_row;
use tempfile::tempdir;

#[tokio::test]
async fn hybrid_search_promotes_a_lexically_strong_vector_dissimilar_document() {
    let dir = tempdir().unwrap();
    let store = SqliteStore::connect(&StoreConfig { data_dir: dir.path().to_path_buf() }).await.unwrap();
    let project_path = "/work/proj";

    let query_vector = Vector(vec![1.0, 0.0, 0.0, 0.0]);

    let mut rows: Vec<_> = (0..9)
        .map(|i| file_row(project_path, &format!("src/noise_{i}.rs"), "fn unrelated() {}", Vector(vec![1.0, 0.0, 0.0, 0.0]), false))
        .collect();
    let fts_only = file_row(project_path, "src/fts_only.rs", "zephyr zephyr zephyr routine", Vector(vec![0.0, 1.0, 0.0, 0.0]), false);
    let fts_only_id = fts_only.id.clone();
    rows.push(fts_only);
    store.upsert(Table::FileEmbeddings, rows).await.unwrap();

    let vector_only_hits = store
        .search(Table::FileEmbeddings, SearchOptions::new(project_path, "", 20).with_vector(&query_vector))
        .await
        .unwrap();
    let hybrid_hits = store
        .search(Table::FileEmbeddings, SearchOptions::new(project_path, "zephyr", 20).with_vector(&query_vector))
        .await
        .unwrap();

    // Pure vector search buries it last: cosine similarity to the query is
    // zero and it has no other signal to rank on.
    let vector_only_rank = vector_only_hits.iter().position(|h| h.id == fts_only_id).unwrap();
    assert_eq!(vector_only_rank, vector_only_hits.len() - 1);
    let vector_only_score = vector_only_hits[vector_only_rank].score;

    // Hybrid search gives it a lexical channel none of the other
    // candidates have, promoting it to the top and lifting its fused
    // score well above the vector-only run.
    assert_eq!(hybrid_hits[0].id, fts_only_id);
    assert!(hybrid_hits[0].matched_vector && hybrid_hits[0].matched_fts);
    assert!(
        hybrid_hits[0].score > vector_only_score,
        "hybrid score ({}) should exceed vector-only score ({})",
        hybrid_hits[0].score,
        vector_only_score
    );
}
