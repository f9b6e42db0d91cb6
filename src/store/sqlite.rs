//! SQLite-backed [`VectorStore`]: FTS5 for the lexical channel, an
//! in-process [`super::ivf::IvfIndex`] rebuilt on threshold crossings for
//! the dense channel, fused by [`super::fusion`].

use super::ivf::IvfIndex;
use super::{fusion, IndexKind, SearchHit, SearchOptions, StoredRow, Table, VectorStore};
use crate::config::StoreConfig;
use crate::embedding::{blob_to_vec, vec_to_blob};
use crate::error::{CareError, Result};
use crate::models::Vector;
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Mutex;
use tokio::sync::OnceCell;
use tracing::warn;

const TABLES: [Table; 4] = [
    Table::FileEmbeddings,
    Table::DocumentChunkEmbeddings,
    Table::PrComments,
    Table::DirectoryStructure,
];

pub struct SqliteStore {
    pool: SqlitePool,
    ensured: OnceCell<()>,
    /// One cached ANN index per table, rebuilt lazily; `None` means "not
    /// yet built for the current row count", never a poisoned state.
    indexes: Mutex<HashMap<Table, Option<IvfIndex>>>,
}

impl SqliteStore {
    pub async fn connect(config: &StoreConfig) -> Result<Self> {
        let pool = crate::db::connect(config).await?;
        Ok(Self { pool, ensured: OnceCell::new(), indexes: Mutex::new(HashMap::new()) })
    }

    fn invalidate_index(&self, table: Table) {
        self.indexes.lock().expect("index cache mutex poisoned").remove(&table);
    }

    async fn rebuild_index_if_needed(&self, table: Table, dims: usize) -> Result<()> {
        let already_built = self.indexes.lock().expect("index cache mutex poisoned").contains_key(&table);
        if already_built {
            return Ok(());
        }

        let rows: Vec<(String, Vec<u8>)> = sqlx::query(&format!("SELECT id, vector FROM {} ", table.name()))
            .fetch_all(&self.pool)
            .await?
            .into_iter()
            .map(|r| (r.get::<String, _>("id"), r.get::<Vec<u8>, _>("vector")))
            .collect();

        let count = rows.len();
        let kind = IndexKind::for_row_count(count, dims);
        let vectors: Vec<(String, Vec<f32>)> = rows.into_iter().map(|(id, blob)| (id, blob_to_vec(&blob))).collect();
        let index = IvfIndex::build(vectors, kind);
        self.indexes.lock().expect("index cache mutex poisoned").insert(table, Some(index));
        Ok(())
    }
}

#[async_trait]
impl VectorStore for SqliteStore {
    async fn ensure_tables(&self) -> Result<()> {
        self.ensured
            .get_or_try_init(|| async {
                for table in TABLES {
                    create_table(&self.pool, table).await?;
                }
                Ok::<(), CareError>(())
            })
            .await?;
        Ok(())
    }

    async fn upsert(&self, table: Table, rows: Vec<StoredRow>) -> Result<()> {
        if rows.is_empty() {
            return Ok(());
        }

        let ids: Vec<String> = rows.iter().map(|r| r.id.clone()).collect();
        let mut tx = self.pool.begin().await?;

        delete_ids(&mut tx, table, &ids).await?;

        for row in &rows {
            let vector_blob = vec_to_blob(row.vector.as_slice());
            sqlx::query(&format!(
                "INSERT INTO {} (id, project_path, path, content, vector, is_test_file, \
                 is_documentation, is_directory_structure, last_modified, extra_json) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                table.name()
            ))
            .bind(&row.id)
            .bind(&row.project_path)
            .bind(&row.path)
            .bind(&row.content)
            .bind(vector_blob)
            .bind(row.is_test_file)
            .bind(row.is_documentation)
            .bind(row.is_directory_structure)
            .bind(row.last_modified.to_rfc3339())
            .bind(&row.extra_json)
            .execute(&mut *tx)
            .await?;

            sqlx::query(&format!("INSERT INTO {} (id, content) VALUES (?, ?)", table.fts_name()))
                .bind(&row.id)
                .bind(&row.content)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        self.invalidate_index(table);
        Ok(())
    }

    async fn search(&self, table: Table, options: SearchOptions<'_>) -> Result<Vec<SearchHit>> {
        let fts_hits = fetch_fts_candidates(&self.pool, table, options.query_text, options.limit * 4).await?;
        let fts_ranked: Vec<String> = fts_hits.iter().map(|(id, _)| id.clone()).collect();
        let fts_scores: HashMap<&str, f64> = fts_hits.iter().map(|(id, score)| (id.as_str(), *score)).collect();

        let vector_hits: Vec<(String, f32)> = match options.query_vector {
            Some(vector) => {
                self.rebuild_index_if_needed(table, vector.dims()).await?;
                let guard = self.indexes.lock().expect("index cache mutex poisoned");
                match guard.get(&table).and_then(|i| i.as_ref()) {
                    Some(index) => index.search(vector.as_slice(), options.limit * 4, 8),
                    None => Vec::new(),
                }
            }
            None => Vec::new(),
        };
        let vector_ranked: Vec<String> = vector_hits.iter().map(|(id, _)| id.clone()).collect();
        // §4.3: `score = exp(-2 * distance)`, distance being cosine distance.
        let vector_scores: HashMap<&str, f64> = vector_hits
            .iter()
            .map(|(id, cosine)| {
                let distance = 1.0 - *cosine as f64;
                (id.as_str(), (-2.0 * distance).exp())
            })
            .collect();

        // RRF only decides fused ranking order across the two channels; the
        // score exposed on each hit is the real per-channel similarity, not
        // the rank-derived fusion score (which decays too slowly to be a
        // meaningful relevance floor).
        let fused = fusion::fuse_vector_and_fts(&vector_ranked, &fts_ranked, fusion::RrfConfig::default());
        let fts_set: std::collections::HashSet<&str> = fts_ranked.iter().map(|s| s.as_str()).collect();
        let vector_set: std::collections::HashSet<&str> = vector_ranked.iter().map(|s| s.as_str()).collect();

        let mut hits = Vec::new();
        for (id, _rank_score) in fused {
            if hits.len() >= options.limit {
                break;
            }

            let score = match (vector_scores.get(id.as_str()), fts_scores.get(id.as_str())) {
                (Some(v), Some(f)) => v.max(*f),
                (Some(v), None) => *v,
                (None, Some(f)) => *f,
                (None, None) => 0.0,
            };
            if score < options.score_floor {
                continue;
            }

            if options.predicate.is_some() || !options.project_path.is_empty() {
                let row = get_row_impl(&self.pool, table, &id).await?;
                let Some(row) = row else { continue };
                if row.project_path != options.project_path {
                    continue;
                }
                if let Some(predicate) = &options.predicate {
                    if !predicate(&row) {
                        continue;
                    }
                }
            }

            hits.push(SearchHit {
                matched_vector: vector_set.contains(id.as_str()),
                matched_fts: fts_set.contains(id.as_str()),
                id,
                score,
            });
        }

        Ok(hits)
    }

    async fn count_rows(&self, table: Table) -> Result<usize> {
        let count: i64 = sqlx::query_scalar(&format!("SELECT COUNT(*) FROM {}", table.name()))
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }

    async fn drop_table(&self, table: Table) -> Result<()> {
        sqlx::query(&format!("DELETE FROM {}", table.name())).execute(&self.pool).await?;
        sqlx::query(&format!("DELETE FROM {}", table.fts_name())).execute(&self.pool).await?;
        self.invalidate_index(table);
        Ok(())
    }

    async fn delete_where(&self, table: Table, ids: &[String]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        delete_ids(&mut tx, table, ids).await?;
        tx.commit().await?;
        self.invalidate_index(table);
        Ok(())
    }

    async fn get_row(&self, table: Table, id: &str) -> Result<Option<StoredRow>> {
        get_row_impl(&self.pool, table, id).await
    }

    async fn list_rows_for_project(&self, table: Table, project_path: &str) -> Result<Vec<StoredRow>> {
        let rows = sqlx::query(&format!(
            "SELECT id, project_path, path, content, vector, is_test_file, is_documentation, \
             is_directory_structure, last_modified, extra_json FROM {} WHERE project_path = ?",
            table.name()
        ))
        .bind(project_path)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| StoredRow {
                id: r.get("id"),
                project_path: r.get("project_path"),
                path: r.get("path"),
                content: r.get("content"),
                vector: Vector(blob_to_vec(&r.get::<Vec<u8>, _>("vector"))),
                is_test_file: r.get("is_test_file"),
                is_documentation: r.get("is_documentation"),
                is_directory_structure: r.get("is_directory_structure"),
                last_modified: chrono::DateTime::parse_from_rfc3339(&r.get::<String, _>("last_modified"))
                    .map(|dt| dt.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
                extra_json: r.get("extra_json"),
            })
            .collect())
    }
}

async fn create_table(pool: &SqlitePool, table: Table) -> Result<()> {
    sqlx::query(&format!(
        "CREATE TABLE IF NOT EXISTS {} (
            id TEXT PRIMARY KEY,
            project_path TEXT NOT NULL,
            path TEXT,
            content TEXT NOT NULL,
            vector BLOB NOT NULL,
            is_test_file INTEGER NOT NULL DEFAULT 0,
            is_documentation INTEGER NOT NULL DEFAULT 0,
            is_directory_structure INTEGER NOT NULL DEFAULT 0,
            last_modified TEXT NOT NULL,
            extra_json TEXT NOT NULL
        )",
        table.name()
    ))
    .execute(pool)
    .await?;

    sqlx::query(&format!(
        "CREATE INDEX IF NOT EXISTS idx_{}_project_path ON {} (project_path)",
        table.name(),
        table.name()
    ))
    .execute(pool)
    .await?;

    let fts_exists: bool = sqlx::query_scalar(
        "SELECT COUNT(*) > 0 FROM sqlite_master WHERE type='table' AND name = ?",
    )
    .bind(table.fts_name())
    .fetch_one(pool)
    .await?;

    if !fts_exists {
        let create_result = sqlx::query(&format!(
            "CREATE VIRTUAL TABLE {} USING fts5(id UNINDEXED, content)",
            table.fts_name()
        ))
        .execute(pool)
        .await;

        if let Err(e) = create_result {
            warn!("FTS5 index creation failed for {}, queries will rely on exact search: {e}", table.name());
        }
    }

    Ok(())
}

async fn delete_ids(tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>, table: Table, ids: &[String]) -> Result<()> {
    for id in ids {
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table.name())).bind(id).execute(&mut **tx).await?;
        sqlx::query(&format!("DELETE FROM {} WHERE id = ?", table.fts_name())).bind(id).execute(&mut **tx).await?;
    }
    Ok(())
}

/// Returns `(id, score)` pairs, `score` already mapped into `[0, 1]` per
/// §4.3 (`score = raw / max(raw, 1)`, `raw` being the sign-flipped bm25
/// value since FTS5's `bm25()`/`rank` convention is "more negative is
/// better").
async fn fetch_fts_candidates(pool: &SqlitePool, table: Table, query_text: &str, limit: usize) -> Result<Vec<(String, f64)>> {
    if query_text.trim().is_empty() {
        return Ok(Vec::new());
    }

    let escaped = query_text.replace('"', "\"\"");
    let rows = sqlx::query(&format!(
        "SELECT id, bm25({}) AS bm25_score FROM {} WHERE {} MATCH ? ORDER BY rank LIMIT ?",
        table.fts_name(),
        table.fts_name(),
        table.fts_name()
    ))
    .bind(format!("\"{escaped}\""))
    .bind(limit as i64)
    .fetch_all(pool)
    .await;

    match rows {
        Ok(rows) => Ok(rows
            .into_iter()
            .map(|r| {
                let id = r.get::<String, _>("id");
                let bm25_score = r.get::<f64, _>("bm25_score");
                let raw = (-bm25_score).max(0.0);
                let score = raw / raw.max(1.0);
                (id, score)
            })
            .collect()),
        Err(e) => {
            warn!("FTS query failed on {}, continuing with vector channel only: {e}", table.name());
            Ok(Vec::new())
        }
    }
}

async fn get_row_impl(pool: &SqlitePool, table: Table, id: &str) -> Result<Option<StoredRow>> {
    let row = sqlx::query(&format!(
        "SELECT id, project_path, path, content, vector, is_test_file, is_documentation, \
         is_directory_structure, last_modified, extra_json FROM {} WHERE id = ?",
        table.name()
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|r| StoredRow {
        id: r.get("id"),
        project_path: r.get("project_path"),
        path: r.get("path"),
        content: r.get("content"),
        vector: Vector(blob_to_vec(&r.get::<Vec<u8>, _>("vector"))),
        is_test_file: r.get("is_test_file"),
        is_documentation: r.get("is_documentation"),
        is_directory_structure: r.get("is_directory_structure"),
        last_modified: chrono::DateTime::parse_from_rfc3339(&r.get::<String, _>("last_modified"))
            .map(|dt| dt.with_timezone(&chrono::Utc))
            .unwrap_or_else(|_| chrono::Utc::now()),
        extra_json: r.get("extra_json"),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreConfig;
    use tempfile::tempdir;

    async fn test_store() -> (SqliteStore, tempfile::TempDir) {
        let dir = tempdir().unwrap();
        let config = StoreConfig { data_dir: dir.path().to_path_buf() };
        let store = SqliteStore::connect(&config).await.unwrap();
        store.ensure_tables().await.unwrap();
        (store, dir)
    }

    fn sample_row(id: &str, project_path: &str, content: &str, vector: Vec<f32>) -> StoredRow {
        StoredRow {
            id: id.to_string(),
            project_path: project_path.to_string(),
            path: Some(format!("{id}.rs")),
            content: content.to_string(),
            vector: Vector(vector),
            is_test_file: false,
            is_documentation: false,
            is_directory_structure: false,
            last_modified: chrono::Utc::now(),
            extra_json: "{}".to_string(),
        }
    }

    #[tokio::test]
    async fn ensure_tables_is_idempotent() {
        let (store, _dir) = test_store().await;
        store.ensure_tables().await.unwrap();
        store.ensure_tables().await.unwrap();
    }

    #[tokio::test]
    async fn upsert_then_count_then_delete() {
        let (store, _dir) = test_store().await;
        store
            .upsert(
                Table::FileEmbeddings,
                vec![sample_row("a", "/proj", "fn main() {}", vec![1.0, 0.0])],
            )
            .await
            .unwrap();

        assert_eq!(store.count_rows(Table::FileEmbeddings).await.unwrap(), 1);

        store.delete_where(Table::FileEmbeddings, &["a".to_string()]).await.unwrap();
        assert_eq!(store.count_rows(Table::FileEmbeddings).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn project_isolation_excludes_other_projects() {
        let (store, _dir) = test_store().await;
        store
            .upsert(
                Table::FileEmbeddings,
                vec![
                    sample_row("a", "/proj-a", "fn handler() {}", vec![1.0, 0.0]),
                    sample_row("b", "/proj-b", "fn handler() {}", vec![1.0, 0.0]),
                ],
            )
            .await
            .unwrap();

        let query_vector = Vector(vec![1.0, 0.0]);
        let options = SearchOptions::new("/proj-a", "handler", 10).with_vector(&query_vector);
        let hits = store.search(Table::FileEmbeddings, options).await.unwrap();

        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "a");
    }

    #[tokio::test]
    async fn upsert_is_atomic_per_batch() {
        let (store, _dir) = test_store().await;
        store
            .upsert(Table::FileEmbeddings, vec![sample_row("a", "/proj", "old content", vec![1.0, 0.0])])
            .await
            .unwrap();

        store
            .upsert(Table::FileEmbeddings, vec![sample_row("a", "/proj", "new content", vec![0.0, 1.0])])
            .await
            .unwrap();

        let row = store.get_row(Table::FileEmbeddings, "a").await.unwrap().unwrap();
        assert_eq!(row.content, "new content");
    }

    #[tokio::test]
    async fn list_rows_for_project_is_scoped_and_bulk() {
        let (store, _dir) = test_store().await;
        store
            .upsert(
                Table::FileEmbeddings,
                vec![
                    sample_row("a", "/proj-a", "fn one() {}", vec![1.0, 0.0]),
                    sample_row("b", "/proj-a", "fn two() {}", vec![0.0, 1.0]),
                    sample_row("c", "/proj-b", "fn three() {}", vec![1.0, 1.0]),
                ],
            )
            .await
            .unwrap();

        let rows = store.list_rows_for_project(Table::FileEmbeddings, "/proj-a").await.unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.project_path == "/proj-a"));
    }
}
