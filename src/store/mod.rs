//! §4.3 Vector Store: three persistent tables (plus the directory-structure
//! snapshot), adaptive vector indexing, and hybrid (dense + FTS) search
//! fused by reciprocal-rank fusion.

pub mod fusion;
pub mod ivf;
mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::models::Vector;
use async_trait::async_trait;
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Table {
    FileEmbeddings,
    DocumentChunkEmbeddings,
    PrComments,
    DirectoryStructure,
}

impl Table {
    pub fn name(&self) -> &'static str {
        match self {
            Table::FileEmbeddings => "file_embeddings",
            Table::DocumentChunkEmbeddings => "document_chunk_embeddings",
            Table::PrComments => "pr_comments",
            Table::DirectoryStructure => "directory_structure",
        }
    }

    pub fn fts_name(&self) -> &'static str {
        match self {
            Table::FileEmbeddings => "file_embeddings_fts",
            Table::DocumentChunkEmbeddings => "document_chunk_embeddings_fts",
            Table::PrComments => "pr_comments_fts",
            Table::DirectoryStructure => "directory_structure_fts",
        }
    }
}

/// §4.3 adaptive vector index policy, evaluated against row count.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexKind {
    Exact,
    IvfFlat { num_partitions: usize },
    IvfPq { num_partitions: usize, num_sub_vectors: usize },
}

impl IndexKind {
    /// `<1,000 -> exact`, `1,000..10,000 -> IVF-Flat`, `>=10,000 -> IVF-PQ`.
    pub fn for_row_count(rows: usize, dims: usize) -> Self {
        if rows < 1_000 {
            IndexKind::Exact
        } else if rows < 10_000 {
            let partitions = ((rows as f64 / 50.0).sqrt().floor() as usize).max(2);
            IndexKind::IvfFlat { num_partitions: partitions }
        } else {
            let partitions = ((rows as f64 / 100.0).sqrt().floor() as usize).max(8);
            let sub_vectors = (dims / 4).max(1);
            IndexKind::IvfPq { num_partitions: partitions, num_sub_vectors: sub_vectors }
        }
    }
}

/// A stored row as read back from a table, with its raw content for FTS
/// and its vector for the dense channel.
#[derive(Debug, Clone)]
pub struct StoredRow {
    pub id: String,
    pub project_path: String,
    pub path: Option<String>,
    pub content: String,
    pub vector: Vector,
    pub is_test_file: bool,
    pub is_documentation: bool,
    pub is_directory_structure: bool,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    /// Full typed record (`FileEmbeddingRecord`/`DocumentChunkRecord`/
    /// `PrCommentRecord`/`DirectoryStructureRecord`), serialized — the
    /// store itself only needs the generic columns above to index and
    /// search; callers deserialize this back into the concrete variant.
    pub extra_json: String,
}

/// One scored hit from a `search` call.
#[derive(Debug, Clone, Serialize)]
pub struct SearchHit {
    pub id: String,
    /// `[0, 1]`.
    pub score: f64,
    pub matched_vector: bool,
    pub matched_fts: bool,
}

/// Accepted by `search`; an opaque predicate lets callers filter by type,
/// test-file status, or anything else without the store needing to know
/// the shape of every collaborator's filtering need.
pub struct SearchOptions<'a> {
    pub project_path: &'a str,
    pub query_text: &'a str,
    pub query_vector: Option<&'a Vector>,
    pub limit: usize,
    pub score_floor: f64,
    pub predicate: Option<Box<dyn Fn(&StoredRow) -> bool + Send + Sync + 'a>>,
}

impl<'a> SearchOptions<'a> {
    pub fn new(project_path: &'a str, query_text: &'a str, limit: usize) -> Self {
        Self {
            project_path,
            query_text,
            query_vector: None,
            limit,
            score_floor: 0.0,
            predicate: None,
        }
    }

    pub fn with_vector(mut self, vector: &'a Vector) -> Self {
        self.query_vector = Some(vector);
        self
    }

    pub fn with_floor(mut self, floor: f64) -> Self {
        self.score_floor = floor;
        self
    }

    pub fn with_predicate(mut self, predicate: impl Fn(&StoredRow) -> bool + Send + Sync + 'a) -> Self {
        self.predicate = Some(Box::new(predicate));
        self
    }
}

#[async_trait]
pub trait VectorStore: Send + Sync {
    /// Idempotent; concurrent callers coalesce onto one initialisation.
    async fn ensure_tables(&self) -> Result<()>;

    /// Deletes by id, then appends; readers never observe both old and new
    /// forms of a requested key, though they may briefly observe neither.
    async fn upsert(&self, table: Table, rows: Vec<StoredRow>) -> Result<()>;

    async fn search(&self, table: Table, options: SearchOptions<'_>) -> Result<Vec<SearchHit>>;

    async fn count_rows(&self, table: Table) -> Result<usize>;

    /// Every row for one project, in a single bulk query — used by the
    /// Indexer's mtime pre-filter so it never issues more than one DB
    /// round-trip beyond the per-file `stat`.
    async fn list_rows_for_project(&self, table: Table, project_path: &str) -> Result<Vec<StoredRow>>;

    async fn drop_table(&self, table: Table) -> Result<()>;

    async fn delete_where(&self, table: Table, ids: &[String]) -> Result<()>;

    /// Project-isolation fallback for legacy rows lacking `project_path`:
    /// verify the stored relative path still resolves under `project_root`.
    async fn get_row(&self, table: Table, id: &str) -> Result<Option<StoredRow>>;
}
