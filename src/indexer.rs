//! §4.5 Indexer: walks a project, maintains the `file_embeddings` and
//! `document_chunk_embeddings` tables incrementally, and keeps a single
//! directory-structure snapshot record current.
//!
//! `.gitignore` resolution uses the `ignore` crate's `WalkBuilder` (the
//! same crate `ripgrep` walks with); user-supplied exclude globs are
//! matched with `globset`, reusing the shape of the teacher's
//! `build_globset` helper.

use crate::chunk::{chunk_id, chunk_markdown};
use crate::config::ProjectConfig;
use crate::embedding::EmbeddingProvider;
use crate::error::{CareError, Result};
use crate::models::{DirectoryStructureRecord, DocumentChunkRecord, FileEmbeddingRecord, Vector};
use crate::paths::{is_binary_extension, is_documentation, is_excluded_dir_component, is_test_file, language_for_extension};
use crate::store::{StoredRow, Table, VectorStore};

use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use md5::{Digest, Md5};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::warn;

const MAX_FILE_BYTES: u64 = 1024 * 1024;
const MAX_TREE_DEPTH: usize = 5;

/// §4.5: result of one `index_project` run. Path lists, not counts — the
/// caller may want to report or retry individual files.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct Summary {
    pub processed: Vec<String>,
    pub skipped: Vec<String>,
    pub excluded: Vec<String>,
    pub failed: Vec<(String, String)>,
}

pub struct Indexer {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
}

impl Indexer {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        Self { store, embedder }
    }

    /// `files`, when non-empty, restricts indexing to that candidate set
    /// (e.g. a git diff); an empty slice means "discover every file under
    /// `project.path`" via `.gitignore`-aware walking.
    pub async fn index_project(&self, project: &ProjectConfig, files: &[PathBuf], batch_size: usize) -> Result<Summary> {
        self.store.ensure_tables().await?;
        let mut summary = Summary::default();

        let project_path = project.path.to_string_lossy().to_string();

        self.emit_directory_structure(project, &project_path).await?;

        let user_excludes = build_globset(&project.exclude_patterns)
            .map_err(|e| CareError::other(format!("invalid exclude pattern: {e}")))?;

        let candidates = if files.is_empty() {
            discover_files(&project.path, project.respect_gitignore, &user_excludes, &mut summary)
        } else {
            prefilter_explicit_files(&project.path, files, &user_excludes, &mut summary)
        };

        let existing = self
            .store
            .list_rows_for_project(Table::FileEmbeddings, &project_path)
            .await?;
        let existing_by_path: BTreeMap<String, &StoredRow> =
            existing.iter().filter_map(|r| r.path.as_ref().map(|p| (p.clone(), r))).collect();

        let mut doc_paths = Vec::new();
        let mut to_embed: Vec<PendingFile> = Vec::new();
        let mut stale_ids: Vec<String> = Vec::new();

        for path in candidates {
            let relative = relative_path(&project.path, &path);
            let metadata = match std::fs::metadata(&path) {
                Ok(m) => m,
                Err(e) => {
                    summary.failed.push((relative, e.to_string()));
                    continue;
                }
            };
            let mtime = metadata.modified().unwrap_or(SystemTime::UNIX_EPOCH);

            if let Some(existing_row) = existing_by_path.get(&relative) {
                if existing_row.last_modified >= chrono_from_system_time(mtime) {
                    summary.skipped.push(relative);
                    continue;
                }
            }

            let content = match std::fs::read_to_string(&path) {
                Ok(c) => c,
                Err(e) => {
                    summary.failed.push((relative, e.to_string()));
                    continue;
                }
            };

            let content_hash = content_hash(&content);
            let existing_row = existing_by_path.get(&relative);
            let unchanged = existing_row
                .and_then(|row| serde_json::from_str::<FileEmbeddingRecord>(&row.extra_json).ok())
                .map(|record| record.content_hash == content_hash)
                .unwrap_or(false);
            if unchanged {
                summary.skipped.push(relative);
                continue;
            }

            // Content changed: the new row's id is keyed by the new content
            // hash, so the prior id must be deleted explicitly — `upsert`
            // only replaces rows sharing the id it's given.
            if let Some(existing_row) = existing_row {
                stale_ids.push(existing_row.id.clone());
            }

            if is_documentation(&relative) {
                doc_paths.push((path.clone(), relative.clone()));
            }

            to_embed.push(PendingFile { path, relative, content, content_hash, mtime });
        }

        self.embed_and_upsert_files(&project_path, to_embed, batch_size, &mut summary).await?;
        if !stale_ids.is_empty() {
            self.store.delete_where(Table::FileEmbeddings, &stale_ids).await?;
        }

        for (path, relative) in doc_paths {
            if let Err(e) = self.reindex_document(&project_path, &path, &relative, batch_size).await {
                summary.failed.push((relative, e.to_string()));
            }
        }

        Ok(summary)
    }

    async fn emit_directory_structure(&self, project: &ProjectConfig, project_path: &str) -> Result<()> {
        let tree = render_tree(&project.path, MAX_TREE_DEPTH);

        let project_name = project
            .path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| project_path.to_string());
        let id = DirectoryStructureRecord::id_for_project(&project_name);

        if let Some(existing) = self.store.get_row(Table::DirectoryStructure, &id).await? {
            if existing.content == tree {
                return Ok(());
            }
        }

        let vector = self.embedder.embed_passage(&tree).await.map_err(CareError::from)?;
        let Some(vector) = vector else { return Ok(()) };

        let record = DirectoryStructureRecord {
            id,
            project_path: project_path.to_string(),
            content: tree,
            vector,
            last_modified: chrono::Utc::now(),
        };

        let row = StoredRow {
            id: record.id.clone(),
            project_path: record.project_path.clone(),
            path: None,
            content: record.content.clone(),
            vector: record.vector.clone(),
            is_test_file: false,
            is_documentation: false,
            is_directory_structure: true,
            last_modified: record.last_modified,
            extra_json: serde_json::to_string(&record).map_err(|e| CareError::other(e.to_string()))?,
        };

        self.store.upsert(Table::DirectoryStructure, vec![row]).await
    }

    async fn embed_and_upsert_files(
        &self,
        project_path: &str,
        pending: Vec<PendingFile>,
        batch_size: usize,
        summary: &mut Summary,
    ) -> Result<()> {
        if pending.is_empty() {
            return Ok(());
        }

        let effective_batch = batch_size.clamp(64, 256);
        let mut rows = Vec::with_capacity(pending.len());

        for chunk in pending.chunks(effective_batch) {
            let texts: Vec<String> = chunk.iter().map(|f| f.content.clone()).collect();
            let vectors = match self.embedder.embed_batch(&texts).await {
                Ok(v) => v,
                Err(e) => {
                    for file in chunk {
                        summary.failed.push((file.relative.clone(), e.to_string()));
                    }
                    continue;
                }
            };

            for (file, vector) in chunk.iter().zip(vectors.into_iter()) {
                let Some(vector) = vector else {
                    summary.failed.push((file.relative.clone(), "embedding failed after retries".to_string()));
                    continue;
                };
                rows.push(self.file_row(project_path, file, vector)?);
                summary.processed.push(file.relative.clone());
            }
        }

        self.store.upsert(Table::FileEmbeddings, rows).await
    }

    fn file_row(&self, project_path: &str, file: &PendingFile, vector: Vector) -> Result<StoredRow> {
        let id = format!("{}#{}", file.relative, file.content_hash);
        let name = file.path.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_default();
        let record = FileEmbeddingRecord {
            id: id.clone(),
            path: file.relative.clone(),
            project_path: project_path.to_string(),
            name,
            language: language_for_extension(&file.relative),
            content: file.content.clone(),
            content_hash: file.content_hash.clone(),
            last_modified: chrono_from_system_time(file.mtime),
            vector,
        };

        Ok(StoredRow {
            id,
            project_path: record.project_path.clone(),
            path: Some(record.path.clone()),
            content: record.content.clone(),
            vector: record.vector.clone(),
            is_test_file: is_test_file(&record.path),
            is_documentation: is_documentation(&record.path),
            is_directory_structure: false,
            last_modified: record.last_modified,
            extra_json: serde_json::to_string(&record).map_err(|e| CareError::other(e.to_string()))?,
        })
    }

    async fn reindex_document(&self, project_path: &str, path: &Path, relative: &str, batch_size: usize) -> Result<()> {
        let text = std::fs::read_to_string(path).map_err(|e| CareError::FileReadError { path: path.to_path_buf(), cause: e })?;

        let existing = self.store.list_rows_for_project(Table::DocumentChunkEmbeddings, project_path).await?;
        let stale_ids: Vec<String> = existing
            .iter()
            .filter(|r| r.path.as_deref() == Some(relative))
            .map(|r| r.id.clone())
            .collect();
        if !stale_ids.is_empty() {
            self.store.delete_where(Table::DocumentChunkEmbeddings, &stale_ids).await?;
        }

        let chunks = chunk_markdown(relative, &text);
        if chunks.is_empty() {
            return Ok(());
        }

        let effective_batch = batch_size.clamp(64, 256);
        let mut rows = Vec::with_capacity(chunks.len());

        for batch in chunks.chunks(effective_batch) {
            let texts: Vec<String> = batch.iter().map(|c| c.content.clone()).collect();
            let vectors = self.embedder.embed_batch(&texts).await.map_err(CareError::from)?;

            for (chunk, vector) in batch.iter().zip(vectors.into_iter()) {
                let Some(vector) = vector else { continue };
                let id = chunk_id(relative, chunk);
                let record = DocumentChunkRecord {
                    id: id.clone(),
                    original_document_path: relative.to_string(),
                    project_path: project_path.to_string(),
                    heading_text: chunk.heading_text.clone(),
                    document_title: chunk.document_title.clone(),
                    language: language_for_extension(relative),
                    start_line_in_doc: chunk.start_line_in_doc,
                    content: chunk.content.clone(),
                    content_hash: chunk.content_hash.clone(),
                    last_modified: chrono::Utc::now(),
                    vector,
                };

                rows.push(StoredRow {
                    id,
                    project_path: record.project_path.clone(),
                    path: Some(record.original_document_path.clone()),
                    content: record.content.clone(),
                    vector: record.vector.clone(),
                    is_test_file: false,
                    is_documentation: true,
                    is_directory_structure: false,
                    last_modified: record.last_modified,
                    extra_json: serde_json::to_string(&record).map_err(|e| CareError::other(e.to_string()))?,
                });
            }
        }

        self.store.upsert(Table::DocumentChunkEmbeddings, rows).await
    }
}

struct PendingFile {
    path: PathBuf,
    relative: String,
    content: String,
    content_hash: String,
    mtime: SystemTime,
}

fn chrono_from_system_time(time: SystemTime) -> chrono::DateTime<chrono::Utc> {
    chrono::DateTime::<chrono::Utc>::from(time)
}

fn content_hash(content: &str) -> String {
    let digest = Md5::digest(content.as_bytes());
    format!("{digest:x}")[..8].to_string()
}

fn relative_path(root: &Path, path: &Path) -> String {
    path.strip_prefix(root).unwrap_or(path).to_string_lossy().replace('\\', "/")
}

fn build_globset(patterns: &[String]) -> std::result::Result<GlobSet, globset::Error> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    builder.build()
}

/// Single stat-plus-classification pass per file (performance contract).
fn discover_files(root: &Path, respect_gitignore: bool, user_excludes: &GlobSet, summary: &mut Summary) -> Vec<PathBuf> {
    let mut walker = WalkBuilder::new(root);
    walker.hidden(false).git_ignore(respect_gitignore).git_exclude(respect_gitignore).git_global(respect_gitignore);

    let mut out = Vec::new();
    for entry in walker.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(_) => continue,
        };
        let Some(file_type) = entry.file_type() else { continue };
        if !file_type.is_file() {
            continue;
        }

        let path = entry.path();
        let relative = relative_path(root, path);

        if should_exclude(root, path, &relative, user_excludes, summary) {
            continue;
        }

        out.push(path.to_path_buf());
    }
    out
}

fn prefilter_explicit_files(root: &Path, files: &[PathBuf], user_excludes: &GlobSet, summary: &mut Summary) -> Vec<PathBuf> {
    files
        .iter()
        .filter_map(|path| {
            let absolute = if path.is_absolute() { path.clone() } else { root.join(path) };
            let relative = relative_path(root, &absolute);
            if should_exclude(root, &absolute, &relative, user_excludes, summary) {
                None
            } else {
                Some(absolute)
            }
        })
        .collect()
}

fn should_exclude(_root: &Path, path: &Path, relative: &str, user_excludes: &GlobSet, summary: &mut Summary) -> bool {
    if path.components().any(|c| is_excluded_dir_component(&c.as_os_str().to_string_lossy())) {
        summary.excluded.push(relative.to_string());
        return true;
    }

    if is_binary_extension(relative) {
        summary.excluded.push(relative.to_string());
        return true;
    }

    if user_excludes.is_match(relative) {
        summary.excluded.push(relative.to_string());
        return true;
    }

    match std::fs::metadata(path) {
        Ok(meta) if meta.len() > MAX_FILE_BYTES => {
            summary.excluded.push(relative.to_string());
            true
        }
        Ok(_) => false,
        Err(_) => false,
    }
}

/// Renders an indented directory tree to `max_depth`, honouring the same
/// exclusion rules as the main walk.
fn render_tree(root: &Path, max_depth: usize) -> String {
    let mut out = String::new();
    out.push_str(&format!("{}\n", root.file_name().map(|n| n.to_string_lossy().to_string()).unwrap_or_else(|| root.display().to_string())));
    render_tree_level(root, 1, max_depth, &mut out);
    out
}

fn render_tree_level(dir: &Path, depth: usize, max_depth: usize, out: &mut String) {
    if depth > max_depth {
        return;
    }
    let Ok(mut entries) = std::fs::read_dir(dir).map(|it| it.filter_map(|e| e.ok()).collect::<Vec<_>>()) else {
        return;
    };
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name().to_string_lossy().to_string();
        if is_excluded_dir_component(&name) || name.starts_with('.') {
            continue;
        }
        let indent = "  ".repeat(depth);
        let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
        out.push_str(&format!("{indent}{name}{}\n", if is_dir { "/" } else { "" }));
        if is_dir {
            render_tree_level(&entry.path(), depth + 1, max_depth, out);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ProjectConfig, StoreConfig};
    use crate::embedding::{EmbeddingProvider, ProviderCounters};
    use crate::store::SqliteStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU64, Ordering};
    use tempfile::tempdir;

    struct FakeProvider {
        dims: usize,
        passage_calls: AtomicU64,
    }

    #[async_trait]
    impl EmbeddingProvider for FakeProvider {
        fn model_name(&self) -> &str {
            "fake"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed_passage(&self, text: &str) -> anyhow::Result<Option<Vector>> {
            self.passage_calls.fetch_add(1, Ordering::Relaxed);
            Ok(Some(Vector(vec![text.len() as f32; self.dims])))
        }
        async fn embed_query(&self, text: &str) -> anyhow::Result<Option<Vector>> {
            Ok(Some(Vector(vec![text.len() as f32; self.dims])))
        }
        async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Option<Vector>>> {
            self.passage_calls.fetch_add(texts.len() as u64, Ordering::Relaxed);
            Ok(texts.iter().map(|t| Some(Vector(vec![t.len() as f32; self.dims]))).collect())
        }
        fn counters(&self) -> ProviderCounters {
            ProviderCounters { model_loads: 0, passage_embeds: self.passage_calls.load(Ordering::Relaxed), query_embeds: 0 }
        }
    }

    async fn setup() -> (Indexer, Arc<FakeProvider>, tempfile::TempDir, tempfile::TempDir) {
        let project_dir = tempdir().unwrap();
        let store_dir = tempdir().unwrap();
        let store_config = StoreConfig { data_dir: store_dir.path().to_path_buf() };
        let store = Arc::new(SqliteStore::connect(&store_config).await.unwrap());
        let provider = Arc::new(FakeProvider { dims: 4, passage_calls: AtomicU64::new(0) });
        let indexer = Indexer::new(store, provider.clone());
        (indexer, provider, project_dir, store_dir)
    }

    fn project_config(path: &Path) -> ProjectConfig {
        ProjectConfig {
            path: path.to_path_buf(),
            exclude_patterns: Vec::new(),
            respect_gitignore: true,
            include_project_structure: false,
        }
    }

    #[tokio::test]
    async fn indexes_a_fresh_project_and_skips_binary_and_excluded_files() {
        let (indexer, _provider, project_dir, _store_dir) = setup().await;
        std::fs::write(project_dir.path().join("main.rs"), "fn main() {}").unwrap();
        std::fs::write(project_dir.path().join("logo.png"), [0u8, 1, 2]).unwrap();
        std::fs::create_dir_all(project_dir.path().join("node_modules")).unwrap();
        std::fs::write(project_dir.path().join("node_modules/pkg.js"), "module.exports = {}").unwrap();

        let config = project_config(project_dir.path());
        let summary = indexer.index_project(&config, &[], 64).await.unwrap();

        assert_eq!(summary.processed, vec!["main.rs".to_string()]);
        assert!(summary.excluded.iter().any(|p| p.contains("logo.png")));
        assert!(summary.excluded.iter().any(|p| p.contains("node_modules")));
    }

    #[tokio::test]
    async fn reindexing_unchanged_project_embeds_nothing() {
        let (indexer, provider, project_dir, _store_dir) = setup().await;
        std::fs::write(project_dir.path().join("main.rs"), "fn main() {}").unwrap();
        let config = project_config(project_dir.path());

        indexer.index_project(&config, &[], 64).await.unwrap();
        let calls_after_first = provider.passage_calls.load(Ordering::Relaxed);

        let summary = indexer.index_project(&config, &[], 64).await.unwrap();
        let calls_after_second = provider.passage_calls.load(Ordering::Relaxed);

        assert_eq!(summary.processed.len(), 0);
        assert_eq!(summary.skipped, vec!["main.rs".to_string()]);
        // No file content changed and the directory tree rendered identically,
        // so the second run must not call the embedder at all.
        assert_eq!(calls_after_second, calls_after_first);
    }

    #[tokio::test]
    async fn documentation_files_are_chunked_and_indexed_separately() {
        let (indexer, _provider, project_dir, _store_dir) = setup().await;
        std::fs::write(
            project_dir.path().join("README.md"),
            "# Project\n\nIntro.\n\n## Usage\n\nRun it.",
        )
        .unwrap();
        let config = project_config(project_dir.path());

        let summary = indexer.index_project(&config, &[], 64).await.unwrap();
        assert!(summary.processed.contains(&"README.md".to_string()));
    }
}
