//! Shared fixtures for the end-to-end scenario suite: a deterministic
//! embedding provider and row-building helpers so tests control exactly
//! what the vector channel sees without downloading a real model.

use care_engine::config::{EmbeddingConfig, RetrievalConfig};
use care_engine::embedding::{CacheRegistry, EmbeddingProvider, ProviderCounters};
use care_engine::models::{DocumentChunkRecord, FileEmbeddingRecord, Vector};
use care_engine::retriever::ContextRetriever;
use care_engine::store::{StoredRow, Table, VectorStore};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

/// Marker tokens the fixtures embed into content so cosine similarity is
/// predictable: each dimension counts one marker's occurrences in the text.
pub const MARKERS: &[&str] = &["alpha", "beta", "gamma", "delta"];

/// Counts marker-word occurrences into a fixed-width vector (case-sensitive,
/// whole-token match via whitespace splitting) — a stand-in for a real
/// sentence embedding that still gives controllable cosine similarity.
pub struct MarkerProvider {
    pub dims: usize,
    pub passage_calls: AtomicU64,
    pub query_calls: AtomicU64,
}

impl MarkerProvider {
    pub fn new() -> Self {
        Self { dims: MARKERS.len(), passage_calls: AtomicU64::new(0), query_calls: AtomicU64::new(0) }
    }

    fn embed_text(&self, text: &str) -> Vector {
        let words: Vec<&str> = text.split_whitespace().collect();
        let counts: Vec<f32> = MARKERS
            .iter()
            .map(|marker| words.iter().filter(|w| w.eq_ignore_ascii_case(marker)).count() as f32)
            .collect();
        Vector(counts)
    }
}

#[async_trait]
impl EmbeddingProvider for MarkerProvider {
    fn model_name(&self) -> &str {
        "marker-fake"
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed_passage(&self, text: &str) -> anyhow::Result<Option<Vector>> {
        self.passage_calls.fetch_add(1, Ordering::Relaxed);
        Ok(Some(self.embed_text(text)))
    }
    async fn embed_query(&self, text: &str) -> anyhow::Result<Option<Vector>> {
        self.query_calls.fetch_add(1, Ordering::Relaxed);
        Ok(Some(self.embed_text(text)))
    }
    async fn embed_batch(&self, texts: &[String]) -> anyhow::Result<Vec<Option<Vector>>> {
        self.passage_calls.fetch_add(texts.len() as u64, Ordering::Relaxed);
        Ok(texts.iter().map(|t| Some(self.embed_text(t))).collect())
    }
    fn counters(&self) -> ProviderCounters {
        ProviderCounters {
            model_loads: 0,
            passage_embeds: self.passage_calls.load(Ordering::Relaxed),
            query_embeds: self.query_calls.load(Ordering::Relaxed),
        }
    }
}

pub fn test_embedding_config() -> EmbeddingConfig {
    let mut config = EmbeddingConfig::default();
    config.dims = MARKERS.len();
    config
}

/// Builds a [`ContextRetriever`] over a fresh cache registry with the
/// default retrieval thresholds, wired to a shared store and provider.
pub fn make_retriever(store: Arc<dyn VectorStore>, provider: Arc<MarkerProvider>) -> ContextRetriever {
    make_retriever_with_config(store, provider, RetrievalConfig::default())
}

pub fn make_retriever_with_config(store: Arc<dyn VectorStore>, provider: Arc<MarkerProvider>, config: RetrievalConfig) -> ContextRetriever {
    let caches = CacheRegistry::new(&test_embedding_config());
    ContextRetriever::new(store, provider, caches, config)
}

pub fn file_row(project_path: &str, path: &str, content: &str, vector: Vector, is_test_file: bool) -> StoredRow {
    let record = FileEmbeddingRecord {
        id: format!("{path}#{:08x}", path.len()),
        path: path.to_string(),
        project_path: project_path.to_string(),
        name: path.rsplit('/').next().unwrap_or(path).to_string(),
        language: "rust".to_string(),
        content: content.to_string(),
        content_hash: format!("{:08x}", content.len()),
        last_modified: chrono::Utc::now(),
        vector: vector.clone(),
    };
    StoredRow {
        id: record.id.clone(),
        project_path: project_path.to_string(),
        path: Some(path.to_string()),
        content: content.to_string(),
        vector,
        is_test_file,
        is_documentation: false,
        is_directory_structure: false,
        last_modified: record.last_modified,
        extra_json: serde_json::to_string(&record).unwrap(),
    }
}

pub fn doc_row(
    project_path: &str,
    doc_path: &str,
    document_title: &str,
    heading_text: Option<&str>,
    content: &str,
    vector: Vector,
) -> StoredRow {
    let record = DocumentChunkRecord {
        id: format!("{doc_path}#{}", heading_text.unwrap_or("root")),
        original_document_path: doc_path.to_string(),
        project_path: project_path.to_string(),
        heading_text: heading_text.map(|h| h.to_string()),
        document_title: document_title.to_string(),
        language: "markdown".to_string(),
        start_line_in_doc: 0,
        content: content.to_string(),
        content_hash: format!("{:08x}", content.len()),
        last_modified: chrono::Utc::now(),
        vector: vector.clone(),
    };
    StoredRow {
        id: record.id.clone(),
        project_path: project_path.to_string(),
        path: Some(doc_path.to_string()),
        content: content.to_string(),
        vector,
        is_test_file: false,
        is_documentation: true,
        is_directory_structure: false,
        last_modified: record.last_modified,
        extra_json: serde_json::to_string(&record).unwrap(),
    }
}
