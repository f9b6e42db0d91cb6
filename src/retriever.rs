//! §4.6 Context Retriever: `get_context(file_path, content, options)` —
//! setup (language/test detection, context inference, cached embeddings),
//! three independent hybrid-search branches, document re-ranking, and
//! final assembly into a [`ContextBundle`].

use crate::config::RetrievalConfig;
use crate::context_infer::infer_context;
use crate::embedding::{cosine_similarity, CacheRegistry, EmbeddingProvider};
use crate::error::{CareError, Result};
use crate::models::{
    CodeExampleView, ContextBundle, ContextBundleMetadata, DocumentChunkRecord, FileEmbeddingRecord,
    GuidelineView, InferredContext, PrCommentRecord, PrCommentView, Vector,
};
use crate::paths::{is_test_file, language_for_extension, normalize_for_comparison, relative_to_project};
use crate::store::{SearchOptions, StoredRow, Table, VectorStore};

use std::collections::HashMap;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

const SNIPPET_CHAR_BUDGET: usize = 10_000;

pub struct RetrieverOptions<'a> {
    pub project_path: &'a str,
    pub is_test_file_override: Option<bool>,
    pub cancel: CancellationToken,
}

impl<'a> RetrieverOptions<'a> {
    pub fn new(project_path: &'a str) -> Self {
        Self { project_path, is_test_file_override: None, cancel: CancellationToken::new() }
    }
}

pub struct ContextRetriever {
    store: Arc<dyn VectorStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    caches: CacheRegistry,
    config: RetrievalConfig,
}

impl ContextRetriever {
    pub fn new(store: Arc<dyn VectorStore>, embedder: Arc<dyn EmbeddingProvider>, caches: CacheRegistry, config: RetrievalConfig) -> Self {
        Self { store, embedder, caches, config }
    }

    pub async fn get_context(&self, file_path: &str, content: &str, options: RetrieverOptions<'_>) -> Result<ContextBundle> {
        let language = language_for_extension(file_path);
        let is_test_file = options.is_test_file_override.unwrap_or_else(|| is_test_file(file_path));

        let snippet: String = content.chars().take(SNIPPET_CHAR_BUDGET).collect();
        let snippet_context = infer_context(
            file_path,
            "",
            &[snippet.as_str()],
            &language,
            self.config.area_confidence_floor,
            self.config.tech_threshold,
        );

        let snippet_passage_vector = self.cached_passage(&snippet).await;

        let snippet_query_text = if is_test_file {
            format!("Testing code, focused on test cases, mocks, and fixtures: {snippet}")
        } else {
            snippet.clone()
        };
        let snippet_query_vector = self.cached_query(&snippet_query_text).await;

        let guideline_query_text = if is_test_file {
            format!(
                "Retrieve technical documentation, best practices, and implementation guidelines relevant to this {language} snippet, focusing on testing patterns, mocking strategies, and test organization conventions: {snippet}"
            )
        } else {
            format!("Retrieve technical documentation, best practices, and implementation guidelines relevant to this {language} snippet: {snippet}")
        };
        let guideline_query_vector = self.cached_query(&guideline_query_text).await;

        if options.cancel.is_cancelled() {
            return Ok(empty_bundle(&language, is_test_file));
        }

        let (pr_comments, guidelines, code_examples) = tokio::join!(
            self.degrade("pr_comments", options.cancel.clone(), self.retrieve_pr_comments(
                options.project_path,
                snippet_query_vector.as_ref(),
                is_test_file,
            )),
            self.degrade("documentation", options.cancel.clone(), self.retrieve_guidelines(
                options.project_path,
                guideline_query_vector.as_ref(),
                &snippet_context,
                snippet_passage_vector.as_ref(),
            )),
            self.degrade("code_exemplars", options.cancel.clone(), self.retrieve_code_examples(
                options.project_path,
                file_path,
                snippet_query_vector.as_ref(),
                is_test_file,
            )),
        );

        let pr_context_available = !pr_comments.is_empty();

        Ok(ContextBundle {
            code_examples,
            guidelines,
            pr_comments,
            metadata: ContextBundleMetadata { language, is_test_file, pr_context_available },
        })
    }

    async fn cached_passage(&self, text: &str) -> Option<Vector> {
        let key = content_key(text);
        if let Some(cached) = self.caches.get_passage(&key) {
            return Some(cached);
        }
        match self.embedder.embed_passage(text).await {
            Ok(Some(vector)) => {
                self.caches.put_passage(key, vector.clone());
                Some(vector)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("snippet passage embedding failed, H1 relevance disabled: {e}");
                None
            }
        }
    }

    async fn cached_query(&self, text: &str) -> Option<Vector> {
        let key = content_key(text);
        if let Some(cached) = self.caches.get_query(&key) {
            return Some(cached);
        }
        match self.embedder.embed_query(text).await {
            Ok(Some(vector)) => {
                self.caches.put_query(key, vector.clone());
                Some(vector)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("query embedding failed, branch will degrade to empty: {e}");
                None
            }
        }
    }

    async fn cached_h1(&self, doc_path: &str, title: &str) -> Option<Vector> {
        let key = format!("{doc_path}#{}", content_key(title));
        if let Some(cached) = self.caches.get_h1(&key) {
            return Some(cached);
        }
        match self.embedder.embed_passage(title).await {
            Ok(Some(vector)) => {
                self.caches.put_h1(&key, vector.clone());
                Some(vector)
            }
            _ => None,
        }
    }

    async fn cached_doc_context(&self, doc_path: &str, title: &str, samples: &[&str], language: &str) -> InferredContext {
        let title_hash = content_key(title);
        if let Some(cached) = self.caches.get_context(doc_path, &title_hash) {
            return cached;
        }
        let context = infer_context(
            doc_path,
            title,
            samples,
            language,
            self.config.area_confidence_floor,
            self.config.tech_threshold,
        );
        self.caches.put_context(doc_path, &title_hash, context.clone());
        context
    }

    /// Wraps a branch future so a panic-shaped error or timeout degrades to
    /// an empty list rather than failing `get_context` as a whole.
    async fn degrade<T: Default>(&self, label: &str, cancel: CancellationToken, fut: impl std::future::Future<Output = Result<T>>) -> T {
        tokio::select! {
            _ = cancel.cancelled() => T::default(),
            result = fut => match result {
                Ok(value) => value,
                Err(e) => {
                    warn!("{label} retrieval branch degraded to empty: {e}");
                    T::default()
                }
            },
        }
    }

    async fn retrieve_pr_comments(&self, project_path: &str, query_vector: Option<&Vector>, is_test_file: bool) -> Result<Vec<PrCommentView>> {
        let Some(query_vector) = query_vector else { return Ok(Vec::new()) };

        let options = SearchOptions::new(project_path, "", self.config.max_comments)
            .with_vector(query_vector)
            .with_floor(self.config.pr_similarity_threshold)
            .with_predicate(move |row: &StoredRow| is_test_file || !row.is_test_file);

        let hits = self.store.search(Table::PrComments, options).await?;
        let mut views = Vec::with_capacity(hits.len());
        for hit in hits {
            let Some(row) = self.store.get_row(Table::PrComments, &hit.id).await? else { continue };
            let Ok(record) = serde_json::from_str::<PrCommentRecord>(&row.extra_json) else { continue };
            views.push(PrCommentView {
                pr_number: record.pr_number,
                author: record.author,
                body: truncate_chars(&record.comment_text, 500),
                file_path: record.file_path,
                created_at: record.created_at,
                relevance_score: hit.score,
            });
        }
        Ok(views)
    }

    async fn retrieve_code_examples(&self, project_path: &str, file_path: &str, query_vector: Option<&Vector>, is_test_file: bool) -> Result<Vec<CodeExampleView>> {
        let Some(query_vector) = query_vector else { return Ok(Vec::new()) };

        let reviewed = relative_to_project(file_path, project_path);
        let options = SearchOptions::new(project_path, "", self.config.max_code_candidates)
            .with_vector(query_vector)
            .with_floor(self.config.code_candidate_floor)
            .with_predicate(move |row: &StoredRow| {
                if row.is_documentation || row.is_directory_structure {
                    return false;
                }
                if row.is_test_file != is_test_file {
                    return false;
                }
                match &row.path {
                    Some(path) => normalize_for_comparison(path) != reviewed,
                    None => true,
                }
            });

        let hits = self.store.search(Table::FileEmbeddings, options).await?;

        let mut by_path: HashMap<String, CodeExampleView> = HashMap::new();
        for hit in hits {
            let Some(row) = self.store.get_row(Table::FileEmbeddings, &hit.id).await? else { continue };
            let Ok(record) = serde_json::from_str::<FileEmbeddingRecord>(&row.extra_json) else { continue };
            let view = CodeExampleView {
                path: record.path.clone(),
                language: record.language,
                content: truncate_lines(&record.content, 300),
                similarity: hit.score,
            };
            by_path
                .entry(record.path)
                .and_modify(|existing| {
                    if view.similarity > existing.similarity {
                        *existing = view.clone();
                    }
                })
                .or_insert(view);
        }

        let mut examples: Vec<CodeExampleView> = by_path.into_values().collect();
        examples.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        examples.truncate(self.config.max_code_examples);
        Ok(examples)
    }

    async fn retrieve_guidelines(
        &self,
        project_path: &str,
        query_vector: Option<&Vector>,
        snippet_context: &InferredContext,
        snippet_passage_vector: Option<&Vector>,
    ) -> Result<Vec<GuidelineView>> {
        let Some(query_vector) = query_vector else { return Ok(Vec::new()) };

        let options = SearchOptions::new(project_path, "", self.config.max_doc_candidates)
            .with_vector(query_vector)
            .with_floor(self.config.doc_candidate_floor)
            .with_predicate(|row: &StoredRow| row.is_documentation);

        let hits = self.store.search(Table::DocumentChunkEmbeddings, options).await?;

        let mut by_document: HashMap<String, Vec<(f64, DocumentChunkRecord)>> = HashMap::new();
        for hit in hits {
            if hit.score < self.config.chunk_floor {
                continue;
            }
            let Some(row) = self.store.get_row(Table::DocumentChunkEmbeddings, &hit.id).await? else { continue };
            let Ok(record) = serde_json::from_str::<DocumentChunkRecord>(&row.extra_json) else { continue };
            by_document.entry(record.original_document_path.clone()).or_default().push((hit.score, record));
        }

        let mut scored_documents = Vec::new();
        for (doc_path, mut chunks) in by_document {
            chunks.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
            let scores: Vec<f64> = chunks.iter().map(|(s, _)| *s).collect();
            let max_score = scores.first().copied().unwrap_or(0.0);
            let avg_score = scores.iter().sum::<f64>() / scores.len().max(1) as f64;
            let semantic_quality = 0.5 * max_score + 0.3 * avg_score + 0.04 * (scores.len().min(5) as f64);

            let document_title = chunks[0].1.document_title.clone();
            let document_samples: Vec<&str> = chunks.iter().map(|(_, c)| c.content.as_str()).collect();
            let doc_context = self.cached_doc_context(&doc_path, &document_title, &document_samples, &chunks[0].1.language).await;

            let area_match = !snippet_context.area.is_trivial()
                && !doc_context.area.is_trivial()
                && snippet_context.area == doc_context.area;
            let tech_overlap = snippet_context.tech_overlap(&doc_context);

            let mut context_match = 0.0;
            if area_match {
                context_match += self.config.context_match_area_bonus;
                if tech_overlap {
                    context_match += self.config.context_match_tech_bonus;
                }
            } else if !snippet_context.area.is_general_js_ts() {
                context_match += self.config.context_mismatch_penalty;
            }

            let h1_vector = self.cached_h1(&doc_path, &document_title).await;
            let h1_relevance = match (snippet_passage_vector, h1_vector.as_ref()) {
                (Some(snippet), Some(h1)) => cosine_similarity(snippet.as_slice(), h1.as_slice()) as f64,
                _ => 0.0,
            };

            let generic = doc_context.is_general_purpose_readme_style || has_generic_filename(&doc_path);
            let snippet_is_devops = snippet_context.area == crate::models::Area::DevOps;
            let generic_penalty = if generic && !snippet_is_devops && context_match < 0.8 {
                self.config.generic_penalty
            } else {
                1.0
            };

            let score = (self.config.semantic_quality_weight * semantic_quality
                + self.config.context_match_weight * context_match
                + self.config.h1_relevance_weight * h1_relevance)
                * generic_penalty;

            let strong_mismatch = !area_match && !snippet_context.area.is_general_js_ts() && !tech_overlap;
            if score < self.config.doc_score_floor || strong_mismatch {
                continue;
            }

            let best_chunk = &chunks[0].1;
            scored_documents.push((
                score,
                GuidelineView {
                    path: doc_path.clone(),
                    language: best_chunk.language.clone(),
                    content: truncate_lines(&best_chunk.content, 400),
                    similarity: chunks[0].0,
                    heading_text: best_chunk.heading_text.clone(),
                    document_title: best_chunk.document_title.clone(),
                },
            ));
        }

        scored_documents.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap_or(std::cmp::Ordering::Equal));
        scored_documents.truncate(self.config.max_surviving_documents);
        Ok(scored_documents.into_iter().map(|(_, view)| view).collect())
    }
}

fn empty_bundle(language: &str, is_test_file: bool) -> ContextBundle {
    ContextBundle {
        code_examples: Vec::new(),
        guidelines: Vec::new(),
        pr_comments: Vec::new(),
        metadata: ContextBundleMetadata { language: language.to_string(), is_test_file, pr_context_available: false },
    }
}

fn content_key(text: &str) -> String {
    use md5::{Digest, Md5};
    format!("{:x}", Md5::digest(text.as_bytes()))
}

fn truncate_chars(text: &str, max: usize) -> String {
    if text.chars().count() <= max {
        text.to_string()
    } else {
        text.chars().take(max).collect()
    }
}

fn truncate_lines(text: &str, max_lines: usize) -> String {
    let lines: Vec<&str> = text.lines().collect();
    if lines.len() <= max_lines {
        text.to_string()
    } else {
        lines[..max_lines].join("\n")
    }
}

const GENERIC_DOC_FILENAMES: &[&str] = &["readme", "runbook", "contributing", "changelog", "license", "setup", "install"];

fn has_generic_filename(path: &str) -> bool {
    let filename = path.rsplit('/').next().unwrap_or(path).to_lowercase();
    let stem = filename.split('.').next().unwrap_or(&filename);
    GENERIC_DOC_FILENAMES.contains(&stem)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncate_lines_keeps_short_content_untouched() {
        let text = "a\nb\nc";
        assert_eq!(truncate_lines(text, 300), text);
    }

    #[test]
    fn truncate_lines_caps_long_content() {
        let text = (0..10).map(|i| i.to_string()).collect::<Vec<_>>().join("\n");
        let truncated = truncate_lines(&text, 3);
        assert_eq!(truncated, "0\n1\n2");
    }

    #[test]
    fn truncate_chars_respects_char_boundaries() {
        let text = "a".repeat(600);
        assert_eq!(truncate_chars(&text, 500).chars().count(), 500);
    }

    #[test]
    fn generic_filenames_are_recognized_case_insensitively() {
        assert!(has_generic_filename("README.md"));
        assert!(has_generic_filename("docs/RUNBOOK.md"));
        assert!(!has_generic_filename("docs/architecture.md"));
    }
}
