//! Persisted record types and the transient shapes that flow between
//! components: file embeddings, document chunks, PR comments, the
//! directory-structure snapshot, inferred context, and the assembled
//! context bundle returned to the Reviewer collaborator.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Dense embedding vector. Wrapped so `Debug` never dumps raw floats.
#[derive(Clone, Serialize, Deserialize, PartialEq)]
pub struct Vector(pub Vec<f32>);

impl Vector {
    pub fn dims(&self) -> usize {
        self.0.len()
    }

    pub fn as_slice(&self) -> &[f32] {
        &self.0
    }
}

impl fmt::Debug for Vector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Vector(dims={})", self.0.len())
    }
}

impl From<Vec<f32>> for Vector {
    fn from(v: Vec<f32>) -> Self {
        Vector(v)
    }
}

/// §3 "Inferred Context": `area` classification for a code blob or document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Area {
    Frontend,
    Backend,
    DevOps,
    Mobile,
    DataScience,
    ToolingInternal,
    GeneralTechnical,
    GeneralProjectDoc,
    GeneralJsTs,
    Unknown,
}

impl Area {
    /// `GeneralJS_TS` is exempt from the re-ranker's area-mismatch penalty.
    pub fn is_general_js_ts(&self) -> bool {
        matches!(self, Area::GeneralJsTs)
    }

    pub fn is_trivial(&self) -> bool {
        matches!(self, Area::Unknown | Area::GeneralTechnical | Area::GeneralProjectDoc)
    }
}

/// §3 "Inferred Context" (transient, memoised per document path / snippet).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InferredContext {
    pub area: Area,
    pub dominant_tech: Vec<String>,
    pub keywords: Vec<String>,
    pub is_general_purpose_readme_style: bool,
}

impl InferredContext {
    pub fn tech_overlap(&self, other: &InferredContext) -> bool {
        self.dominant_tech
            .iter()
            .any(|t| other.dominant_tech.iter().any(|o| o.eq_ignore_ascii_case(t)))
    }
}

/// §3 "File Embedding Record": one source/code file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileEmbeddingRecord {
    /// `relativePath#contentHash8`.
    pub id: String,
    pub path: String,
    pub project_path: String,
    pub name: String,
    pub language: String,
    pub content: String,
    pub content_hash: String,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub vector: Vector,
}

/// §3 "Document Chunk Record": one H2/H3 section (or the whole document).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentChunkRecord {
    /// `originalDocumentPath#slug(heading)_startLine`.
    pub id: String,
    pub original_document_path: String,
    pub project_path: String,
    pub heading_text: Option<String>,
    pub document_title: String,
    pub language: String,
    pub start_line_in_doc: usize,
    pub content: String,
    pub content_hash: String,
    pub last_modified: chrono::DateTime<chrono::Utc>,
    pub vector: Vector,
}

/// §3 "PR Comment Record": one human review comment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrCommentRecord {
    pub id: String,
    pub pr_number: u64,
    pub repository: String,
    pub project_path: String,
    pub comment_type: CommentType,
    pub comment_text: String,
    pub file_path: Option<String>,
    pub line_number: Option<u32>,
    pub line_range_start: Option<u32>,
    pub line_range_end: Option<u32>,
    pub original_code: Option<String>,
    pub suggested_code: Option<String>,
    pub diff_hunk: Option<String>,
    pub author: String,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub updated_at: chrono::DateTime<chrono::Utc>,
    pub review_id: Option<String>,
    pub review_state: Option<String>,
    pub issue_category: Option<String>,
    pub severity: Option<String>,
    pub pattern_tags: Vec<String>,
    pub comment_embedding: Vector,
    pub code_embedding: Option<Vector>,
    /// Used for retrieval; never null by invariant.
    pub combined_embedding: Vector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommentType {
    Inline,
    Review,
    Issue,
}

/// §3 "Directory Structure Record": at most one per project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DirectoryStructureRecord {
    pub id: String,
    pub project_path: String,
    pub content: String,
    pub vector: Vector,
    pub last_modified: chrono::DateTime<chrono::Utc>,
}

impl DirectoryStructureRecord {
    pub fn id_for_project(project_name: &str) -> String {
        format!("__project_structure__{project_name}")
    }
}

/// §9 "ad-hoc polymorphism of candidates": shared capability set across
/// the three record kinds a search can surface, without erasing the
/// variant into a generic record.
pub trait RetrievalCandidate {
    fn candidate_path(&self) -> Option<&str>;
    fn candidate_score(&self) -> f64;
    fn candidate_content(&self) -> &str;
}

/// Tagged sum of the three searchable record kinds, carrying a fused
/// hybrid score alongside the underlying record.
#[derive(Debug, Clone)]
pub enum RetrievedItem {
    Code { record: FileEmbeddingRecord, score: f64 },
    Doc { record: DocumentChunkRecord, score: f64 },
    Comment { record: PrCommentRecord, score: f64 },
}

impl RetrievalCandidate for RetrievedItem {
    fn candidate_path(&self) -> Option<&str> {
        match self {
            RetrievedItem::Code { record, .. } => Some(&record.path),
            RetrievedItem::Doc { record, .. } => Some(&record.original_document_path),
            RetrievedItem::Comment { record, .. } => record.file_path.as_deref(),
        }
    }

    fn candidate_score(&self) -> f64 {
        match self {
            RetrievedItem::Code { score, .. } => *score,
            RetrievedItem::Doc { score, .. } => *score,
            RetrievedItem::Comment { score, .. } => *score,
        }
    }

    fn candidate_content(&self) -> &str {
        match self {
            RetrievedItem::Code { record, .. } => &record.content,
            RetrievedItem::Doc { record, .. } => &record.content,
            RetrievedItem::Comment { record, .. } => &record.comment_text,
        }
    }
}

/// §6.2: one code exemplar as surfaced to the Reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CodeExampleView {
    pub path: String,
    pub language: String,
    pub content: String,
    pub similarity: f64,
}

/// §6.2: one documentation guideline snippet as surfaced to the Reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GuidelineView {
    pub path: String,
    pub language: String,
    pub content: String,
    pub similarity: f64,
    pub heading_text: Option<String>,
    pub document_title: String,
}

/// §6.2: one PR comment as surfaced to the Reviewer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrCommentView {
    pub pr_number: u64,
    pub author: String,
    /// Truncated to 500 characters per §6.2.
    pub body: String,
    pub file_path: Option<String>,
    pub created_at: chrono::DateTime<chrono::Utc>,
    pub relevance_score: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundleMetadata {
    pub language: String,
    pub is_test_file: bool,
    pub pr_context_available: bool,
}

/// §4.6 step 5: the final assembled retrieval result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContextBundle {
    pub code_examples: Vec<CodeExampleView>,
    pub guidelines: Vec<GuidelineView>,
    pub pr_comments: Vec<PrCommentView>,
    pub metadata: ContextBundleMetadata,
}

/// §4.7: the unified result of aggregating one `ContextBundle` per PR file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnifiedBundle {
    pub code_examples: Vec<CodeExampleView>,
    pub guidelines: Vec<GuidelineView>,
    pub pr_comments: Vec<PrCommentView>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vector_debug_never_prints_floats() {
        let v = Vector(vec![0.1, 0.2, 0.3]);
        let debug = format!("{v:?}");
        assert!(!debug.contains("0.1"));
        assert!(debug.contains("dims=3"));
    }

    #[test]
    fn directory_structure_id_matches_convention() {
        assert_eq!(
            DirectoryStructureRecord::id_for_project("care-engine"),
            "__project_structure__care-engine"
        );
    }

    #[test]
    fn retrieved_item_exposes_uniform_capability_set() {
        let record = FileEmbeddingRecord {
            id: "a#00000000".into(),
            path: "src/main.rs".into(),
            project_path: "/tmp/p".into(),
            name: "main.rs".into(),
            language: "rust".into(),
            content: "fn main() {}".into(),
            content_hash: "00000000".into(),
            last_modified: chrono::Utc::now(),
            vector: Vector(vec![0.0; 4]),
        };
        let item = RetrievedItem::Code { record, score: 0.75 };
        assert_eq!(item.candidate_path(), Some("src/main.rs"));
        assert_eq!(item.candidate_score(), 0.75);
        assert_eq!(item.candidate_content(), "fn main() {}");
    }
}
