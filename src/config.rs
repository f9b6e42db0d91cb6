//! Configuration for the CARE engine.
//!
//! Configured via a TOML file, mirroring the recognised CLI/configuration
//! surface: project root and exclusion rules, on-disk store locations,
//! embedding provider settings, and the re-ranking/aggregation tunables.
//! Every field has a default so a bare `[project]` section (or an empty
//! file) still loads.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    #[serde(default)]
    pub project: ProjectConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub aggregator: AggregatorConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            project: ProjectConfig::default(),
            store: StoreConfig::default(),
            embedding: EmbeddingConfig::default(),
            retrieval: RetrievalConfig::default(),
            aggregator: AggregatorConfig::default(),
        }
    }
}

/// §6.4: the project-isolation and exclusion surface.
#[derive(Debug, Deserialize, Clone)]
pub struct ProjectConfig {
    #[serde(default = "default_project_path")]
    pub path: PathBuf,
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    #[serde(default = "default_true")]
    pub respect_gitignore: bool,
    #[serde(default)]
    pub include_project_structure: bool,
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            path: default_project_path(),
            exclude_patterns: Vec::new(),
            respect_gitignore: true,
            include_project_structure: false,
        }
    }
}

fn default_project_path() -> PathBuf {
    std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
}

fn default_true() -> bool {
    true
}

/// §6.1: on-disk layout, overridable per §6.1.
#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_dir")]
    pub data_dir: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            data_dir: default_store_dir(),
        }
    }
}

fn default_store_dir() -> PathBuf {
    dirs_home().join(".ai-review-lancedb")
}

fn dirs_home() -> PathBuf {
    std::env::var_os("HOME")
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from("."))
}

/// §4.1: embedding provider selection and retry policy.
#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,
    #[serde(default = "default_passage_cache_size")]
    pub passage_cache_size: usize,
    #[serde(default = "default_query_cache_size")]
    pub query_cache_size: usize,
    #[serde(default = "default_h1_cache_size")]
    pub h1_cache_size: usize,
    #[serde(default = "default_context_cache_size")]
    pub context_cache_size: usize,
    /// Only consulted by the `ollama` provider; defaults to localhost.
    #[serde(default)]
    pub ollama_url: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            dims: default_dims(),
            batch_size: default_batch_size(),
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
            cache_dir: default_cache_dir(),
            passage_cache_size: default_passage_cache_size(),
            query_cache_size: default_query_cache_size(),
            h1_cache_size: default_h1_cache_size(),
            context_cache_size: default_context_cache_size(),
            ollama_url: None,
        }
    }
}

fn default_provider() -> String {
    "local".to_string()
}
fn default_model() -> String {
    "all-minilm-l6-v2".to_string()
}
fn default_dims() -> usize {
    384
}
fn default_batch_size() -> usize {
    64
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    30
}
fn default_cache_dir() -> PathBuf {
    dirs_home().join(".ai-review-fastembed-cache")
}
fn default_passage_cache_size() -> usize {
    1_000
}
fn default_query_cache_size() -> usize {
    1_000
}
fn default_h1_cache_size() -> usize {
    1_000
}
fn default_context_cache_size() -> usize {
    500
}

/// §4.6/§9: the re-ranker's weighting constants, exposed as tunables per
/// the "Open Questions" note that these should not be hardcoded.
#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_max_comments")]
    pub max_comments: usize,
    #[serde(default = "default_pr_similarity_threshold")]
    pub pr_similarity_threshold: f64,
    #[serde(default = "default_pr_timeout_secs")]
    pub pr_timeout_secs: u64,
    #[serde(default = "default_doc_candidate_floor")]
    pub doc_candidate_floor: f64,
    #[serde(default = "default_code_candidate_floor")]
    pub code_candidate_floor: f64,
    #[serde(default = "default_chunk_floor")]
    pub chunk_floor: f64,
    #[serde(default = "default_doc_score_floor")]
    pub doc_score_floor: f64,
    #[serde(default = "default_area_confidence_floor")]
    pub area_confidence_floor: f64,
    #[serde(default = "default_tech_threshold")]
    pub tech_threshold: f64,
    #[serde(default = "default_semantic_quality_weight")]
    pub semantic_quality_weight: f64,
    #[serde(default = "default_context_match_weight")]
    pub context_match_weight: f64,
    #[serde(default = "default_h1_relevance_weight")]
    pub h1_relevance_weight: f64,
    #[serde(default = "default_context_match_bonus")]
    pub context_match_area_bonus: f64,
    #[serde(default = "default_context_match_tech_bonus")]
    pub context_match_tech_bonus: f64,
    #[serde(default = "default_context_mismatch_penalty")]
    pub context_mismatch_penalty: f64,
    #[serde(default = "default_generic_penalty")]
    pub generic_penalty: f64,
    #[serde(default = "default_max_code_examples")]
    pub max_code_examples: usize,
    #[serde(default = "default_max_guidelines")]
    pub max_guidelines: usize,
    #[serde(default = "default_max_doc_candidates")]
    pub max_doc_candidates: usize,
    #[serde(default = "default_max_code_candidates")]
    pub max_code_candidates: usize,
    #[serde(default = "default_max_surviving_documents")]
    pub max_surviving_documents: usize,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            max_comments: default_max_comments(),
            pr_similarity_threshold: default_pr_similarity_threshold(),
            pr_timeout_secs: default_pr_timeout_secs(),
            doc_candidate_floor: default_doc_candidate_floor(),
            code_candidate_floor: default_code_candidate_floor(),
            chunk_floor: default_chunk_floor(),
            doc_score_floor: default_doc_score_floor(),
            area_confidence_floor: default_area_confidence_floor(),
            tech_threshold: default_tech_threshold(),
            semantic_quality_weight: default_semantic_quality_weight(),
            context_match_weight: default_context_match_weight(),
            h1_relevance_weight: default_h1_relevance_weight(),
            context_match_area_bonus: default_context_match_bonus(),
            context_match_tech_bonus: default_context_match_tech_bonus(),
            context_mismatch_penalty: default_context_mismatch_penalty(),
            generic_penalty: default_generic_penalty(),
            max_code_examples: default_max_code_examples(),
            max_guidelines: default_max_guidelines(),
            max_doc_candidates: default_max_doc_candidates(),
            max_code_candidates: default_max_code_candidates(),
            max_surviving_documents: default_max_surviving_documents(),
        }
    }
}

fn default_max_comments() -> usize {
    50
}
fn default_pr_similarity_threshold() -> f64 {
    0.3
}
fn default_pr_timeout_secs() -> u64 {
    300
}
fn default_doc_candidate_floor() -> f64 {
    0.05
}
fn default_code_candidate_floor() -> f64 {
    0.3
}
fn default_chunk_floor() -> f64 {
    0.1
}
fn default_doc_score_floor() -> f64 {
    0.3
}
fn default_area_confidence_floor() -> f64 {
    3.5
}
fn default_tech_threshold() -> f64 {
    1.8
}
fn default_semantic_quality_weight() -> f64 {
    0.2
}
fn default_context_match_weight() -> f64 {
    0.6
}
fn default_h1_relevance_weight() -> f64 {
    0.2
}
fn default_context_match_bonus() -> f64 {
    0.8
}
fn default_context_match_tech_bonus() -> f64 {
    0.2
}
fn default_context_mismatch_penalty() -> f64 {
    -0.2
}
fn default_generic_penalty() -> f64 {
    0.7
}
fn default_max_code_examples() -> usize {
    8
}
fn default_max_guidelines() -> usize {
    4
}
fn default_max_doc_candidates() -> usize {
    100
}
fn default_max_code_candidates() -> usize {
    40
}
fn default_max_surviving_documents() -> usize {
    4
}

/// §4.7: ceilings applied when merging per-file bundles across a PR.
#[derive(Debug, Deserialize, Clone)]
pub struct AggregatorConfig {
    #[serde(default = "default_agg_code_cap")]
    pub code_cap: usize,
    #[serde(default = "default_agg_guideline_cap")]
    pub guideline_cap: usize,
    #[serde(default = "default_agg_comment_cap")]
    pub comment_cap: usize,
    #[serde(default = "default_parallelism")]
    pub parallelism: usize,
}

impl Default for AggregatorConfig {
    fn default() -> Self {
        Self {
            code_cap: default_agg_code_cap(),
            guideline_cap: default_agg_guideline_cap(),
            comment_cap: default_agg_comment_cap(),
            parallelism: default_parallelism(),
        }
    }
}

fn default_agg_code_cap() -> usize {
    40
}
fn default_agg_guideline_cap() -> usize {
    100
}
fn default_agg_comment_cap() -> usize {
    40
}
fn default_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;
    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.embedding.dims == 0 {
        anyhow::bail!("embedding.dims must be > 0");
    }
    if config.retrieval.pr_similarity_threshold < 0.0 || config.retrieval.pr_similarity_threshold > 1.0 {
        anyhow::bail!("retrieval.pr_similarity_threshold must be in [0.0, 1.0]");
    }
    match config.embedding.provider.as_str() {
        "local" | "openai" | "ollama" | "disabled" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be local, openai, ollama, or disabled.",
            other
        ),
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_internally_consistent() {
        let config = Config::default();
        assert!(validate(&config).is_ok());
        assert_eq!(config.embedding.dims, 384);
        assert_eq!(config.retrieval.max_code_examples, 8);
    }

    #[test]
    fn rejects_unknown_provider() {
        let mut config = Config::default();
        config.embedding.provider = "bogus".to_string();
        assert!(validate(&config).is_err());
    }

    #[test]
    fn rejects_out_of_range_threshold() {
        let mut config = Config::default();
        config.retrieval.pr_similarity_threshold = 1.5;
        assert!(validate(&config).is_err());
    }
}
