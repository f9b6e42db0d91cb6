//! §4.7 PR Context Aggregator: fans `get_context` out across every file in
//! a pull request (bounded parallelism) and merges the three channels into
//! one [`UnifiedBundle`], keeping the maximum score on key collisions.

use crate::config::AggregatorConfig;
use crate::error::Result;
use crate::models::{CodeExampleView, GuidelineView, PrCommentView, UnifiedBundle};
use crate::retriever::{ContextRetriever, RetrieverOptions};

use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::warn;

#[derive(Debug, Clone)]
pub struct PrFile {
    pub path: String,
    pub content: String,
    pub is_test_file_override: Option<bool>,
}

pub struct PrAggregator {
    retriever: Arc<ContextRetriever>,
    config: AggregatorConfig,
}

impl PrAggregator {
    pub fn new(retriever: Arc<ContextRetriever>, config: AggregatorConfig) -> Self {
        Self { retriever, config }
    }

    /// Invokes `get_context` once per file, bounded to `config.parallelism`
    /// concurrent invocations. Never mutates `files` — each `PrFile` is
    /// cloned into its own task.
    pub async fn gather_unified_context_for_pr(&self, project_path: &str, files: &[PrFile]) -> Result<UnifiedBundle> {
        let semaphore = Arc::new(Semaphore::new(self.config.parallelism.max(1)));
        let cancel = CancellationToken::new();
        let project_path = project_path.to_string();

        let mut tasks = JoinSet::new();
        for file in files {
            let file = file.clone();
            let retriever = Arc::clone(&self.retriever);
            let semaphore = Arc::clone(&semaphore);
            let cancel = cancel.clone();
            let project_path = project_path.clone();

            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.expect("semaphore closed");
                let options = RetrieverOptions { project_path: &project_path, is_test_file_override: file.is_test_file_override, cancel };
                match retriever.get_context(&file.path, &file.content, options).await {
                    Ok(bundle) => Some(bundle),
                    Err(e) => {
                        warn!("getContext failed for {}, excluding it from the PR bundle: {e}", file.path);
                        None
                    }
                }
            });
        }

        let mut bundles = Vec::with_capacity(files.len());
        while let Some(result) = tasks.join_next().await {
            if let Ok(Some(bundle)) = result {
                bundles.push(bundle);
            }
        }

        let mut code_by_path: HashMap<String, CodeExampleView> = HashMap::new();
        let mut guidelines_by_key: HashMap<(String, Option<String>), GuidelineView> = HashMap::new();
        let mut comments_by_pr: HashMap<u64, PrCommentView> = HashMap::new();

        for bundle in bundles {
            for example in bundle.code_examples {
                merge_max(&mut code_by_path, example.path.clone(), example, |v| v.similarity);
            }
            for guideline in bundle.guidelines {
                let key = (guideline.path.clone(), guideline.heading_text.clone());
                merge_max(&mut guidelines_by_key, key, guideline, |v| v.similarity);
            }
            for comment in bundle.pr_comments {
                merge_max(&mut comments_by_pr, comment.pr_number, comment, |v| v.relevance_score);
            }
        }

        let mut code_examples: Vec<CodeExampleView> = code_by_path.into_values().collect();
        code_examples.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        code_examples.truncate(self.config.code_cap);

        let mut guidelines: Vec<GuidelineView> = guidelines_by_key.into_values().collect();
        guidelines.sort_by(|a, b| b.similarity.partial_cmp(&a.similarity).unwrap_or(std::cmp::Ordering::Equal));
        guidelines.truncate(self.config.guideline_cap);

        let mut pr_comments: Vec<PrCommentView> = comments_by_pr.into_values().collect();
        pr_comments.sort_by(|a, b| b.relevance_score.partial_cmp(&a.relevance_score).unwrap_or(std::cmp::Ordering::Equal));
        pr_comments.truncate(self.config.comment_cap);

        Ok(UnifiedBundle { code_examples, guidelines, pr_comments })
    }
}

fn merge_max<K: std::hash::Hash + Eq, V>(map: &mut HashMap<K, V>, key: K, value: V, score: impl Fn(&V) -> f64) {
    match map.get(&key) {
        Some(existing) if score(existing) >= score(&value) => {}
        _ => {
            map.insert(key, value);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn merge_max_keeps_the_higher_scoring_entry() {
        let mut map: HashMap<&str, (f64, &str)> = HashMap::new();
        merge_max(&mut map, "a", (0.5, "low"), |v| v.0);
        merge_max(&mut map, "a", (0.9, "high"), |v| v.0);
        merge_max(&mut map, "a", (0.2, "ignored"), |v| v.0);
        assert_eq!(map.get("a").unwrap().1, "high");
    }
}
