//! Local inference via fastembed: models download once from Hugging Face
//! and are cached at `EmbeddingConfig::cache_dir`; no network calls after
//! that. Model construction is guarded by a one-shot coalescing latch per
//! §5 so concurrent first-time callers trigger exactly one load.

use super::{is_blank, prefixed, EmbedKind, EmbeddingProvider, ProviderCounters, MAX_INIT_RETRIES};
use crate::config::EmbeddingConfig;
use crate::models::Vector;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, OnceCell};

pub struct LocalProvider {
    model_name: String,
    dims: usize,
    batch_size: usize,
    handle: OnceCell<Arc<Mutex<fastembed::TextEmbedding>>>,
    poisoned: AtomicBool,
    model_loads: AtomicU64,
    passage_embeds: AtomicU64,
    query_embeds: AtomicU64,
}

impl LocalProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let (model_name, dims) = resolve_local_model(config);
        Ok(Self {
            model_name,
            dims,
            batch_size: config.batch_size,
            handle: OnceCell::new(),
            poisoned: AtomicBool::new(false),
            model_loads: AtomicU64::new(0),
            passage_embeds: AtomicU64::new(0),
            query_embeds: AtomicU64::new(0),
        })
    }

    async fn ensure_model(&self) -> Result<Arc<Mutex<fastembed::TextEmbedding>>> {
        if self.poisoned.load(Ordering::Acquire) {
            bail!(
                "local embedding model '{}' failed to initialize after {} attempts",
                self.model_name,
                MAX_INIT_RETRIES
            );
        }

        let model_name = self.model_name.clone();
        let result = self
            .handle
            .get_or_try_init(|| async {
                self.model_loads.fetch_add(1, Ordering::Relaxed);
                load_with_retries(&model_name).await
            })
            .await;

        match result {
            Ok(handle) => Ok(handle.clone()),
            Err(e) => {
                self.poisoned.store(true, Ordering::Release);
                Err(e)
            }
        }
    }

    async fn embed_many(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Option<Vector>>> {
        let mut non_blank = Vec::new();
        let mut positions = Vec::new();
        for (i, t) in texts.iter().enumerate() {
            if !is_blank(t) {
                non_blank.push(prefixed(t, kind));
                positions.push(i);
            }
        }

        let mut result = vec![None; texts.len()];
        if non_blank.is_empty() {
            return Ok(result);
        }

        let handle = self.ensure_model().await?;
        let batch_size = self.batch_size;
        let embeddings = tokio::task::spawn_blocking(move || {
            let handle = handle.blocking_lock();
            handle
                .embed(non_blank, Some(batch_size))
                .map_err(|e| anyhow::anyhow!("local embedding failed: {e}"))
        })
        .await??;

        if embeddings.len() != positions.len() {
            bail!(
                "local embedding returned {} vectors for {} inputs",
                embeddings.len(),
                positions.len()
            );
        }
        for (pos, vec) in positions.into_iter().zip(embeddings.into_iter()) {
            result[pos] = Some(Vector(vec));
        }
        Ok(result)
    }
}

#[async_trait]
impl EmbeddingProvider for LocalProvider {
    fn model_name(&self) -> &str {
        &self.model_name
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed_passage(&self, text: &str) -> Result<Option<Vector>> {
        self.passage_embeds.fetch_add(1, Ordering::Relaxed);
        Ok(self.embed_many(&[text.to_string()], EmbedKind::Passage).await?.remove(0))
    }

    async fn embed_query(&self, text: &str) -> Result<Option<Vector>> {
        self.query_embeds.fetch_add(1, Ordering::Relaxed);
        Ok(self.embed_many(&[text.to_string()], EmbedKind::Query).await?.remove(0))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vector>>> {
        self.passage_embeds.fetch_add(texts.len() as u64, Ordering::Relaxed);
        self.embed_many(texts, EmbedKind::Passage).await
    }

    fn counters(&self) -> ProviderCounters {
        ProviderCounters {
            model_loads: self.model_loads.load(Ordering::Relaxed),
            passage_embeds: self.passage_embeds.load(Ordering::Relaxed),
            query_embeds: self.query_embeds.load(Ordering::Relaxed),
        }
    }
}

/// Up to 3 attempts with linear backoff (1s, 2s, 3s between attempts).
async fn load_with_retries(model_name: &str) -> Result<Arc<Mutex<fastembed::TextEmbedding>>> {
    let fastembed_model = config_to_fastembed_model(model_name)?;
    let mut last_err = None;

    for attempt in 0..MAX_INIT_RETRIES {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_secs(attempt as u64)).await;
        }

        let model_name = model_name.to_string();
        let built = tokio::task::spawn_blocking(move || {
            let _ = &model_name;
            fastembed::TextEmbedding::try_new(
                fastembed::InitOptions::new(fastembed_model).with_show_download_progress(true),
            )
        })
        .await;

        match built {
            Ok(Ok(model)) => return Ok(Arc::new(Mutex::new(model))),
            Ok(Err(e)) => last_err = Some(anyhow::anyhow!("failed to initialize local embedding model: {e}")),
            Err(e) => last_err = Some(anyhow::anyhow!("local embedding model init task panicked: {e}")),
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("local embedding model failed to initialize")))
}

fn resolve_local_model(config: &EmbeddingConfig) -> (String, usize) {
    let model_name = config.model.clone();
    let dims = match model_name.as_str() {
        "all-minilm-l6-v2" => 384,
        "bge-small-en-v1.5" => 384,
        "bge-base-en-v1.5" => 768,
        "bge-large-en-v1.5" => 1024,
        "nomic-embed-text-v1" | "nomic-embed-text-v1.5" => 768,
        "multilingual-e5-small" => 384,
        "multilingual-e5-base" => 768,
        "multilingual-e5-large" => 1024,
        _ => config.dims,
    };
    (model_name, dims)
}

fn config_to_fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV1),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        "multilingual-e5-small" => Ok(fastembed::EmbeddingModel::MultilingualE5Small),
        "multilingual-e5-base" => Ok(fastembed::EmbeddingModel::MultilingualE5Base),
        "multilingual-e5-large" => Ok(fastembed::EmbeddingModel::MultilingualE5Large),
        other => bail!(
            "unknown local embedding model: '{other}'. Supported: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1, \
             nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base, \
             multilingual-e5-large"
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_model_dims() {
        let mut config = EmbeddingConfig::default();
        config.model = "bge-base-en-v1.5".to_string();
        let (name, dims) = resolve_local_model(&config);
        assert_eq!(name, "bge-base-en-v1.5");
        assert_eq!(dims, 768);
    }

    #[test]
    fn rejects_unknown_model_name() {
        assert!(config_to_fastembed_model("not-a-real-model").is_err());
    }

    /// §5/§8 invariant 8: N concurrent first-time callers of the same
    /// `OnceCell` trigger exactly one init, the same primitive `ensure_model`
    /// is built on.
    #[tokio::test]
    async fn once_cell_coalesces_concurrent_first_callers() {
        let cell: Arc<OnceCell<u32>> = Arc::new(OnceCell::new());
        let loads = Arc::new(AtomicU64::new(0));

        let mut handles = Vec::new();
        for _ in 0..16 {
            let cell = cell.clone();
            let loads = loads.clone();
            handles.push(tokio::spawn(async move {
                *cell
                    .get_or_init(|| async {
                        loads.fetch_add(1, Ordering::Relaxed);
                        tokio::time::sleep(Duration::from_millis(5)).await;
                        42
                    })
                    .await
            }));
        }

        for handle in handles {
            assert_eq!(handle.await.unwrap(), 42);
        }
        assert_eq!(loads.load(Ordering::Relaxed), 1);
    }
}
