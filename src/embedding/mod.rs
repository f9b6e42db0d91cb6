//! Embedding provider abstraction and implementations.
//!
//! Defines the [`EmbeddingProvider`] trait and concrete backends:
//! - **[`DisabledProvider`]** — returns errors; used when embeddings are not configured.
//! - **[`OpenAIProvider`]** / **[`OllamaProvider`]** — remote backends, kept as
//!   alternates to the default local path (batching, retry, backoff).
//! - **[`LocalProvider`]** — the default production path: a fastembed model
//!   loaded once per process behind a coalescing latch.
//!
//! The retrieval model is asymmetric (BGE-style): `embed_passage` and
//! `embed_query` are distinct operations, not aliases of one another —
//! mixing them degrades recall. Also exposes BLOB (de)serialization and
//! cosine similarity shared with the vector store.

#[cfg(feature = "local-embeddings-fastembed")]
mod local;
pub mod cache;

pub use cache::{CacheRegistry, CacheRegistryStats, CacheStats};

use crate::config::EmbeddingConfig;
use crate::models::Vector;
use anyhow::{bail, Result};
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

const MAX_INIT_RETRIES: u32 = 3;
/// BGE-style asymmetric query prefix; the passage side uses no prefix.
const QUERY_PREFIX: &str = "query: ";

/// One embedding request kind, used only to pick the asymmetric prefix —
/// the wire format and retry path are otherwise identical.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum EmbedKind {
    Passage,
    Query,
}

#[async_trait]
pub trait EmbeddingProvider: Send + Sync {
    fn model_name(&self) -> &str;
    fn dims(&self) -> usize;

    async fn embed_passage(&self, text: &str) -> Result<Option<Vector>>;
    async fn embed_query(&self, text: &str) -> Result<Option<Vector>>;

    /// One-to-one aligned with `texts`; empty/whitespace entries yield
    /// `None` at their position without being sent to the model.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Option<Vector>>>;

    /// Snapshot of observability counters (model loads, embed calls per kind).
    fn counters(&self) -> ProviderCounters {
        ProviderCounters::default()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProviderCounters {
    pub model_loads: u64,
    pub passage_embeds: u64,
    pub query_embeds: u64,
}

fn is_blank(text: &str) -> bool {
    text.trim().is_empty()
}

fn prefixed(text: &str, kind: EmbedKind) -> String {
    match kind {
        EmbedKind::Passage => text.to_string(),
        EmbedKind::Query => format!("{QUERY_PREFIX}{text}"),
    }
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl EmbeddingProvider for DisabledProvider {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed_passage(&self, _text: &str) -> Result<Option<Vector>> {
        bail!("embedding provider is disabled")
    }
    async fn embed_query(&self, _text: &str) -> Result<Option<Vector>> {
        bail!("embedding provider is disabled")
    }
    async fn embed_batch(&self, _texts: &[String]) -> Result<Vec<Option<Vector>>> {
        bail!("embedding provider is disabled")
    }
}

// ============ Remote retry/backoff helper ============

/// Exponential backoff shared by the remote providers: 1s, 2s, 4s, 8s, 16s,
/// 32s (capped), retrying on 429/5xx/network errors, failing fast on other
/// 4xx responses.
async fn post_with_retry(
    client: &reqwest::Client,
    url: &str,
    headers: &[(&str, String)],
    body: &serde_json::Value,
    max_retries: u32,
) -> Result<serde_json::Value> {
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = Duration::from_secs(1 << (attempt - 1).min(5));
            tokio::time::sleep(delay).await;
        }

        let mut req = client.post(url).header("Content-Type", "application/json");
        for (k, v) in headers {
            req = req.header(*k, v.clone());
        }

        match req.json(body).send().await {
            Ok(response) => {
                let status = response.status();
                if status.is_success() {
                    return Ok(response.json().await?);
                }
                if status.as_u16() == 429 || status.is_server_error() {
                    let text = response.text().await.unwrap_or_default();
                    last_err = Some(anyhow::anyhow!("API error {status}: {text}"));
                    continue;
                }
                let text = response.text().await.unwrap_or_default();
                bail!("API error {status}: {text}");
            }
            Err(e) => {
                last_err = Some(e.into());
                continue;
            }
        }
    }

    Err(last_err.unwrap_or_else(|| anyhow::anyhow!("embedding request failed after retries")))
}

// ============ OpenAI Provider ============

pub struct OpenAIProvider {
    model: String,
    dims: usize,
    max_retries: u32,
    timeout_secs: u64,
    query_embeds: AtomicU64,
    passage_embeds: AtomicU64,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        if std::env::var("OPENAI_API_KEY").is_err() {
            bail!("OPENAI_API_KEY environment variable not set");
        }
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            query_embeds: AtomicU64::new(0),
            passage_embeds: AtomicU64::new(0),
        })
    }

    async fn embed_many(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Option<Vector>>> {
        embed_remote_openai_shaped(
            &self.model,
            self.timeout_secs,
            self.max_retries,
            "https://api.openai.com/v1/embeddings",
            texts,
            kind,
            |json| parse_indexed_embeddings(json, "data", "embedding"),
            Some(("Authorization", format!("Bearer {}", std::env::var("OPENAI_API_KEY").unwrap_or_default()))),
        )
        .await
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
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
            model_loads: 0,
            passage_embeds: self.passage_embeds.load(Ordering::Relaxed),
            query_embeds: self.query_embeds.load(Ordering::Relaxed),
        }
    }
}

// ============ Ollama Provider ============

pub struct OllamaProvider {
    model: String,
    dims: usize,
    url: String,
    max_retries: u32,
    timeout_secs: u64,
    query_embeds: AtomicU64,
    passage_embeds: AtomicU64,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model: config.model.clone(),
            dims: config.dims,
            url: config.ollama_url.clone().unwrap_or_else(|| "http://localhost:11434".to_string()),
            max_retries: config.max_retries,
            timeout_secs: config.timeout_secs,
            query_embeds: AtomicU64::new(0),
            passage_embeds: AtomicU64::new(0),
        })
    }

    async fn embed_many(&self, texts: &[String], kind: EmbedKind) -> Result<Vec<Option<Vector>>> {
        let endpoint = format!("{}/api/embed", self.url);
        embed_remote_openai_shaped(
            &self.model,
            self.timeout_secs,
            self.max_retries,
            &endpoint,
            texts,
            kind,
            |json| parse_plain_embeddings(json, "embeddings"),
            None,
        )
        .await
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
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
            model_loads: 0,
            passage_embeds: self.passage_embeds.load(Ordering::Relaxed),
            query_embeds: self.query_embeds.load(Ordering::Relaxed),
        }
    }
}

/// Shared request/response shape for the two remote providers: skip blank
/// inputs locally, prefix the rest per `kind`, POST with retry, re-splice
/// `None` back into the blank positions so the response stays index-aligned.
#[allow(clippy::too_many_arguments)]
async fn embed_remote_openai_shaped(
    model: &str,
    timeout_secs: u64,
    max_retries: u32,
    url: &str,
    texts: &[String],
    kind: EmbedKind,
    parse: impl Fn(&serde_json::Value) -> Result<Vec<Vec<f32>>>,
    auth_header: Option<(&str, String)>,
) -> Result<Vec<Option<Vector>>> {
    let mut non_blank_texts = Vec::new();
    let mut positions = Vec::new();
    for (i, t) in texts.iter().enumerate() {
        if !is_blank(t) {
            non_blank_texts.push(prefixed(t, kind));
            positions.push(i);
        }
    }

    let mut result = vec![None; texts.len()];
    if non_blank_texts.is_empty() {
        return Ok(result);
    }

    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    let body = serde_json::json!({ "model": model, "input": non_blank_texts });
    let headers: Vec<(&str, String)> = auth_header.into_iter().collect();

    let json = post_with_retry(&client, url, &headers, &body, max_retries).await?;
    let embeddings = parse(&json)?;
    if embeddings.len() != positions.len() {
        bail!("embedding response length mismatch: expected {}, got {}", positions.len(), embeddings.len());
    }

    for (pos, vec) in positions.into_iter().zip(embeddings.into_iter()) {
        result[pos] = Some(Vector(vec));
    }
    Ok(result)
}

fn parse_indexed_embeddings(json: &serde_json::Value, outer_key: &str, inner_key: &str) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get(outer_key)
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing {outer_key}"))?;
    data.iter()
        .map(|item| {
            let arr = item
                .get(inner_key)
                .and_then(|e| e.as_array())
                .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing {inner_key}"))?;
            Ok(arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        })
        .collect()
}

fn parse_plain_embeddings(json: &serde_json::Value, key: &str) -> Result<Vec<Vec<f32>>> {
    let data = json
        .get(key)
        .and_then(|d| d.as_array())
        .ok_or_else(|| anyhow::anyhow!("invalid embedding response: missing {key}"))?;
    data.iter()
        .map(|item| {
            let arr = item
                .as_array()
                .ok_or_else(|| anyhow::anyhow!("invalid embedding response: entry is not an array"))?;
            Ok(arr.iter().map(|v| v.as_f64().unwrap_or(0.0) as f32).collect())
        })
        .collect()
}

// ============ Local Provider ============

#[cfg(feature = "local-embeddings-fastembed")]
pub use local::LocalProvider;

/// Create the configured [`EmbeddingProvider`].
pub fn create_provider(config: &EmbeddingConfig) -> Result<std::sync::Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "disabled" => Ok(std::sync::Arc::new(DisabledProvider)),
        "openai" => Ok(std::sync::Arc::new(OpenAIProvider::new(config)?)),
        "ollama" => Ok(std::sync::Arc::new(OllamaProvider::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(std::sync::Arc::new(LocalProvider::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("local embedding provider requires the local-embeddings-fastembed feature"),
        other => bail!("unknown embedding provider: {other}"),
    }
}

// ============ Shared vector utilities ============

pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

/// Returns `[-1.0, 1.0]`; `0.0` for empty vectors or mismatched lengths.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }
    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom < f32::EPSILON {
        return 0.0;
    }
    dot / denom
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vec_blob_roundtrip() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        let blob = vec_to_blob(&vec);
        assert_eq!(blob_to_vec(&blob), vec);
    }

    #[test]
    fn cosine_identical_orthogonal_opposite() {
        let a = vec![1.0, 2.0, 3.0];
        assert!((cosine_similarity(&a, &a) - 1.0).abs() < 1e-6);

        let x = vec![1.0, 0.0, 0.0];
        let y = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&x, &y).abs() < 1e-6);

        let p = vec![1.0, 0.0];
        let q = vec![-1.0, 0.0];
        assert!((cosine_similarity(&p, &q) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_empty_and_mismatched() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
    }

    #[tokio::test]
    async fn disabled_provider_errors_on_every_call() {
        let p = DisabledProvider;
        assert!(p.embed_passage("hello").await.is_err());
        assert!(p.embed_query("hello").await.is_err());
        assert!(p.embed_batch(&["a".to_string()]).await.is_err());
    }

    #[test]
    fn query_prefix_differs_from_passage() {
        assert_eq!(prefixed("x", EmbedKind::Passage), "x");
        assert_eq!(prefixed("x", EmbedKind::Query), "query: x");
    }
}
