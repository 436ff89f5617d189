//! Embedding backends.
//!
//! Concrete [`Embedder`] implementations selected by `embedding.provider`:
//! - **[`DisabledEmbedder`]** — always fails; used when embeddings are not configured.
//! - **[`OpenAiEmbedder`]** — calls the OpenAI `/v1/embeddings` endpoint.
//! - **[`OllamaEmbedder`]** — calls a local Ollama instance's `/api/embed` endpoint.
//! - **`LocalEmbedder`** — runs models in-process via fastembed (feature
//!   `local-embeddings-fastembed`); no network calls after model download.
//! - **[`HashingEmbedder`]** — deterministic feature hashing, offline.
//!
//! Backends make a single attempt per batch and classify failures into
//! [`EmbeddingError`] variants; retry with backoff is the ingestion
//! synchronizer's job.
//!
//! # Error classification
//!
//! - HTTP 429 → [`EmbeddingError::RateLimited`]
//! - HTTP 5xx and network errors → [`EmbeddingError::Transient`]
//! - other HTTP 4xx and malformed responses → [`EmbeddingError::Permanent`]
//! - client-side timeout → [`EmbeddingError::Timeout`]

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use async_trait::async_trait;

pub use corpus_harness_core::embedding::{Embedder, HashingEmbedder};
use corpus_harness_core::error::EmbeddingError;

use crate::config::EmbeddingConfig;

const OPENAI_URL: &str = "https://api.openai.com/v1/embeddings";
const DEFAULT_OLLAMA_URL: &str = "http://localhost:11434";

/// Create the [`Embedder`] named by `config.provider`.
///
/// | Config Value | Embedder |
/// |-------------|----------|
/// | `"disabled"` | [`DisabledEmbedder`] |
/// | `"openai"` | [`OpenAiEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (requires the fastembed feature) |
/// | `"hash"` | [`HashingEmbedder`] |
pub fn create_embedder(config: &EmbeddingConfig) -> Result<Arc<dyn Embedder>> {
    match config.provider.as_str() {
        "disabled" => Ok(Arc::new(DisabledEmbedder)),
        "openai" => Ok(Arc::new(OpenAiEmbedder::new(config)?)),
        "ollama" => Ok(Arc::new(OllamaEmbedder::new(config)?)),
        "hash" => {
            let dims = config
                .dims
                .ok_or_else(|| anyhow::anyhow!("embedding.dims required for hash provider"))?;
            let model = config.model.clone().unwrap_or_else(|| "hash-v1".to_string());
            Ok(Arc::new(HashingEmbedder::with_model(model, dims)))
        }
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Arc::new(local::LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => bail!("Local embedding provider requires --features local-embeddings-fastembed"),
        other => bail!("Unknown embedding provider: {}", other),
    }
}

// ============ Disabled ============

/// An embedder that always fails with [`EmbeddingError::Disabled`].
pub struct DisabledEmbedder;

#[async_trait]
impl Embedder for DisabledEmbedder {
    fn model_name(&self) -> &str {
        "disabled"
    }
    fn dims(&self) -> usize {
        0
    }
    async fn embed(&self, _texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        Err(EmbeddingError::Disabled)
    }
}

// ============ HTTP helpers ============

fn http_client(timeout: Duration) -> Result<reqwest::Client> {
    Ok(reqwest::Client::builder().timeout(timeout).build()?)
}

fn classify_status(service: &str, status: reqwest::StatusCode, body: String) -> EmbeddingError {
    let msg = format!("{} API error {}: {}", service, status, body);
    if status.as_u16() == 429 {
        EmbeddingError::RateLimited(msg)
    } else if status.is_server_error() {
        EmbeddingError::Transient(msg)
    } else {
        EmbeddingError::Permanent(msg)
    }
}

fn classify_request_error(service: &str, timeout: Duration, err: reqwest::Error) -> EmbeddingError {
    if err.is_timeout() {
        EmbeddingError::Timeout(timeout)
    } else {
        EmbeddingError::Transient(format!("{} request failed: {}", service, err))
    }
}

async fn post_json(
    service: &str,
    timeout: Duration,
    request: reqwest::RequestBuilder,
) -> Result<serde_json::Value, EmbeddingError> {
    let response = request
        .send()
        .await
        .map_err(|e| classify_request_error(service, timeout, e))?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        return Err(classify_status(service, status, body));
    }

    response
        .json()
        .await
        .map_err(|e| EmbeddingError::Permanent(format!("{} returned invalid JSON: {}", service, e)))
}

fn check_shape(vectors: &[Vec<f32>], expected: usize, dims: usize) -> Result<(), EmbeddingError> {
    if vectors.len() != expected {
        return Err(EmbeddingError::Permanent(format!(
            "expected {} vectors, got {}",
            expected,
            vectors.len()
        )));
    }
    if let Some(v) = vectors.iter().find(|v| v.len() != dims) {
        return Err(EmbeddingError::Permanent(format!(
            "expected {} dimensions, got {}",
            dims,
            v.len()
        )));
    }
    Ok(())
}

/// `None` unless `value` is an array of numbers.
fn json_vector(value: &serde_json::Value) -> Option<Vec<f32>> {
    value
        .as_array()?
        .iter()
        .map(|v| v.as_f64().map(|f| f as f32))
        .collect()
}

// ============ OpenAI ============

/// Embedder using the OpenAI API.
///
/// Requires the `OPENAI_API_KEY` environment variable.
pub struct OpenAiEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: usize,
    batch_size: usize,
    timeout: Duration,
}

impl OpenAiEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for OpenAI provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for OpenAI provider"))?;
        let api_key = std::env::var("OPENAI_API_KEY")
            .map_err(|_| anyhow::anyhow!("OPENAI_API_KEY environment variable not set"))?;

        Ok(Self {
            client: http_client(config.timeout())?,
            api_key,
            model,
            dims,
            batch_size: config.batch_size.max(1),
            timeout: config.timeout(),
        })
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(OPENAI_URL)
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = post_json("OpenAI", self.timeout, request).await?;
        parse_openai_response(&json)
    }
}

#[async_trait]
impl Embedder for OpenAiEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            out.extend(self.embed_batch(batch).await?);
        }
        check_shape(&out, texts.len(), self.dims)?;
        Ok(out)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| EmbeddingError::Permanent("Invalid OpenAI response: missing data array".into()))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (pos, item) in data.iter().enumerate() {
        let vec = item
            .get("embedding")
            .and_then(json_vector)
            .ok_or_else(|| EmbeddingError::Permanent("Invalid OpenAI response: missing embedding".into()))?;
        let index = item.get("index").and_then(|i| i.as_u64()).unwrap_or(pos as u64);
        indexed.push((index, vec));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Embedder using a local Ollama instance (`POST {url}/api/embed`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: usize,
    url: String,
    batch_size: usize,
    timeout: Duration,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = config
            .model
            .clone()
            .ok_or_else(|| anyhow::anyhow!("embedding.model required for Ollama provider"))?;
        let dims = config
            .dims
            .ok_or_else(|| anyhow::anyhow!("embedding.dims required for Ollama provider"))?;
        let url = config
            .url
            .clone()
            .unwrap_or_else(|| DEFAULT_OLLAMA_URL.to_string());

        Ok(Self {
            client: http_client(config.timeout())?,
            model,
            dims,
            url: url.trim_end_matches('/').to_string(),
            batch_size: config.batch_size.max(1),
            timeout: config.timeout(),
        })
    }
}

#[async_trait]
impl Embedder for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for batch in texts.chunks(self.batch_size) {
            let body = serde_json::json!({
                "model": self.model,
                "input": batch,
            });
            let request = self
                .client
                .post(format!("{}/api/embed", self.url))
                .json(&body);
            let json = post_json("Ollama", self.timeout, request).await?;
            out.extend(parse_ollama_response(&json)?);
        }
        check_shape(&out, texts.len(), self.dims)?;
        Ok(out)
    }
}

fn parse_ollama_response(json: &serde_json::Value) -> Result<Vec<Vec<f32>>, EmbeddingError> {
    let embeddings = json
        .get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| EmbeddingError::Permanent("Invalid Ollama response: missing embeddings array".into()))?;

    embeddings
        .iter()
        .map(|e| {
            json_vector(e).ok_or_else(|| {
                EmbeddingError::Permanent("Invalid Ollama response: embedding is not an array".into())
            })
        })
        .collect()
}

// ============ Local (fastembed) ============

#[cfg(feature = "local-embeddings-fastembed")]
mod local {
    use std::sync::{Arc, Mutex};

    use anyhow::{bail, Result};
    use async_trait::async_trait;

    use corpus_harness_core::embedding::Embedder;
    use corpus_harness_core::error::EmbeddingError;

    use crate::config::EmbeddingConfig;

    /// In-process embedder. The model is downloaded from Hugging Face on
    /// first use and cached; later runs work offline.
    pub struct LocalEmbedder {
        model_name: String,
        dims: usize,
        batch_size: usize,
        kind: fastembed::EmbeddingModel,
        model: Arc<Mutex<Option<fastembed::TextEmbedding>>>,
    }

    impl LocalEmbedder {
        pub fn new(config: &EmbeddingConfig) -> Result<Self> {
            let model_name = config
                .model
                .clone()
                .unwrap_or_else(|| "all-minilm-l6-v2".to_string());
            let (kind, default_dims) = resolve_model(&model_name)?;
            Ok(Self {
                dims: config.dims.unwrap_or(default_dims),
                model_name,
                batch_size: config.batch_size.max(1),
                kind,
                model: Arc::new(Mutex::new(None)),
            })
        }
    }

    fn resolve_model(name: &str) -> Result<(fastembed::EmbeddingModel, usize)> {
        use fastembed::EmbeddingModel::*;
        Ok(match name {
            "all-minilm-l6-v2" => (AllMiniLML6V2, 384),
            "bge-small-en-v1.5" => (BGESmallENV15, 384),
            "bge-base-en-v1.5" => (BGEBaseENV15, 768),
            "bge-large-en-v1.5" => (BGELargeENV15, 1024),
            "nomic-embed-text-v1.5" => (NomicEmbedTextV15, 768),
            "multilingual-e5-small" => (MultilingualE5Small, 384),
            "multilingual-e5-base" => (MultilingualE5Base, 768),
            other => bail!(
                "Unknown local embedding model: '{}'. Supported models: \
                 all-minilm-l6-v2, bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, \
                 nomic-embed-text-v1.5, multilingual-e5-small, multilingual-e5-base",
                other
            ),
        })
    }

    #[async_trait]
    impl Embedder for LocalEmbedder {
        fn model_name(&self) -> &str {
            &self.model_name
        }
        fn dims(&self) -> usize {
            self.dims
        }
        async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
            let texts = texts.to_vec();
            let slot = self.model.clone();
            let kind = self.kind.clone();
            let batch_size = self.batch_size;

            tokio::task::spawn_blocking(move || {
                let mut guard = slot
                    .lock()
                    .map_err(|_| EmbeddingError::Permanent("local model lock poisoned".into()))?;
                if guard.is_none() {
                    let model = fastembed::TextEmbedding::try_new(
                        fastembed::InitOptions::new(kind).with_show_download_progress(false),
                    )
                    .map_err(|e| EmbeddingError::Transient(format!("failed to load local model: {}", e)))?;
                    *guard = Some(model);
                }
                let model = guard
                    .as_mut()
                    .ok_or_else(|| EmbeddingError::Permanent("local model unavailable".into()))?;
                model
                    .embed(texts, Some(batch_size))
                    .map_err(|e| EmbeddingError::Permanent(format!("local embedding failed: {}", e)))
            })
            .await
            .map_err(|e| EmbeddingError::Transient(format!("embedding task failed: {}", e)))?
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(provider: &str) -> EmbeddingConfig {
        EmbeddingConfig {
            provider: provider.to_string(),
            model: Some("hash-v1".to_string()),
            dims: Some(16),
            ..EmbeddingConfig::default()
        }
    }

    #[test]
    fn status_classification() {
        use reqwest::StatusCode;
        assert!(matches!(
            classify_status("X", StatusCode::TOO_MANY_REQUESTS, String::new()),
            EmbeddingError::RateLimited(_)
        ));
        assert!(matches!(
            classify_status("X", StatusCode::BAD_GATEWAY, String::new()),
            EmbeddingError::Transient(_)
        ));
        assert!(matches!(
            classify_status("X", StatusCode::BAD_REQUEST, String::new()),
            EmbeddingError::Permanent(_)
        ));
    }

    #[test]
    fn openai_response_is_ordered_by_index() {
        let json = serde_json::json!({
            "data": [
                {"index": 1, "embedding": [0.0, 1.0]},
                {"index": 0, "embedding": [1.0, 0.0]}
            ]
        });
        let vectors = parse_openai_response(&json).unwrap();
        assert_eq!(vectors, vec![vec![1.0, 0.0], vec![0.0, 1.0]]);
        assert!(parse_openai_response(&serde_json::json!({})).is_err());
    }

    #[test]
    fn ollama_response_parsed() {
        let json = serde_json::json!({"embeddings": [[0.5, 0.5]]});
        assert_eq!(parse_ollama_response(&json).unwrap(), vec![vec![0.5, 0.5]]);
        let bad = serde_json::json!({"embeddings": [42]});
        assert!(matches!(parse_ollama_response(&bad), Err(EmbeddingError::Permanent(_))));
    }

    #[test]
    fn non_numeric_vector_elements_are_malformed() {
        assert_eq!(json_vector(&serde_json::json!([0.25, 1])), Some(vec![0.25, 1.0]));
        assert_eq!(json_vector(&serde_json::json!([0.5, "x"])), None);
        assert_eq!(json_vector(&serde_json::json!([0.5, null])), None);

        let ollama = serde_json::json!({"embeddings": [[0.5, "oops"]]});
        assert!(matches!(parse_ollama_response(&ollama), Err(EmbeddingError::Permanent(_))));
        let openai = serde_json::json!({"data": [{"index": 0, "embedding": [true, 1.0]}]});
        assert!(matches!(parse_openai_response(&openai), Err(EmbeddingError::Permanent(_))));
    }

    #[test]
    fn shape_mismatch_is_permanent() {
        assert!(check_shape(&[vec![1.0, 2.0]], 2, 2).is_err());
        assert!(check_shape(&[vec![1.0]], 1, 2).is_err());
        assert!(check_shape(&[vec![1.0, 2.0]], 1, 2).is_ok());
    }

    #[tokio::test]
    async fn hash_provider_from_config() {
        let embedder = create_embedder(&config("hash")).unwrap();
        assert_eq!(embedder.model_name(), "hash-v1");
        assert_eq!(embedder.dims(), 16);
        let v = embedder.embed_query("Rome").await.unwrap();
        assert_eq!(v.len(), 16);
    }

    #[tokio::test]
    async fn disabled_provider_fails() {
        let embedder = create_embedder(&config("disabled")).unwrap();
        let err = embedder.embed(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, EmbeddingError::Disabled));
        assert!(!err.is_retryable());
    }

    #[test]
    fn unknown_provider_rejected() {
        assert!(create_embedder(&config("magic")).is_err());
    }
}
