//! Concrete embedding providers.
//!
//! Implements [`EmbeddingBackend`] for:
//! - **[`OpenAIEmbedder`]**: `POST /v1/embeddings` on the OpenAI API.
//! - **[`OllamaEmbedder`]**: `POST /api/embed` on a local Ollama instance.
//! - **`LocalEmbedder`**: fastembed, offline after the first model download
//!   (feature `local-embeddings-fastembed`).
//!
//! Providers make exactly one attempt per call. Retry, timeout, batching,
//! and caching belong to the [`Embedder`](crate::embedder::Embedder) adapter.
//!
//! # Provider Selection
//!
//! ```rust,no_run
//! # use pillar_audit::config::parse_config;
//! # use pillar_audit::embedding::create_provider;
//! let cfg = parse_config(
//!     "[embedding]\nprovider = \"ollama\"\nmodel = \"nomic-embed-text\"",
//! ).unwrap();
//! let provider = create_provider(cfg.embedding().unwrap()).unwrap();
//! assert_eq!(provider.model_name(), "nomic-embed-text");
//! ```

use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use pillar_audit_core::embedding::EmbeddingBackend;
use pillar_audit_core::error::{AuditError, ProviderError};

use crate::config::EmbeddingConfig;
use crate::http::{api_key, send_json};

const OPENAI_URL: &str = "https://api.openai.com";
const OLLAMA_URL: &str = "http://localhost:11434";

// ============ OpenAI ============

/// Requires `OPENAI_API_KEY` in the environment.
pub struct OpenAIEmbedder {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dims: Option<usize>,
    url: String,
}

impl OpenAIEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            api_key: api_key("OPENAI_API_KEY")?,
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OPENAI_URL.to_string()),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OpenAIEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/v1/embeddings", self.url.trim_end_matches('/')))
            .bearer_auth(&self.api_key)
            .json(&body);
        let json = send_json(request, "OpenAI").await?;
        parse_openai_response(&json)
    }
}

/// Extract `data[].embedding`, ordered by `data[].index`.
fn parse_openai_response(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| invalid("OpenAI", "missing data array"))?;

    let mut indexed = Vec::with_capacity(data.len());
    for (position, item) in data.iter().enumerate() {
        let index = item
            .get("index")
            .and_then(|i| i.as_u64())
            .map(|i| i as usize)
            .unwrap_or(position);
        let embedding = item
            .get("embedding")
            .ok_or_else(|| invalid("OpenAI", "missing embedding"))?;
        indexed.push((index, parse_vector("OpenAI", embedding)?));
    }
    indexed.sort_by_key(|(index, _)| *index);
    Ok(indexed.into_iter().map(|(_, v)| v).collect())
}

// ============ Ollama ============

/// Requires Ollama to be running with the model pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaEmbedder {
    client: reqwest::Client,
    model: String,
    dims: Option<usize>,
    url: String,
}

impl OllamaEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            client: reqwest::Client::new(),
            model: config.model.clone(),
            dims: config.dims,
            url: config
                .url
                .clone()
                .unwrap_or_else(|| OLLAMA_URL.to_string()),
        })
    }
}

#[async_trait]
impl EmbeddingBackend for OllamaEmbedder {
    fn model_name(&self) -> &str {
        &self.model
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });
        let request = self
            .client
            .post(format!("{}/api/embed", self.url.trim_end_matches('/')))
            .json(&body);
        let json = send_json(request, "Ollama").await?;
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(json: &Value) -> Result<Vec<Vec<f32>>, ProviderError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| invalid("Ollama", "missing embeddings array"))?
        .iter()
        .map(|v| parse_vector("Ollama", v))
        .collect()
}

// ============ Local (fastembed) ============

/// The ONNX model is loaded on the first call and reused afterwards.
#[cfg(feature = "local-embeddings-fastembed")]
pub struct LocalEmbedder {
    model_name: String,
    model: fastembed::EmbeddingModel,
    dims: Option<usize>,
    batch_size: usize,
    loaded: std::sync::Arc<std::sync::Mutex<Option<fastembed::TextEmbedding>>>,
}

#[cfg(feature = "local-embeddings-fastembed")]
impl LocalEmbedder {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        Ok(Self {
            model_name: config.model.clone(),
            model: fastembed_model(&config.model)?,
            dims: config.dims,
            batch_size: config.batch_size,
            loaded: Default::default(),
        })
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
fn fastembed_model(name: &str) -> Result<fastembed::EmbeddingModel> {
    match name {
        "all-minilm-l6-v2" => Ok(fastembed::EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(fastembed::EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(fastembed::EmbeddingModel::BGEBaseENV15),
        "bge-large-en-v1.5" => Ok(fastembed::EmbeddingModel::BGELargeENV15),
        "nomic-embed-text-v1.5" => Ok(fastembed::EmbeddingModel::NomicEmbedTextV15),
        other => Err(AuditError::Configuration(format!(
            "unknown local embedding model: '{}'. Supported models: all-minilm-l6-v2, \
             bge-small-en-v1.5, bge-base-en-v1.5, bge-large-en-v1.5, nomic-embed-text-v1.5",
            other
        ))
        .into()),
    }
}

#[cfg(feature = "local-embeddings-fastembed")]
#[async_trait]
impl EmbeddingBackend for LocalEmbedder {
    fn model_name(&self) -> &str {
        &self.model_name
    }

    fn dims(&self) -> Option<usize> {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        let model = self.model.clone();
        let loaded = self.loaded.clone();
        let batch_size = self.batch_size;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut slot = loaded
                .lock()
                .map_err(|_| ProviderError::Fatal("local model lock poisoned".into()))?;
            if slot.is_none() {
                tracing::info!(model = ?model, "loading local embedding model");
                let embedder = fastembed::TextEmbedding::try_new(
                    fastembed::InitOptions::new(model).with_show_download_progress(false),
                )
                .map_err(|e| ProviderError::Fatal(format!("failed to load local model: {}", e)))?;
                *slot = Some(embedder);
            }
            let embedder = slot
                .as_mut()
                .ok_or_else(|| ProviderError::Fatal("local model not loaded".into()))?;
            embedder
                .embed(texts, Some(batch_size))
                .map_err(|e| ProviderError::Fatal(format!("local embedding failed: {}", e)))
        })
        .await
        .map_err(|e| ProviderError::Fatal(format!("local embedding task failed: {}", e)))?
    }
}

// ============ Shared ============

fn invalid(provider: &str, what: &str) -> ProviderError {
    ProviderError::Fatal(format!("invalid {} response: {}", provider, what))
}

fn parse_vector(provider: &str, value: &Value) -> Result<Vec<f32>, ProviderError> {
    value
        .as_array()
        .ok_or_else(|| invalid(provider, "embedding is not an array"))?
        .iter()
        .map(|v| {
            v.as_f64()
                .map(|f| f as f32)
                .ok_or_else(|| invalid(provider, "embedding contains a non-number"))
        })
        .collect()
}

/// Create the [`EmbeddingBackend`] named by `config.provider`.
///
/// | Config Value | Provider |
/// |-------------|----------|
/// | `"openai"` | [`OpenAIEmbedder`] |
/// | `"ollama"` | [`OllamaEmbedder`] |
/// | `"local"` | `LocalEmbedder` (feature `local-embeddings-fastembed`) |
pub fn create_provider(config: &EmbeddingConfig) -> Result<Box<dyn EmbeddingBackend>> {
    match config.provider.as_str() {
        "openai" => Ok(Box::new(OpenAIEmbedder::new(config)?)),
        "ollama" => Ok(Box::new(OllamaEmbedder::new(config)?)),
        #[cfg(feature = "local-embeddings-fastembed")]
        "local" => Ok(Box::new(LocalEmbedder::new(config)?)),
        #[cfg(not(feature = "local-embeddings-fastembed"))]
        "local" => Err(AuditError::Configuration(
            "local embedding provider requires --features local-embeddings-fastembed".into(),
        )
        .into()),
        other => Err(AuditError::Configuration(format!(
            "unknown embedding provider: {}",
            other
        ))
        .into()),
    }
}
