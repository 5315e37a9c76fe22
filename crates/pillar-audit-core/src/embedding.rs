//! Embedding provider and cache traits plus vector utilities.
//!
//! Defines the [`EmbeddingBackend`] trait that all embedding providers
//! implement and the [`EmbeddingCache`] trait for content-hash keyed
//! storage, along with pure helpers for vector serialization and
//! similarity computation.
//!
//! Concrete providers (OpenAI, Ollama, fastembed) and the SQLite cache live
//! in the `pillar-audit` app crate. [`MemoryCache`] lives here for tests and
//! for runs with the persistent cache disabled.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use sha2::{Digest, Sha256};

use crate::error::ProviderError;

/// An external embedding model.
///
/// Implementations must report rate limiting as [`ProviderError::Throttled`]
/// and network or server trouble as [`ProviderError::Transient`], so the
/// adapter can back off only when retrying can help.
#[async_trait]
pub trait EmbeddingBackend: Send + Sync {
    /// Returns the model identifier (e.g. `"text-embedding-3-small"`).
    ///
    /// Used as the `model_version` of every embedding this backend produces.
    fn model_name(&self) -> &str;

    /// Returns the configured dimensionality, when known up front.
    fn dims(&self) -> Option<usize>;

    /// Embed a batch of texts, returning one vector per text, in order.
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ProviderError>;
}

/// Storage for embeddings keyed by `(text_hash, model_version)`.
///
/// Besides vectors, the cache records which guidance corpus hash was last
/// indexed per model, so a corpus change is detectable across runs.
#[async_trait]
pub trait EmbeddingCache: Send + Sync {
    /// Look up a vector.
    async fn get(&self, text_hash: &str, model: &str) -> anyhow::Result<Option<Vec<f32>>>;

    /// Store or replace a vector.
    async fn put(&self, text_hash: &str, model: &str, vector: &[f32]) -> anyhow::Result<()>;

    /// The guidance corpus hash last indexed with `model`, if any.
    async fn corpus_hash(&self, model: &str) -> anyhow::Result<Option<String>>;

    /// Record that the corpus with `hash` has been indexed with `model`.
    async fn record_corpus_hash(&self, model: &str, hash: &str) -> anyhow::Result<()>;
}

/// In-memory [`EmbeddingCache`] behind `std::sync::RwLock`.
#[derive(Default)]
pub struct MemoryCache {
    vectors: RwLock<HashMap<(String, String), Vec<f32>>>,
    corpus: RwLock<HashMap<String, String>>,
}

impl MemoryCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of cached vectors.
    pub fn len(&self) -> usize {
        self.vectors.read().map(|v| v.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl EmbeddingCache for MemoryCache {
    async fn get(&self, text_hash: &str, model: &str) -> anyhow::Result<Option<Vec<f32>>> {
        let vectors = self
            .vectors
            .read()
            .map_err(|_| anyhow::anyhow!("embedding cache lock poisoned"))?;
        Ok(vectors
            .get(&(text_hash.to_string(), model.to_string()))
            .cloned())
    }

    async fn put(&self, text_hash: &str, model: &str, vector: &[f32]) -> anyhow::Result<()> {
        let mut vectors = self
            .vectors
            .write()
            .map_err(|_| anyhow::anyhow!("embedding cache lock poisoned"))?;
        vectors.insert((text_hash.to_string(), model.to_string()), vector.to_vec());
        Ok(())
    }

    async fn corpus_hash(&self, model: &str) -> anyhow::Result<Option<String>> {
        let corpus = self
            .corpus
            .read()
            .map_err(|_| anyhow::anyhow!("embedding cache lock poisoned"))?;
        Ok(corpus.get(model).cloned())
    }

    async fn record_corpus_hash(&self, model: &str, hash: &str) -> anyhow::Result<()> {
        let mut corpus = self
            .corpus
            .write()
            .map_err(|_| anyhow::anyhow!("embedding cache lock poisoned"))?;
        corpus.insert(model.to_string(), hash.to_string());
        Ok(())
    }
}

/// SHA-256 of a text, lowercase hex. The content half of every cache key.
pub fn text_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Encode a float vector as a BLOB (little-endian f32 bytes).
///
/// # Example
///
/// ```rust
/// use pillar_audit_core::embedding::{vec_to_blob, blob_to_vec};
///
/// let v = vec![1.0f32, -2.5, 3.125];
/// let blob = vec_to_blob(&v);
/// assert_eq!(blob.len(), 12); // 3 × 4 bytes
/// assert_eq!(blob_to_vec(&blob), v);
/// ```
pub fn vec_to_blob(vec: &[f32]) -> Vec<u8> {
    let mut bytes = Vec::with_capacity(vec.len() * 4);
    for &v in vec {
        bytes.extend_from_slice(&v.to_le_bytes());
    }
    bytes
}

/// Decode a BLOB back into a float vector.
pub fn blob_to_vec(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
        .collect()
}

/// Compute cosine similarity between two embedding vectors.
///
/// Returns a value in `[-1.0, 1.0]`, or `0.0` for empty vectors, vectors of
/// different lengths, and zero vectors.
///
/// ```text
///            a · b
/// cos(θ) = ─────────
///          ‖a‖ × ‖b‖
/// ```
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
    fn test_cosine_identical() {
        let v = vec![1.0, 2.0, 3.0];
        let sim = cosine_similarity(&v, &v);
        assert!((sim - 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_orthogonal() {
        let a = vec![1.0, 0.0, 0.0];
        let b = vec![0.0, 1.0, 0.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn test_cosine_degenerate_inputs() {
        assert_eq!(cosine_similarity(&[], &[]), 0.0);
        assert_eq!(cosine_similarity(&[1.0, 2.0], &[1.0]), 0.0);
        assert_eq!(cosine_similarity(&[0.0, 0.0], &[1.0, 1.0]), 0.0);
    }

    #[test]
    fn test_blob_preserves_bits() {
        let vec = vec![1.0f32, -2.5, 3.125, 0.0, -0.001];
        assert_eq!(blob_to_vec(&vec_to_blob(&vec)), vec);
    }

    #[test]
    fn test_text_hash_stable() {
        assert_eq!(text_hash("abc"), text_hash("abc"));
        assert_ne!(text_hash("abc"), text_hash("abd"));
        assert_eq!(text_hash("").len(), 64);
    }

    #[tokio::test]
    async fn test_memory_cache_keys_by_model() {
        let cache = MemoryCache::new();
        let h = text_hash("resource");
        cache.put(&h, "model-a", &[1.0, 2.0]).await.unwrap();

        assert_eq!(cache.get(&h, "model-a").await.unwrap(), Some(vec![1.0, 2.0]));
        assert_eq!(cache.get(&h, "model-b").await.unwrap(), None);
        assert_eq!(cache.len(), 1);
    }

    #[tokio::test]
    async fn test_memory_cache_corpus_hash() {
        let cache = MemoryCache::new();
        assert_eq!(cache.corpus_hash("m").await.unwrap(), None);
        cache.record_corpus_hash("m", "abc").await.unwrap();
        assert_eq!(cache.corpus_hash("m").await.unwrap(), Some("abc".into()));
    }
}
