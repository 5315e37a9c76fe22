//! Embedding Service Adapter.
//!
//! Wraps an [`EmbeddingBackend`] with:
//!
//! - a `(text_hash, model_version)` cache, so unchanged chunks and clauses
//!   never reach the provider twice;
//! - de-duplication of identical texts within one call;
//! - batching up to `batch_size` texts per provider request;
//! - retry with backoff and a per-call timeout ([`with_retry`]);
//! - validation of the provider's reply (vector count and dimensionality).
//!
//! Exhausted retries and fatal provider errors surface as
//! [`AuditError::EmbeddingUnavailable`]. Whether that is fatal is the
//! caller's decision.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use pillar_audit_core::embedding::{text_hash, EmbeddingBackend, EmbeddingCache, MemoryCache};
use pillar_audit_core::error::{AuditError, ProviderError};
use pillar_audit_core::models::Embedding;

use crate::config::Config;
use crate::embedding::create_provider;
use crate::retry::{with_retry, RetryPolicy};
use crate::sqlite_cache::SqliteCache;

/// Counters for one adapter's lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EmbedStats {
    pub cache_hits: usize,
    pub cache_misses: usize,
    pub provider_calls: usize,
}

pub struct Embedder {
    backend: Arc<dyn EmbeddingBackend>,
    cache: Arc<dyn EmbeddingCache>,
    policy: RetryPolicy,
    timeout: Duration,
    batch_size: usize,
    hits: AtomicUsize,
    misses: AtomicUsize,
    calls: AtomicUsize,
}

impl Embedder {
    pub fn new(
        backend: Arc<dyn EmbeddingBackend>,
        cache: Arc<dyn EmbeddingCache>,
        policy: RetryPolicy,
        timeout: Duration,
        batch_size: usize,
    ) -> Self {
        Self {
            backend,
            cache,
            policy,
            timeout,
            batch_size: batch_size.max(1),
            hits: AtomicUsize::new(0),
            misses: AtomicUsize::new(0),
            calls: AtomicUsize::new(0),
        }
    }

    /// Build the adapter described by `[embedding]`, `[retry]` and `[cache]`.
    ///
    /// With `cache.enabled = false` vectors live only for this process.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        let embedding = config.embedding()?;
        let backend: Arc<dyn EmbeddingBackend> = Arc::from(create_provider(embedding)?);
        let cache: Arc<dyn EmbeddingCache> = if config.cache.enabled {
            Arc::new(SqliteCache::open(&config.cache.path).await?)
        } else {
            Arc::new(MemoryCache::new())
        };
        Ok(Self::new(
            backend,
            cache,
            RetryPolicy::from_config(&config.retry),
            Duration::from_secs(embedding.timeout_secs),
            embedding.batch_size,
        ))
    }

    /// The `model_version` stamped on every embedding this adapter returns.
    pub fn model_version(&self) -> &str {
        self.backend.model_name()
    }

    /// Texts per provider request.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    pub fn cache(&self) -> &Arc<dyn EmbeddingCache> {
        &self.cache
    }

    pub fn stats(&self) -> EmbedStats {
        EmbedStats {
            cache_hits: self.hits.load(Ordering::Relaxed),
            cache_misses: self.misses.load(Ordering::Relaxed),
            provider_calls: self.calls.load(Ordering::Relaxed),
        }
    }

    /// Embed `(owner_id, text)` pairs, returning one [`Embedding`] per pair
    /// in input order.
    pub async fn embed(&self, items: &[(String, String)]) -> Result<Vec<Embedding>, AuditError> {
        let model = self.model_version().to_string();
        let hashes: Vec<String> = items.iter().map(|(_, text)| text_hash(text)).collect();

        let mut vectors: HashMap<String, Vec<f32>> = HashMap::new();
        let mut missing: Vec<(String, String)> = Vec::new();
        let mut seen: HashSet<&str> = HashSet::new();

        for ((_, text), hash) in items.iter().zip(&hashes) {
            if !seen.insert(hash.as_str()) {
                continue;
            }
            match self.cache.get(hash, &model).await {
                Ok(Some(vector)) => {
                    self.hits.fetch_add(1, Ordering::Relaxed);
                    vectors.insert(hash.clone(), vector);
                }
                Ok(None) => {
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    missing.push((hash.clone(), text.clone()));
                }
                Err(e) => {
                    tracing::warn!(error = %e, "embedding cache read failed; treating as miss");
                    self.misses.fetch_add(1, Ordering::Relaxed);
                    missing.push((hash.clone(), text.clone()));
                }
            }
        }

        for batch in missing.chunks(self.batch_size) {
            let texts: Vec<String> = batch.iter().map(|(_, t)| t.clone()).collect();
            let batch_vectors = self.embed_batch(&texts).await?;

            for ((hash, _), vector) in batch.iter().zip(batch_vectors) {
                if let Err(e) = self.cache.put(hash, &model, &vector).await {
                    tracing::warn!(error = %e, "embedding cache write failed");
                }
                vectors.insert(hash.clone(), vector);
            }
        }

        items
            .iter()
            .zip(&hashes)
            .map(|((owner_id, _), hash)| {
                let vector = vectors.get(hash).cloned().ok_or_else(|| {
                    AuditError::EmbeddingUnavailable(format!("no vector produced for '{}'", owner_id))
                })?;
                Ok(Embedding {
                    owner_id: owner_id.clone(),
                    vector,
                    model_version: model.clone(),
                })
            })
            .collect()
    }

    /// Embed a single text.
    pub async fn embed_one(&self, owner_id: &str, text: &str) -> Result<Embedding, AuditError> {
        let mut out = self
            .embed(&[(owner_id.to_string(), text.to_string())])
            .await?;
        out.pop()
            .ok_or_else(|| AuditError::EmbeddingUnavailable(format!("no vector produced for '{}'", owner_id)))
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, AuditError> {
        let backend = &self.backend;
        let calls = &self.calls;
        let expected_dims = backend.dims();

        let result = with_retry(&self.policy, self.timeout, "embed", || async move {
            calls.fetch_add(1, Ordering::Relaxed);
            let vectors = backend.embed_batch(texts).await?;
            validate(texts.len(), expected_dims, &vectors)?;
            Ok(vectors)
        })
        .await;

        result.map_err(|e| {
            AuditError::EmbeddingUnavailable(format!(
                "{} ({} text(s), model {})",
                e,
                texts.len(),
                backend.model_name()
            ))
        })
    }
}

fn validate(expected: usize, dims: Option<usize>, vectors: &[Vec<f32>]) -> Result<(), ProviderError> {
    if vectors.len() != expected {
        return Err(ProviderError::Fatal(format!(
            "provider returned {} vectors for {} texts",
            vectors.len(),
            expected
        )));
    }
    let Some(first) = vectors.first() else {
        return Ok(());
    };
    let width = dims.unwrap_or(first.len());
    for v in vectors {
        if v.is_empty() {
            return Err(ProviderError::Fatal("provider returned an empty vector".into()));
        }
        if v.len() != width {
            return Err(ProviderError::Fatal(format!(
                "provider returned a {}-dimensional vector, expected {}",
                v.len(),
                width
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate() {
        assert!(validate(2, None, &[vec![1.0], vec![2.0]]).is_ok());
        assert!(validate(2, None, &[vec![1.0]]).is_err());
        assert!(validate(1, Some(3), &[vec![1.0, 2.0]]).is_err());
        assert!(validate(2, None, &[vec![1.0], vec![1.0, 2.0]]).is_err());
        assert!(validate(1, None, &[vec![]]).is_err());
        assert!(validate(0, None, &[]).is_ok());
    }
}
