//! Guidance corpus and the read-only guidance index.
//!
//! A [`GuidanceCorpus`] is the versioned list of pillar clauses as loaded
//! from disk (or the built-in default). A [`GuidanceIndex`] pairs every
//! clause with its embedding, partitioned by pillar. The index is built once
//! before any chunk is analyzed and is never mutated afterwards, so it can
//! be shared across workers behind an `Arc` with no locking.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuditError, Result};
use crate::models::{Embedding, GuidanceClause, Pillar};

/// The versioned clause corpus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuidanceCorpus {
    pub version: String,
    pub clauses: Vec<GuidanceClause>,
}

impl GuidanceCorpus {
    /// Check ids are present and unique and every clause has text.
    pub fn validate(&self) -> Result<()> {
        if self.version.trim().is_empty() {
            return Err(AuditError::Configuration(
                "guidance corpus version must not be empty".into(),
            ));
        }
        let mut seen = BTreeSet::new();
        for clause in &self.clauses {
            if clause.id.trim().is_empty() {
                return Err(AuditError::Configuration(
                    "guidance clause with empty id".into(),
                ));
            }
            if clause.text.trim().is_empty() {
                return Err(AuditError::Configuration(format!(
                    "guidance clause '{}' has empty text",
                    clause.id
                )));
            }
            if !seen.insert(clause.id.as_str()) {
                return Err(AuditError::Configuration(format!(
                    "duplicate guidance clause id '{}'",
                    clause.id
                )));
            }
        }
        Ok(())
    }

    /// SHA-256 over the version and every clause, in id order.
    ///
    /// Any edit to a clause (or the version string) changes the hash.
    pub fn hash(&self) -> String {
        let mut sorted: Vec<&GuidanceClause> = self.clauses.iter().collect();
        sorted.sort_by(|a, b| a.id.cmp(&b.id));

        let mut hasher = Sha256::new();
        hasher.update(self.version.as_bytes());
        for clause in sorted {
            hasher.update([0u8]);
            hasher.update(clause.id.as_bytes());
            hasher.update([0u8]);
            hasher.update(clause.pillar.display_name().as_bytes());
            hasher.update([0u8]);
            hasher.update(clause.text.as_bytes());
            hasher.update([0u8]);
            hasher.update(clause.source_reference.as_bytes());
        }
        format!("{:x}", hasher.finalize())
    }

    /// Text submitted to the embedding model for a clause.
    pub fn embedding_text(clause: &GuidanceClause) -> String {
        format!("{}: {}", clause.pillar.display_name(), clause.text)
    }
}

/// A clause together with its embedding.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexedClause {
    pub clause: GuidanceClause,
    pub embedding: Embedding,
}

/// Embedded guidance clauses, partitioned by pillar.
#[derive(Debug, Clone)]
pub struct GuidanceIndex {
    model_version: String,
    corpus_version: String,
    corpus_hash: String,
    by_pillar: BTreeMap<Pillar, Vec<IndexedClause>>,
    ids: BTreeSet<String>,
}

impl GuidanceIndex {
    /// Build an index from a corpus and one embedding per clause.
    ///
    /// Embeddings are matched to clauses by `owner_id == clause.id`. Every
    /// embedding must come from `model_version`; a missing embedding means
    /// the index cannot be built.
    pub fn build(
        corpus: &GuidanceCorpus,
        embeddings: Vec<Embedding>,
        model_version: &str,
    ) -> Result<Self> {
        corpus.validate()?;

        let mut by_owner: HashMap<String, Embedding> = embeddings
            .into_iter()
            .map(|e| (e.owner_id.clone(), e))
            .collect();

        let mut pairs = Vec::with_capacity(corpus.clauses.len());
        for clause in &corpus.clauses {
            let embedding = by_owner.remove(&clause.id).ok_or_else(|| {
                AuditError::EmbeddingUnavailable(format!(
                    "no embedding for guidance clause '{}'",
                    clause.id
                ))
            })?;
            pairs.push(IndexedClause {
                clause: clause.clone(),
                embedding,
            });
        }

        Self::from_pairs(model_version, &corpus.version, &corpus.hash(), pairs)
    }

    /// Assemble an index from already-paired clauses.
    ///
    /// Every embedding must come from `model_version`.
    pub fn from_pairs(
        model_version: &str,
        corpus_version: &str,
        corpus_hash: &str,
        pairs: Vec<IndexedClause>,
    ) -> Result<Self> {
        let mut by_pillar: BTreeMap<Pillar, Vec<IndexedClause>> = BTreeMap::new();
        let mut ids = BTreeSet::new();
        for pair in pairs {
            if pair.embedding.model_version != model_version {
                return Err(AuditError::ModelVersionMismatch {
                    expected: model_version.to_string(),
                    actual: pair.embedding.model_version,
                });
            }
            ids.insert(pair.clause.id.clone());
            by_pillar.entry(pair.clause.pillar).or_default().push(pair);
        }
        for clauses in by_pillar.values_mut() {
            clauses.sort_by(|a, b| a.clause.id.cmp(&b.clause.id));
        }
        Ok(Self {
            model_version: model_version.to_string(),
            corpus_version: corpus_version.to_string(),
            corpus_hash: corpus_hash.to_string(),
            by_pillar,
            ids,
        })
    }

    pub fn model_version(&self) -> &str {
        &self.model_version
    }

    pub fn corpus_version(&self) -> &str {
        &self.corpus_version
    }

    pub fn corpus_hash(&self) -> &str {
        &self.corpus_hash
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn contains(&self, clause_id: &str) -> bool {
        self.ids.contains(clause_id)
    }

    /// Clauses of one pillar, sorted by id. Empty when the pillar has none.
    pub fn clauses(&self, pillar: Pillar) -> &[IndexedClause] {
        self.by_pillar
            .get(&pillar)
            .map(|v| v.as_slice())
            .unwrap_or(&[])
    }

    /// All clauses, in pillar order then id order.
    pub fn iter(&self) -> impl Iterator<Item = &IndexedClause> {
        self.by_pillar.values().flat_map(|v| v.iter())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clause(id: &str, pillar: Pillar) -> GuidanceClause {
        GuidanceClause {
            id: id.into(),
            pillar,
            text: format!("text of {}", id),
            source_reference: "ref".into(),
        }
    }

    fn embedding(owner: &str, model: &str) -> Embedding {
        Embedding {
            owner_id: owner.into(),
            vector: vec![1.0, 0.0],
            model_version: model.into(),
        }
    }

    fn corpus() -> GuidanceCorpus {
        GuidanceCorpus {
            version: "v1".into(),
            clauses: vec![
                clause("SEC-02", Pillar::Security),
                clause("SEC-01", Pillar::Security),
                clause("REL-01", Pillar::Reliability),
            ],
        }
    }

    #[test]
    fn test_build_partitions_by_pillar_sorted() {
        let c = corpus();
        let embeddings = vec![
            embedding("SEC-01", "m"),
            embedding("SEC-02", "m"),
            embedding("REL-01", "m"),
        ];
        let index = GuidanceIndex::build(&c, embeddings, "m").unwrap();
        assert_eq!(index.len(), 3);
        let sec: Vec<&str> = index
            .clauses(Pillar::Security)
            .iter()
            .map(|p| p.clause.id.as_str())
            .collect();
        assert_eq!(sec, vec!["SEC-01", "SEC-02"]);
        assert!(index.clauses(Pillar::Sustainability).is_empty());
        assert!(index.contains("REL-01"));
        assert!(!index.contains("COST-01"));
        assert_eq!(index.corpus_hash(), c.hash());
    }

    #[test]
    fn test_build_rejects_missing_embedding() {
        let c = corpus();
        let result = GuidanceIndex::build(&c, vec![embedding("SEC-01", "m")], "m");
        assert!(matches!(result, Err(AuditError::EmbeddingUnavailable(_))));
    }

    #[test]
    fn test_build_rejects_mixed_models() {
        let c = corpus();
        let embeddings = vec![
            embedding("SEC-01", "m"),
            embedding("SEC-02", "other"),
            embedding("REL-01", "m"),
        ];
        let result = GuidanceIndex::build(&c, embeddings, "m");
        assert!(matches!(
            result,
            Err(AuditError::ModelVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_from_pairs_rejects_foreign_model() {
        let pair = |id: &str, model: &str| IndexedClause {
            clause: clause(id, Pillar::Security),
            embedding: embedding(id, model),
        };
        let result = GuidanceIndex::from_pairs(
            "m",
            "v1",
            "h",
            vec![pair("SEC-01", "m"), pair("SEC-02", "other")],
        );
        assert!(matches!(
            result,
            Err(AuditError::ModelVersionMismatch { .. })
        ));
        assert!(GuidanceIndex::from_pairs("m", "v1", "h", vec![pair("SEC-01", "m")]).is_ok());
    }

    #[test]
    fn test_validate_duplicate_ids() {
        let mut c = corpus();
        c.clauses.push(clause("SEC-01", Pillar::Security));
        assert!(matches!(c.validate(), Err(AuditError::Configuration(_))));
    }

    #[test]
    fn test_hash_ignores_clause_order_but_not_content() {
        let a = corpus();
        let mut b = corpus();
        b.clauses.reverse();
        assert_eq!(a.hash(), b.hash());

        let mut c = corpus();
        c.clauses[0].text.push('!');
        assert_ne!(a.hash(), c.hash());

        let mut d = corpus();
        d.version = "v2".into();
        assert_ne!(a.hash(), d.hash());
    }
}
