//! Top-k guidance retrieval by cosine similarity.
//!
//! # Ordering
//!
//! Results are sorted by score (desc), then clause id (asc), so repeated
//! calls over the same index and query return the same sequence even when
//! scores tie.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::error::{AuditError, Result};
use crate::guidance::{GuidanceIndex, IndexedClause};
use crate::models::{Embedding, GuidanceClause, Pillar};

/// A retrieved clause with its similarity to the query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrievedClause {
    pub clause: GuidanceClause,
    pub score: f32,
}

/// How candidates are drawn from the index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetrievalScope {
    /// Top-k from every pillar separately, concatenated in pillar order.
    PerPillar,
    /// Top-k across all pillars at once.
    Global,
}

/// Read-only view over a [`GuidanceIndex`].
pub struct Retriever<'a> {
    index: &'a GuidanceIndex,
}

impl<'a> Retriever<'a> {
    pub fn new(index: &'a GuidanceIndex) -> Self {
        Self { index }
    }

    /// Return the top-`k` clauses most similar to `query`, optionally
    /// restricted to one pillar.
    ///
    /// An index with no clauses for the filter yields an empty result, not
    /// an error. The only error is a query embedded with a different model
    /// than the index.
    pub fn retrieve(
        &self,
        query: &Embedding,
        k: usize,
        pillar_filter: Option<Pillar>,
    ) -> Result<Vec<RetrievedClause>> {
        self.check_model(query)?;
        if k == 0 {
            return Ok(Vec::new());
        }

        let candidates: Box<dyn Iterator<Item = &'a IndexedClause> + 'a> = match pillar_filter {
            Some(pillar) => Box::new(self.index.clauses(pillar).iter()),
            None => Box::new(self.index.iter()),
        };

        top_k(query, candidates, k)
    }

    /// Top-`k` per pillar (or globally), per `scope`.
    pub fn retrieve_scoped(
        &self,
        query: &Embedding,
        k: usize,
        scope: RetrievalScope,
    ) -> Result<Vec<RetrievedClause>> {
        match scope {
            RetrievalScope::Global => self.retrieve(query, k, None),
            RetrievalScope::PerPillar => {
                let mut out = Vec::new();
                for pillar in Pillar::ALL {
                    out.extend(self.retrieve(query, k, Some(pillar))?);
                }
                Ok(out)
            }
        }
    }

    fn check_model(&self, query: &Embedding) -> Result<()> {
        if query.model_version != self.index.model_version() {
            return Err(AuditError::ModelVersionMismatch {
                expected: self.index.model_version().to_string(),
                actual: query.model_version.clone(),
            });
        }
        Ok(())
    }
}

fn top_k<'c>(
    query: &Embedding,
    candidates: impl Iterator<Item = &'c IndexedClause>,
    k: usize,
) -> Result<Vec<RetrievedClause>> {
    let mut scored: Vec<(f32, &'c IndexedClause)> = candidates
        .map(|c| -> Result<(f32, &'c IndexedClause)> {
            let score = query.similarity(&c.embedding)?;
            // NaN sorts last
            let score = if score.is_nan() { f32::NEG_INFINITY } else { score };
            Ok((score, c))
        })
        .collect::<Result<_>>()?;

    scored.sort_by(|a, b| match b.0.total_cmp(&a.0) {
        Ordering::Equal => a.1.clause.id.cmp(&b.1.clause.id),
        other => other,
    });
    scored.truncate(k);

    Ok(scored
        .into_iter()
        .map(|(score, c)| RetrievedClause {
            clause: c.clause.clone(),
            score,
        })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const MODEL: &str = "test-model";

    fn pair(id: &str, pillar: Pillar, vector: Vec<f32>) -> IndexedClause {
        IndexedClause {
            clause: GuidanceClause {
                id: id.into(),
                pillar,
                text: id.into(),
                source_reference: String::new(),
            },
            embedding: Embedding {
                owner_id: id.into(),
                vector,
                model_version: MODEL.into(),
            },
        }
    }

    fn query(vector: Vec<f32>) -> Embedding {
        Embedding {
            owner_id: "chunk".into(),
            vector,
            model_version: MODEL.into(),
        }
    }

    fn index() -> GuidanceIndex {
        GuidanceIndex::from_pairs(
            MODEL,
            "v1",
            "hash",
            vec![
                pair("SEC-01", Pillar::Security, vec![1.0, 0.0]),
                pair("SEC-02", Pillar::Security, vec![0.0, 1.0]),
                pair("SEC-03", Pillar::Security, vec![0.7, 0.7]),
                pair("REL-01", Pillar::Reliability, vec![0.9, 0.1]),
            ],
        )
        .unwrap()
    }

    fn ids(results: &[RetrievedClause]) -> Vec<&str> {
        results.iter().map(|r| r.clause.id.as_str()).collect()
    }

    #[test]
    fn test_orders_by_descending_score() {
        let idx = index();
        let r = Retriever::new(&idx);
        let results = r.retrieve(&query(vec![1.0, 0.0]), 3, None).unwrap();
        assert_eq!(ids(&results), vec!["SEC-01", "REL-01", "SEC-03"]);
        assert!(results[0].score >= results[1].score);
    }

    #[test]
    fn test_pillar_filter() {
        let idx = index();
        let r = Retriever::new(&idx);
        let results = r
            .retrieve(&query(vec![1.0, 0.0]), 5, Some(Pillar::Reliability))
            .unwrap();
        assert_eq!(ids(&results), vec!["REL-01"]);
    }

    #[test]
    fn test_ties_break_by_id_ascending() {
        let idx = GuidanceIndex::from_pairs(
            MODEL,
            "v1",
            "hash",
            vec![
                pair("B", Pillar::Security, vec![1.0, 0.0]),
                pair("C", Pillar::Security, vec![2.0, 0.0]),
                pair("A", Pillar::Security, vec![3.0, 0.0]),
            ],
        )
        .unwrap();
        let r = Retriever::new(&idx);
        let q = query(vec![1.0, 0.0]);
        let first = r.retrieve(&q, 2, None).unwrap();
        assert_eq!(ids(&first), vec!["A", "B"]);
        for _ in 0..5 {
            assert_eq!(r.retrieve(&q, 2, None).unwrap(), first);
        }
    }

    #[test]
    fn test_empty_security_index_returns_empty() {
        let idx = GuidanceIndex::from_pairs(MODEL, "v1", "hash", Vec::new()).unwrap();
        let r = Retriever::new(&idx);
        let results = r
            .retrieve(&query(vec![1.0, 0.0]), 5, Some(Pillar::Security))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_missing_pillar_returns_empty() {
        let idx = index();
        let r = Retriever::new(&idx);
        let results = r
            .retrieve(&query(vec![1.0, 0.0]), 3, Some(Pillar::Sustainability))
            .unwrap();
        assert!(results.is_empty());
    }

    #[test]
    fn test_k_zero() {
        let idx = index();
        let r = Retriever::new(&idx);
        assert!(r.retrieve(&query(vec![1.0, 0.0]), 0, None).unwrap().is_empty());
    }

    #[test]
    fn test_model_mismatch_is_error() {
        let idx = index();
        let r = Retriever::new(&idx);
        let mut q = query(vec![1.0, 0.0]);
        q.model_version = "other".into();
        assert!(matches!(
            r.retrieve(&q, 3, None),
            Err(AuditError::ModelVersionMismatch { .. })
        ));
    }

    #[test]
    fn test_per_pillar_scope() {
        let idx = index();
        let r = Retriever::new(&idx);
        let results = r
            .retrieve_scoped(&query(vec![1.0, 0.0]), 1, RetrievalScope::PerPillar)
            .unwrap();
        // Security comes before Reliability in pillar order.
        assert_eq!(ids(&results), vec!["SEC-01", "REL-01"]);
    }
}
