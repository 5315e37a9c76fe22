//! Guidance corpus loading and index lifecycle.
//!
//! The corpus is either the built-in AWS Well-Architected clause set
//! (`guidance/pillars.toml`, compiled in) or a file named by
//! `[guidance].corpus`. The file format is:
//!
//! ```toml
//! version = "2024.1"
//!
//! [[clause]]
//! id = "SEC-01"
//! pillar = "Security"
//! text = "Grant least privilege..."
//! source = "AWS Well-Architected SEC03-BP02"
//! ```
//!
//! [`build_index`] embeds every clause through the [`Embedder`] and compares
//! the corpus hash with the one recorded in the cache for the embedding
//! model. A mismatch means the corpus changed since the last run; the new
//! hash is recorded once the index is built. Unchanged clauses stay cache
//! hits either way.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

use pillar_audit_core::error::AuditError;
use pillar_audit_core::guidance::{GuidanceCorpus, GuidanceIndex};
use pillar_audit_core::models::{GuidanceClause, Pillar};

use crate::embedder::Embedder;

const BUILTIN_CORPUS: &str = include_str!("../guidance/pillars.toml");

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct CorpusFile {
    version: String,
    #[serde(default, rename = "clause")]
    clauses: Vec<ClauseEntry>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct ClauseEntry {
    id: String,
    pillar: String,
    text: String,
    #[serde(default)]
    source: String,
}

/// Load the corpus at `path`, or the built-in corpus when `None`.
pub fn load_corpus(path: Option<&Path>) -> Result<GuidanceCorpus> {
    match path {
        Some(path) => {
            let content = std::fs::read_to_string(path)
                .with_context(|| format!("Failed to read guidance corpus: {}", path.display()))?;
            parse_corpus(&content)
                .with_context(|| format!("Invalid guidance corpus: {}", path.display()))
        }
        None => parse_corpus(BUILTIN_CORPUS).context("Invalid built-in guidance corpus"),
    }
}

/// Parse and validate a corpus document.
pub fn parse_corpus(content: &str) -> Result<GuidanceCorpus> {
    let file: CorpusFile = toml::from_str(content).map_err(|e| {
        AuditError::Configuration(format!("failed to parse guidance corpus: {}", e))
    })?;

    let mut clauses = Vec::with_capacity(file.clauses.len());
    for entry in file.clauses {
        let pillar = Pillar::parse(&entry.pillar).ok_or_else(|| {
            AuditError::Configuration(format!(
                "guidance clause '{}' has unknown pillar '{}'",
                entry.id, entry.pillar
            ))
        })?;
        clauses.push(GuidanceClause {
            id: entry.id.trim().to_string(),
            pillar,
            text: entry.text.trim().to_string(),
            source_reference: entry.source.trim().to_string(),
        });
    }

    let corpus = GuidanceCorpus {
        version: file.version,
        clauses,
    };
    corpus.validate()?;
    Ok(corpus)
}

/// How the index relates to the last recorded corpus for this model.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexState {
    /// No corpus had been recorded for the model.
    Fresh,
    /// The recorded hash matched.
    Unchanged,
    /// The recorded hash differed; the index was rebuilt.
    Rebuilt,
}

/// Embed `corpus` and assemble the read-only [`GuidanceIndex`].
///
/// Any failure here is fatal to the run: without the index no chunk can be
/// grounded.
pub async fn build_index(
    embedder: &Embedder,
    corpus: &GuidanceCorpus,
) -> Result<(GuidanceIndex, IndexState), AuditError> {
    let model = embedder.model_version().to_string();
    let hash = corpus.hash();

    let previous = match embedder.cache().corpus_hash(&model).await {
        Ok(previous) => previous,
        Err(e) => {
            tracing::warn!(error = %e, "could not read recorded corpus hash");
            None
        }
    };
    let state = match previous.as_deref() {
        None => IndexState::Fresh,
        Some(h) if h == hash => IndexState::Unchanged,
        Some(h) => {
            tracing::info!(
                model = %model,
                previous = %short(h),
                current = %short(&hash),
                "guidance corpus changed; rebuilding index"
            );
            IndexState::Rebuilt
        }
    };

    let items: Vec<(String, String)> = corpus
        .clauses
        .iter()
        .map(|c| (c.id.clone(), GuidanceCorpus::embedding_text(c)))
        .collect();
    let embeddings = embedder.embed(&items).await?;
    let index = GuidanceIndex::build(corpus, embeddings, &model)?;

    if state != IndexState::Unchanged {
        if let Err(e) = embedder.cache().record_corpus_hash(&model, &hash).await {
            tracing::warn!(error = %e, "could not record corpus hash");
        }
    }

    tracing::info!(
        clauses = index.len(),
        version = %index.corpus_version(),
        model = %model,
        "guidance index ready"
    );
    Ok((index, state))
}

fn short(hash: &str) -> &str {
    hash.get(..12).unwrap_or(hash)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_corpus_covers_every_pillar() {
        let corpus = load_corpus(None).unwrap();
        for pillar in Pillar::ALL {
            assert!(
                corpus.clauses.iter().any(|c| c.pillar == pillar),
                "no built-in clause for {}",
                pillar
            );
        }
    }

    #[test]
    fn test_parse_accepts_snake_case_pillar() {
        let corpus = parse_corpus(
            r#"
version = "t1"
[[clause]]
id = "C-1"
pillar = "cost_optimization"
text = "Right-size."
"#,
        )
        .unwrap();
        assert_eq!(corpus.clauses[0].pillar, Pillar::CostOptimization);
        assert_eq!(corpus.clauses[0].source_reference, "");
    }

    #[test]
    fn test_unknown_pillar_is_configuration_error() {
        let err = parse_corpus(
            "version = \"t1\"\n[[clause]]\nid = \"X\"\npillar = \"Usability\"\ntext = \"t\"",
        )
        .unwrap_err();
        match err.downcast_ref::<AuditError>() {
            Some(AuditError::Configuration(msg)) => assert!(msg.contains("Usability")),
            other => panic!("expected configuration error, got {:?}", other),
        }
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let doc = r#"
version = "t1"
[[clause]]
id = "A"
pillar = "Security"
text = "one"
[[clause]]
id = "A"
pillar = "Security"
text = "two"
"#;
        assert!(parse_corpus(doc).is_err());
    }
}
