//! Orchestrator: scan → chunk → index → embed/retrieve/analyze → aggregate.
//!
//! The guidance index is built first and shared read-only behind an `Arc`.
//! Chunk texts are then embedded in groups of the embedder's `batch_size`;
//! a group the provider rejects is retried one chunk at a time so a bad
//! text only skips its own chunk. Chunks are then processed by workers in a
//! [`JoinSet`], at most
//! `concurrency` at a time (bounded by a [`Semaphore`]). Each worker owns
//! one chunk and produces one [`ChunkResult`]; no state is shared between
//! workers except the index and the embedding cache.
//!
//! Results are put back into chunk order before aggregation, so the report
//! does not depend on completion order.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;

use pillar_audit_core::aggregate::{aggregate, ChunkOutcome, ChunkResult, RunInfo};
use pillar_audit_core::chunk::{Chunker, SourceFile};
use pillar_audit_core::error::AuditError;
use pillar_audit_core::guidance::{GuidanceCorpus, GuidanceIndex};
use pillar_audit_core::models::{AnalysisReport, Chunk, Embedding, Warning, WarningKind};
use pillar_audit_core::retrieve::{RetrievalScope, Retriever};

use crate::analyzer::Analyzer;
use crate::config::Config;
use crate::connector_fs::Scan;
use crate::embedder::Embedder;
use crate::guidance::build_index;
use crate::progress::{AuditProgressEvent, AuditProgressReporter};

/// Run-shaping settings, taken from [`Config`] and CLI overrides.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub k: usize,
    pub scope: RetrievalScope,
    pub concurrency: usize,
    pub max_tokens: usize,
}

impl PipelineSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            k: config.retrieval.k,
            scope: config.retrieval.scope,
            concurrency: config.pipeline.concurrency,
            max_tokens: config.chunking.max_tokens,
        }
    }
}

pub struct Pipeline {
    embedder: Arc<Embedder>,
    analyzer: Arc<Analyzer>,
    settings: PipelineSettings,
}

/// Everything a worker needs, shared read-only.
struct Worker {
    analyzer: Arc<Analyzer>,
    index: Arc<GuidanceIndex>,
    k: usize,
    scope: RetrievalScope,
}

/// Chunk `files`, turning per-file parse errors into warnings.
pub fn collect_chunks(files: Vec<SourceFile>, max_tokens: usize) -> (Vec<Chunk>, Vec<Warning>) {
    let chunker = Chunker::new(files, max_tokens);
    let mut chunks = Vec::new();
    let mut warnings = Vec::new();

    for item in chunker.chunks() {
        match item {
            Ok(chunk) => chunks.push(chunk),
            Err(e) => {
                let subject = match &e {
                    AuditError::Parse { path, .. } => path.to_string_lossy().to_string(),
                    _ => String::new(),
                };
                tracing::warn!(file = %subject, error = %e, "skipping file");
                warnings.push(Warning::new(WarningKind::ParseError, subject, e.to_string()));
            }
        }
    }
    (chunks, warnings)
}

impl Pipeline {
    pub fn new(embedder: Arc<Embedder>, analyzer: Arc<Analyzer>, settings: PipelineSettings) -> Self {
        Self {
            embedder,
            analyzer,
            settings,
        }
    }

    pub fn embedder(&self) -> &Arc<Embedder> {
        &self.embedder
    }

    /// Run a full audit over an already-scanned tree.
    ///
    /// Fails only on guidance index build failure or cancellation. Per-file
    /// and per-chunk problems are recorded in the report.
    pub async fn run(
        &self,
        root: &str,
        scan: Scan,
        corpus: &GuidanceCorpus,
        progress: &dyn AuditProgressReporter,
        cancel: impl Future<Output = ()>,
    ) -> Result<AnalysisReport, AuditError> {
        let files_scanned = scan.files_scanned();
        let mut warnings = scan.warnings;

        let (chunks, parse_warnings) = collect_chunks(scan.files, self.settings.max_tokens);
        warnings.extend(parse_warnings);
        tracing::info!(
            files = files_scanned,
            chunks = chunks.len(),
            skipped_files = warnings.len(),
            "chunking complete"
        );

        progress.report(AuditProgressEvent::Indexing {
            root: root.to_string(),
            clauses: corpus.clauses.len() as u64,
        });
        let (index, _) = build_index(&self.embedder, corpus).await?;
        let index = Arc::new(index);

        tokio::pin!(cancel);
        let embeddings = self.embed_chunks(&chunks, &mut cancel).await?;
        let results = self
            .analyze_all(root, chunks, embeddings, index.clone(), progress, &mut cancel)
            .await?;

        let info = RunInfo {
            files_scanned,
            corpus_version: index.corpus_version().to_string(),
            corpus_hash: index.corpus_hash().to_string(),
            embedding_model: self.embedder.model_version().to_string(),
            reasoning_model: self.analyzer.model_name().to_string(),
            generated_at: chrono::Utc::now(),
            warnings,
        };
        let report = aggregate(results, &index, info);

        let stats = self.embedder.stats();
        tracing::info!(
            findings = report.findings.len(),
            analyzed = report.chunks_analyzed,
            total = report.chunks_total,
            cache_hits = stats.cache_hits,
            cache_misses = stats.cache_misses,
            status = ?report.overall_status,
            "audit complete"
        );
        Ok(report)
    }

    /// One embedding result per chunk, in chunk order.
    async fn embed_chunks(
        &self,
        chunks: &[Chunk],
        cancel: impl Future<Output = ()>,
    ) -> Result<Vec<Result<Embedding, AuditError>>, AuditError> {
        let embedder = &self.embedder;
        let work = async {
            let mut out = Vec::with_capacity(chunks.len());
            for group in chunks.chunks(embedder.batch_size()) {
                let items: Vec<(String, String)> = group
                    .iter()
                    .map(|c| (c.id.clone(), c.embedding_text()))
                    .collect();
                match embedder.embed(&items).await {
                    Ok(embeddings) => out.extend(embeddings.into_iter().map(Ok)),
                    Err(e) if items.len() > 1 => {
                        tracing::warn!(error = %e, chunks = items.len(), "batch embedding failed; retrying chunks one by one");
                        for (id, text) in &items {
                            out.push(embedder.embed_one(id, text).await);
                        }
                    }
                    Err(e) => out.push(Err(e)),
                }
            }
            out
        };

        tokio::select! {
            out = work => Ok(out),
            _ = cancel => {
                tracing::warn!(total = chunks.len(), "audit cancelled while embedding chunks");
                Err(AuditError::Cancelled("cancelled while embedding chunks".into()))
            }
        }
    }

    async fn analyze_all(
        &self,
        root: &str,
        chunks: Vec<Chunk>,
        embeddings: Vec<Result<Embedding, AuditError>>,
        index: Arc<GuidanceIndex>,
        progress: &dyn AuditProgressReporter,
        cancel: impl Future<Output = ()>,
    ) -> Result<Vec<ChunkResult>, AuditError> {
        let total = chunks.len();
        let worker = Arc::new(Worker {
            analyzer: self.analyzer.clone(),
            index,
            k: self.settings.k,
            scope: self.settings.scope,
        });
        let semaphore = Arc::new(Semaphore::new(self.settings.concurrency.max(1)));

        let mut set = JoinSet::new();
        for (position, (chunk, embedding)) in chunks.iter().cloned().zip(embeddings).enumerate() {
            let worker = worker.clone();
            let semaphore = semaphore.clone();
            set.spawn(async move {
                let _permit = semaphore.acquire_owned().await;
                (position, worker.process(chunk, embedding).await)
            });
        }

        progress.report(AuditProgressEvent::Analyzing {
            root: root.to_string(),
            n: 0,
            total: total as u64,
        });

        let mut slots: Vec<Option<ChunkResult>> = vec![None; total];
        let mut done = 0u64;
        tokio::pin!(cancel);

        loop {
            tokio::select! {
                joined = set.join_next() => {
                    let Some(joined) = joined else { break };
                    match joined {
                        Ok((position, result)) => slots[position] = Some(result),
                        Err(e) => tracing::error!(error = %e, "analysis worker failed"),
                    }
                    done += 1;
                    progress.report(AuditProgressEvent::Analyzing {
                        root: root.to_string(),
                        n: done,
                        total: total as u64,
                    });
                }
                _ = &mut cancel => {
                    set.abort_all();
                    tracing::warn!(completed = done, total, "audit cancelled");
                    return Err(AuditError::Cancelled(format!(
                        "{} of {} chunks completed",
                        done, total
                    )));
                }
            }
        }

        // A panicked worker leaves its slot empty.
        Ok(chunks
            .into_iter()
            .zip(slots)
            .map(|(chunk, slot)| {
                slot.unwrap_or_else(|| ChunkResult {
                    chunk,
                    outcome: ChunkOutcome::Skipped {
                        reason: WarningKind::AnalysisFailed,
                        message: "analysis worker panicked".into(),
                    },
                })
            })
            .collect())
    }
}

impl Worker {
    async fn process(&self, chunk: Chunk, embedding: Result<Embedding, AuditError>) -> ChunkResult {
        let embedding = match embedding {
            Ok(embedding) => embedding,
            Err(e) => return skip(chunk, WarningKind::EmbeddingUnavailable, e),
        };

        let retrieved = match Retriever::new(&self.index).retrieve_scoped(&embedding, self.k, self.scope) {
            Ok(retrieved) => retrieved,
            Err(e) => return skip(chunk, WarningKind::EmbeddingUnavailable, e),
        };

        match self.analyzer.analyze(&chunk, &retrieved).await {
            Ok(parsed) => ChunkResult {
                chunk,
                outcome: ChunkOutcome::Analyzed {
                    findings: parsed.findings,
                    warnings: parsed.warnings,
                },
            },
            Err(e) => skip(chunk, WarningKind::AnalysisFailed, e),
        }
    }
}

fn skip(chunk: Chunk, reason: WarningKind, error: AuditError) -> ChunkResult {
    tracing::warn!(
        chunk = %chunk.address(),
        file = %chunk.file_path,
        error = %error,
        "skipping chunk"
    );
    ChunkResult {
        chunk,
        outcome: ChunkOutcome::Skipped {
            reason,
            message: error.to_string(),
        },
    }
}
